use chrono::{DateTime, Utc};

use crate::models::{EnhancedRagContext, MergedRagContext, Message, Role};

const HEADER: &str = "RELEVANT CONTEXT FROM PAST CONVERSATIONS:\n";
const EXCERPT_START: &str = "---excerpt---";
const EXCERPT_END: &str = "---end excerpt---\n";
const RETRIEVED_MARKER: &str = "← Retrieved via semantic search";

fn format_minute(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M").to_string()
}

/// Assistant turns render as "You".
fn speaker_label(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Assistant => "You",
    }
}

fn message_line(message: &Message) -> String {
    format!(
        "{} ({}): {}",
        speaker_label(message.role),
        format_minute(&message.created_at),
        message.content
    )
}

fn summary_line(date: &DateTime<Utc>, summary: &str) -> String {
    format!("\n[Summary of conversation from {}: {}]", format_minute(date), summary)
}

/// Renders retrieved contexts as prompt excerpts, one per match.
///
/// Returns an empty string for no contexts so callers can omit the section.
pub fn format_enhanced_rag_context(contexts: &[EnhancedRagContext]) -> String {
    if contexts.is_empty() {
        return String::new();
    }

    let mut parts = vec![HEADER.to_string()];

    for ctx in contexts {
        parts.push(summary_line(&ctx.conversation_date, &ctx.summary));
        parts.push(EXCERPT_START.to_string());

        parts.extend(ctx.messages_before.iter().map(message_line));
        parts.push(format!(
            "{}  {}",
            message_line(&ctx.matched_message),
            RETRIEVED_MARKER
        ));
        parts.extend(ctx.messages_after.iter().map(message_line));

        parts.push(EXCERPT_END.to_string());
    }

    parts.join("\n")
}

/// Renders merged contexts, one excerpt per conversation.
///
/// With several matches each is numbered (`← Match i/n ...`) and the messages
/// between consecutive matches are kept in place.
pub fn format_merged_rag_context(contexts: &[MergedRagContext]) -> String {
    if contexts.is_empty() {
        return String::new();
    }

    let mut parts = vec![HEADER.to_string()];

    for ctx in contexts {
        parts.push(summary_line(&ctx.conversation_date, &ctx.summary));
        parts.push(EXCERPT_START.to_string());

        parts.extend(ctx.messages_before.iter().map(message_line));

        let total = ctx.matched_messages.len();
        for (i, matched) in ctx.matched_messages.iter().enumerate() {
            let marker = if total > 1 {
                format!("← Match {}/{} via semantic search", i + 1, total)
            } else {
                RETRIEVED_MARKER.to_string()
            };
            parts.push(format!("{}  {}", message_line(matched), marker));

            if let Some(next) = ctx.matched_messages.get(i + 1) {
                let lower = (matched.created_at, matched.id);
                let upper = (next.created_at, next.id);
                parts.extend(
                    ctx.messages_between
                        .iter()
                        .filter(|m| {
                            let key = (m.created_at, m.id);
                            lower < key && key < upper
                        })
                        .map(message_line),
                );
            }
        }

        parts.extend(ctx.messages_after.iter().map(message_line));

        parts.push(EXCERPT_END.to_string());
    }

    parts.join("\n")
}
