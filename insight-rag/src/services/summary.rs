use std::sync::Arc;
use std::time::Duration;

use unicode_segmentation::UnicodeSegmentation;

use crate::config::RagConfig;
use crate::db::{DatabaseBackend, MessageStore, SummaryStore};
use crate::error::{RagError, Result};
use crate::llm::Summarizer;
use crate::models::{ConversationKind, Message};

pub const FALLBACK_SUMMARY: &str = "Previous conversation";
pub const EMPTY_CONVERSATION_SUMMARY: &str = "Empty conversation";

/// Cache-aside conversation summaries.
///
/// A cached summary is reused while the conversation's message count is
/// unchanged and regenerated otherwise. Concurrent regenerations of the same
/// conversation are not coordinated; the last upsert wins.
#[derive(Clone)]
pub struct SummaryManager {
    summarizer: Option<Arc<dyn Summarizer>>,
    max_messages: u32,
    content_chars: usize,
    timeout: Duration,
}

impl SummaryManager {
    pub fn new(summarizer: Option<Arc<dyn Summarizer>>, config: &RagConfig) -> Self {
        Self {
            summarizer,
            max_messages: config.summary_max_messages,
            content_chars: config.summary_content_chars,
            timeout: Duration::from_secs(config.summary_timeout_secs.max(1)),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the conversation summary, generating and caching it when the
    /// cache is missing or stale. Never fails: any error yields
    /// [`FALLBACK_SUMMARY`] and leaves the cache untouched.
    pub async fn get_or_create_conversation_summary(
        &self,
        store: &dyn DatabaseBackend,
        kind: ConversationKind,
        conversation_id: i64,
    ) -> String {
        let live_count = match store.count_messages(kind, conversation_id).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(
                    conversation_kind = %kind,
                    conversation_id,
                    error = %e,
                    "Failed to count conversation messages"
                );
                return FALLBACK_SUMMARY.to_string();
            }
        };

        let cached = match store.get_conversation_summary(kind, conversation_id).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(
                    conversation_kind = %kind,
                    conversation_id,
                    error = %e,
                    "Summary cache lookup failed, regenerating"
                );
                None
            }
        };

        if let Some(cached) = cached.filter(|c| c.is_valid_for(live_count)) {
            tracing::debug!(conversation_id, message_count = live_count, "Summary cache hit");
            return cached.summary_text;
        }

        if live_count == 0 {
            return EMPTY_CONVERSATION_SUMMARY.to_string();
        }

        let Some(summarizer) = &self.summarizer else {
            tracing::debug!(conversation_id, "No summarizer configured");
            return FALLBACK_SUMMARY.to_string();
        };

        let summary = match self
            .generate(store, summarizer.as_ref(), kind, conversation_id)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(
                    conversation_kind = %kind,
                    conversation_id,
                    error = %e,
                    "Summary generation failed"
                );
                return FALLBACK_SUMMARY.to_string();
            }
        };

        if let Err(e) = store
            .upsert_conversation_summary(kind, conversation_id, &summary, live_count)
            .await
        {
            tracing::error!(
                conversation_kind = %kind,
                conversation_id,
                error = %e,
                "Failed to cache conversation summary"
            );
        } else {
            tracing::debug!(conversation_id, message_count = live_count, "Cached new summary");
        }

        summary
    }

    async fn generate(
        &self,
        store: &dyn DatabaseBackend,
        summarizer: &dyn Summarizer,
        kind: ConversationKind,
        conversation_id: i64,
    ) -> Result<String> {
        let messages = store
            .get_recent_messages(kind, conversation_id, self.max_messages)
            .await?;
        let transcript = build_transcript(&messages, self.content_chars);

        let summary = tokio::time::timeout(self.timeout, summarizer.summarize(&transcript))
            .await
            .map_err(|_| RagError::Timeout(self.timeout.as_secs()))??;

        let summary = summary.trim();
        if summary.is_empty() {
            return Err(RagError::Llm("Summarizer returned empty text".to_string()));
        }

        Ok(summary.to_string())
    }
}

/// One `Speaker: text` line per message, each text cut to `max_chars`
/// grapheme clusters.
pub fn build_transcript(messages: &[Message], max_chars: usize) -> String {
    messages
        .iter()
        .map(|m| {
            let content: String = m.content.graphemes(true).take(max_chars).collect();
            format!("{}: {}", m.role.transcript_label(), content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
