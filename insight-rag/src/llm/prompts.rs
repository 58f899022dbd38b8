//! Prompt templates for LLM-powered features
//!
//! These templates use basic `format!()` interpolation for type safety.
//! Missing variables will cause compile-time errors.

/// System prompt for conversation summaries.
pub const CONVERSATION_SUMMARY_SYSTEM_PROMPT: &str = "You summarize past conversations between a reader of the Bible and a study assistant. \
You write in the third person, in plain prose, without lists or headings.";

/// Generate a prompt for summarizing a conversation transcript
///
/// The transcript is expected as one `Speaker: text` line per message,
/// oldest first.
///
/// # Example
/// ```
/// use insight_rag::llm::prompts::conversation_summary_prompt;
///
/// let prompt = conversation_summary_prompt("User: What is grace?\nAssistant: Unmerited favor.");
/// assert!(prompt.contains("What is grace?"));
/// ```
pub fn conversation_summary_prompt(transcript: &str) -> String {
    format!(
        r#"Summarize the following conversation in one or two sentences (at most 50 words).
Name the passages, themes or questions that were discussed so the summary can remind
the assistant what this conversation was about.

Conversation:
{transcript}

Respond with the summary only."#
    )
}
