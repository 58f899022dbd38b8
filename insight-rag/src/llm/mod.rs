mod api;
pub mod prompts;
mod provider;

use async_trait::async_trait;

use crate::error::Result;

pub use provider::LlmProvider;

/// Condenses a conversation transcript into a short paragraph.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> Result<String>;
}
