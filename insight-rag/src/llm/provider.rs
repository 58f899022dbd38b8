use async_trait::async_trait;

use crate::config::{parse_llm_provider_model, LlmConfig};
use crate::error::{RagError, Result};
use crate::llm::api::{ChatOptions, LlmApiClient};
use crate::llm::prompts::{conversation_summary_prompt, CONVERSATION_SUMMARY_SYSTEM_PROMPT};
use crate::llm::Summarizer;

/// Low temperature, one short paragraph.
const SUMMARY_OPTIONS: ChatOptions = ChatOptions {
    temperature: 0.3,
    max_tokens: 150,
};

#[derive(Clone)]
enum Backend {
    Ready(LlmApiClient),
    Unavailable(String),
}

/// Summarizer backed by the configured chat model.
///
/// A missing or unusable configuration does not fail construction; the
/// provider reports itself unavailable and every call returns
/// [`RagError::LlmUnavailable`].
#[derive(Clone)]
pub struct LlmProvider {
    backend: Backend,
}

impl LlmProvider {
    pub fn new(config: Option<&LlmConfig>) -> Self {
        let backend = match config.map(Self::connect) {
            None => Backend::Unavailable("No LLM configuration provided".to_string()),
            Some(Ok(client)) => Backend::Ready(client),
            Some(Err(RagError::LlmUnavailable(reason))) => Backend::Unavailable(reason),
            Some(Err(e)) => Backend::Unavailable(e.to_string()),
        };
        Self { backend }
    }

    fn connect(config: &LlmConfig) -> Result<LlmApiClient> {
        let (provider, _) = parse_llm_provider_model(&config.model);
        if provider == "local" && config.base_url.is_none() {
            return Err(RagError::LlmUnavailable(format!(
                "Unknown provider in model {}; set LLM_BASE_URL for a custom server",
                config.model
            )));
        }
        LlmApiClient::new(config)
    }

    /// `None` when summaries can be requested.
    pub fn unavailable_reason(&self) -> Option<&str> {
        match &self.backend {
            Backend::Ready(_) => None,
            Backend::Unavailable(reason) => Some(reason.as_str()),
        }
    }
}

#[async_trait]
impl Summarizer for LlmProvider {
    async fn summarize(&self, transcript: &str) -> Result<String> {
        let client = match &self.backend {
            Backend::Ready(client) => client,
            Backend::Unavailable(reason) => return Err(RagError::LlmUnavailable(reason.clone())),
        };

        let summary = client
            .chat(
                CONVERSATION_SUMMARY_SYSTEM_PROMPT,
                &conversation_summary_prompt(transcript),
                SUMMARY_OPTIONS,
            )
            .await?;

        Ok(summary.trim().to_string())
    }
}
