use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
    Client,
};
use reqwest::StatusCode;

use crate::config::{default_base_url, parse_llm_provider_model, requires_api_key, LlmConfig};
use crate::error::{RagError, Result};

/// Sampling settings for a single completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug)]
enum Failure {
    /// Worth another attempt: server errors, timeouts, dropped connections.
    Transient(RagError),
    Permanent(RagError),
}

/// Chat-completion client for OpenAI-compatible endpoints.
#[derive(Clone)]
pub struct LlmApiClient {
    client: Client<OpenAIConfig>,
    model: String,
    max_retries: u32,
}

impl LlmApiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let (provider, model) = parse_llm_provider_model(&config.model);

        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty());
        if api_key.is_none() && requires_api_key(provider) {
            return Err(RagError::LlmUnavailable(format!(
                "LLM_API_KEY is required for {provider} models"
            )));
        }

        // Unprefixed names go to the server exactly as configured.
        let model = if provider == "local" {
            config.model.clone()
        } else {
            model.to_string()
        };
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RagError::Llm(format!("Failed to create LLM HTTP client: {e}")))?;

        // Disable async-openai's own retries; `chat` retries after classifying.
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: Some(Duration::ZERO),
            ..Default::default()
        };

        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_base(base_url)
                .with_api_key(api_key.unwrap_or_default()),
        )
        .with_http_client(http_client)
        .with_backoff(backoff);

        Ok(Self {
            client,
            model,
            max_retries: config.max_retries,
        })
    }

    /// Sends one system and one user message and returns the reply text.
    ///
    /// Transient failures are retried up to `max_retries` times with
    /// exponential backoff; rate limits and auth failures return at once.
    pub async fn chat(&self, system: &str, user: &str, options: ChatOptions) -> Result<String> {
        if user.trim().is_empty() {
            return Err(RagError::Validation("Prompt cannot be empty".to_string()));
        }
        let request = self.request(system, user, options)?;

        let mut attempt: u32 = 0;
        loop {
            let failure = match self.client.chat().create(request.clone()).await {
                Ok(response) => return first_choice(response),
                Err(error) => classify(error),
            };

            match failure {
                Failure::Transient(error) if attempt < self.max_retries => {
                    attempt += 1;
                    let delay = Duration::from_millis(100 * 2_u64.pow((attempt - 1).min(6)));
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying LLM completion"
                    );
                    tokio::time::sleep(delay).await;
                }
                Failure::Transient(error) | Failure::Permanent(error) => return Err(error),
            }
        }
    }

    fn request(
        &self,
        system: &str,
        user: &str,
        options: ChatOptions,
    ) -> Result<CreateChatCompletionRequest> {
        let invalid = |e: OpenAIError| RagError::Validation(format!("Invalid completion request: {e}"));

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(invalid)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(invalid)?
                .into(),
        ];

        CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(messages)
            .temperature(options.temperature)
            .max_tokens(options.max_tokens)
            .build()
            .map_err(invalid)
    }
}

fn first_choice(response: CreateChatCompletionResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| RagError::Llm("LLM returned an empty completion".to_string()))
}

fn classify(error: OpenAIError) -> Failure {
    match error {
        OpenAIError::ApiError(api) if is_rate_limited(&api) => {
            Failure::Permanent(RagError::LlmRateLimit { retry_after: None })
        }
        OpenAIError::ApiError(api) if is_auth_failure(&api) => {
            Failure::Permanent(RagError::Llm(format!("LLM authentication failed: {api}")))
        }
        // async-openai reports 5xx bodies as an untyped ApiError.
        OpenAIError::ApiError(api) if api.r#type.is_none() && api.code.is_none() => {
            Failure::Transient(RagError::Llm(format!("LLM server error: {}", api.message)))
        }
        OpenAIError::ApiError(api) => Failure::Permanent(RagError::Llm(format!("LLM API error: {api}"))),
        OpenAIError::Reqwest(e) => match e.status() {
            Some(StatusCode::TOO_MANY_REQUESTS) => {
                Failure::Permanent(RagError::LlmRateLimit { retry_after: None })
            }
            Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                Failure::Permanent(RagError::Llm(format!("LLM authentication failed: {e}")))
            }
            Some(status) if !status.is_server_error() => {
                Failure::Permanent(RagError::Llm(format!("LLM request failed: {e}")))
            }
            _ => Failure::Transient(RagError::Llm(format!("LLM request failed: {e}"))),
        },
        OpenAIError::JSONDeserialize(e) => {
            Failure::Permanent(RagError::Llm(format!("Failed to parse LLM response: {e}")))
        }
        other => Failure::Permanent(RagError::Llm(other.to_string())),
    }
}

fn api_error_text(api: &ApiError) -> String {
    [
        Some(api.message.as_str()),
        api.r#type.as_deref(),
        api.code.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase()
}

fn is_rate_limited(api: &ApiError) -> bool {
    let text = api_error_text(api);
    ["rate_limit", "rate limit", "too many requests", "insufficient_quota"]
        .iter()
        .any(|needle| text.contains(needle))
}

fn is_auth_failure(api: &ApiError) -> bool {
    let text = api_error_text(api);
    ["invalid_api_key", "invalid api key", "incorrect api key", "authentication", "unauthorized"]
        .iter()
        .any(|needle| text.contains(needle))
}
