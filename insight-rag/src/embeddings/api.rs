use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Where and how to reach an OpenAI-compatible embeddings server.
#[derive(Debug, Clone)]
pub struct EmbeddingEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

enum Attempt {
    Done(Vec<Vec<f32>>),
    Retry(RagError),
    Fail(RagError),
}

/// Client for `POST {base_url}/embeddings`.
#[derive(Clone)]
pub struct EmbeddingApiClient {
    http: Client,
    url: String,
    model: String,
    max_retries: u32,
}

impl EmbeddingApiClient {
    pub fn new(endpoint: EmbeddingEndpoint) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = endpoint.api_key.as_deref().filter(|key| !key.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| RagError::Embedding(format!("Invalid API key header: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| RagError::Embedding(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            url: format!("{}/embeddings", endpoint.base_url.trim_end_matches('/')),
            model: endpoint.model,
            max_retries: endpoint.max_retries,
        })
    }

    /// Embeds `texts` in one request. Rate limits, 5xx responses and
    /// transport errors are retried with exponential backoff; 401/403 and
    /// other client errors are not.
    pub async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts.iter().map(|text| text.replace('\n', " ")).collect(),
        };

        let mut attempt: u32 = 0;
        loop {
            match self.send(&request).await {
                Attempt::Done(embeddings) => return Ok(embeddings),
                Attempt::Fail(error) => return Err(error),
                Attempt::Retry(error) if attempt >= self.max_retries => return Err(error),
                Attempt::Retry(error) => {
                    attempt += 1;
                    let delay = Duration::from_millis(100 * 2_u64.pow((attempt - 1).min(6)));
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying embedding request"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn send(&self, request: &EmbeddingRequest<'_>) -> Attempt {
        let response = match self.http.post(&self.url).json(request).send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Retry(RagError::Embedding(format!("Request failed: {e}"))),
        };

        let status = response.status();
        if status.is_success() {
            return match response.json::<EmbeddingResponse>().await {
                Ok(body) if body.data.len() == request.input.len() => {
                    let mut data = body.data;
                    data.sort_by_key(|item| item.index);
                    Attempt::Done(data.into_iter().map(|item| item.embedding).collect())
                }
                Ok(body) => Attempt::Fail(RagError::Embedding(format!(
                    "Expected {} embeddings, got {}",
                    request.input.len(),
                    body.data.len()
                ))),
                Err(e) => Attempt::Fail(RagError::Embedding(format!("Failed to parse response: {e}"))),
            };
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok());
            return Attempt::Retry(RagError::ApiRateLimit { retry_after });
        }

        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Attempt::Fail(RagError::ApiAuth(body)),
            status if status.is_server_error() => {
                Attempt::Retry(RagError::Embedding(format!("Server error {status}: {body}")))
            }
            status => Attempt::Fail(RagError::Embedding(format!("API error {status}: {body}"))),
        }
    }
}
