use thiserror::Error;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Database error: {0}")]
    Database(#[from] libsql::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("API rate limit exceeded, retry after {retry_after:?} seconds")]
    ApiRateLimit { retry_after: Option<u64> },

    #[error("API authentication error: {0}")]
    ApiAuth(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM rate limit exceeded, retry after {retry_after:?} seconds")]
    LlmRateLimit { retry_after: Option<u64> },

    #[error("Timed out after {0} seconds")]
    Timeout(u64),
}

impl RagError {
    /// Whether the failure came from an upstream dependency rather than bad input.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            RagError::Database(_)
                | RagError::Embedding(_)
                | RagError::Http(_)
                | RagError::ApiRateLimit { .. }
                | RagError::Llm(_)
                | RagError::LlmUnavailable(_)
                | RagError::LlmRateLimit { .. }
                | RagError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
