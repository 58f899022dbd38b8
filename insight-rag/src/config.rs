use serde::Deserialize;
use std::env;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_opt<T: std::str::FromStr>(var: &str) -> Option<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Ignoring.", val, var, e);
                None
            }
        },
        Err(_) => None,
    }
}

/// Values of `EMBEDDING_MODEL` that switch retrieval off entirely.
const DISABLED_MODEL_VALUES: &[&str] = &["none", "off", "disabled"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub embeddings: Option<EmbeddingsConfig>,
    pub llm: Option<LlmConfig>,
    pub rag: RagConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub auth_token: Option<String>,
    pub local_path: Option<String>,
    /// Dimension of the `messages.embedding` vector column.
    pub embedding_dimensions: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// LLM configuration for the summarizer model
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RagConfig {
    /// Number of semantically similar messages to retrieve.
    pub context_limit: u32,
    /// Messages shown before and after each match.
    pub surrounding_messages: u32,
    /// Most recent messages fed to the summarizer.
    pub summary_max_messages: u32,
    /// Per-message truncation inside the summary transcript.
    pub summary_content_chars: usize,
    pub summary_timeout_secs: u64,
    /// Collapse hits from the same conversation into one excerpt.
    pub merge_same_conversation: bool,
    pub backfill_batch_size: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            context_limit: 5,
            surrounding_messages: 2,
            summary_max_messages: 50,
            summary_content_chars: 200,
            summary_timeout_secs: 10,
            merge_same_conversation: false,
            backfill_batch_size: 100,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let embedding_model = env::var("EMBEDDING_MODEL")
            .unwrap_or_else(|_| "BAAI/bge-small-en-v1.5".to_string());
        let embedding_dimensions = parse_env_or("EMBEDDING_DIMENSIONS", 384);
        let rag_defaults = RagConfig::default();

        Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| "file:insight-rag.db".to_string()),
                auth_token: env::var("DATABASE_AUTH_TOKEN").ok(),
                local_path: env::var("DATABASE_LOCAL_PATH").ok(),
                embedding_dimensions,
            },
            embeddings: if DISABLED_MODEL_VALUES.contains(&embedding_model.to_lowercase().as_str())
            {
                None
            } else {
                Some(EmbeddingsConfig {
                    model: embedding_model,
                    dimensions: embedding_dimensions,
                    batch_size: parse_env_or("EMBEDDING_BATCH_SIZE", 256),
                    api_key: env::var("EMBEDDING_API_KEY").ok(),
                    base_url: env::var("EMBEDDING_BASE_URL").ok(),
                    timeout_secs: parse_env_or("EMBEDDING_TIMEOUT", 30),
                    max_retries: parse_env_or("EMBEDDING_MAX_RETRIES", 3),
                })
            },
            llm: env::var("LLM_MODEL").ok().map(|model| LlmConfig {
                model,
                api_key: env::var("LLM_API_KEY").ok(),
                base_url: env::var("LLM_BASE_URL").ok(),
                timeout_secs: parse_env_or("LLM_TIMEOUT", 30),
                max_retries: parse_env_or("LLM_MAX_RETRIES", 3),
            }),
            rag: RagConfig {
                context_limit: parse_env_or("RAG_CONTEXT_LIMIT", rag_defaults.context_limit),
                surrounding_messages: parse_env_or(
                    "RAG_SURROUNDING_MESSAGES",
                    rag_defaults.surrounding_messages,
                ),
                summary_max_messages: parse_env_or(
                    "RAG_SUMMARY_MAX_MESSAGES",
                    rag_defaults.summary_max_messages,
                ),
                summary_content_chars: parse_env_or(
                    "RAG_SUMMARY_CONTENT_CHARS",
                    rag_defaults.summary_content_chars,
                ),
                summary_timeout_secs: parse_env_opt::<u64>("RAG_SUMMARY_TIMEOUT_SECS")
                    .filter(|secs| *secs > 0)
                    .unwrap_or(rag_defaults.summary_timeout_secs),
                merge_same_conversation: parse_env_or(
                    "RAG_MERGE_SAME_CONVERSATION",
                    rag_defaults.merge_same_conversation,
                ),
                backfill_batch_size: parse_env_opt::<usize>("RAG_BACKFILL_BATCH_SIZE")
                    .filter(|size| *size > 0)
                    .unwrap_or(rag_defaults.backfill_batch_size),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// Known embedding providers that use OpenAI-compatible APIs
const KNOWN_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio", "local"];

/// Known LLM providers that use OpenAI-compatible APIs
pub const KNOWN_LLM_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio"];

/// Base URL of a provider's OpenAI-compatible API. Unknown providers get
/// OpenAI's.
pub fn default_base_url(provider: &str) -> &'static str {
    match provider.to_lowercase().as_str() {
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        "lmstudio" => "http://localhost:1234/v1",
        _ => "https://api.openai.com/v1",
    }
}

/// Self-hosted servers accept unauthenticated requests.
pub fn requires_api_key(provider: &str) -> bool {
    !matches!(
        provider.to_lowercase().as_str(),
        "ollama" | "lmstudio" | "local"
    )
}

/// Parse a model name into (provider, model) tuple.
pub fn parse_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        // Check if prefix is a known provider
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    // Default to local provider
    ("local", model)
}

/// Parse an LLM model name into (provider, model) tuple.
pub fn parse_llm_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_LLM_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    ("local", model)
}
