// Common test utilities for integration tests
#![allow(dead_code)]

use std::sync::{Arc, Once};

use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use insight_rag::config::{Config, DatabaseConfig, EmbeddingsConfig, LlmConfig, RagConfig};
use insight_rag::db::{Database, LibSqlBackend};
use insight_rag::embeddings::{Embedder, EmbeddingProvider};
use insight_rag::llm::{LlmProvider, Summarizer};
use insight_rag::services::{MessageIndexer, RagService};

pub const DIMENSIONS: usize = 4;

static INIT: Once = Once::new();

/// Initialize tracing subscriber once for tests
pub fn init_test_logger() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Keyword counts for "pray", "faith" and "grace" plus a constant axis, so
/// texts mentioning the same theme land close together.
pub fn keyword_vector(text: &str) -> Vec<f32> {
    let text = text.to_lowercase();
    vec![
        text.matches("pray").count() as f32,
        text.matches("faith").count() as f32,
        text.matches("grace").count() as f32,
        1.0,
    ]
}

pub fn completion_body(content: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "created": 1,
        "model": "gpt-4o-mini",
        "choices": [
            {
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }
        ],
        "usage": { "prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30 }
    })
}

/// Serves `/embeddings` with [`keyword_vector`] for every input.
pub async fn mount_keyword_embeddings(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(|request: &Request| {
            let body: serde_json::Value = match serde_json::from_slice(&request.body) {
                Ok(body) => body,
                Err(_) => return ResponseTemplate::new(400),
            };
            let data: Vec<serde_json::Value> = body["input"]
                .as_array()
                .map(|inputs| {
                    inputs
                        .iter()
                        .map(|input| {
                            json!({ "embedding": keyword_vector(input.as_str().unwrap_or_default()) })
                        })
                        .collect()
                })
                .unwrap_or_default();
            ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
        })
        .mount(server)
        .await;
}

pub async fn mount_summary(server: &MockServer, summary: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body(summary)))
        .mount(server)
        .await;
}

pub async fn count_requests(server: &MockServer, endpoint: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == endpoint)
        .count()
}

/// A file-backed store plus mock embedding and LLM endpoints.
pub struct TestEnv {
    pub store: LibSqlBackend,
    pub server: MockServer,
    pub config: Config,
    _dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        init_test_logger();

        let server = MockServer::start().await;
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = dir.path().join("insight_rag_test.db");

        let config = Config {
            database: DatabaseConfig {
                url: format!("file:{}", db_path.display()),
                auth_token: None,
                local_path: None,
                embedding_dimensions: DIMENSIONS,
            },
            embeddings: Some(EmbeddingsConfig {
                model: "openai/text-embedding-3-small".to_string(),
                dimensions: DIMENSIONS,
                batch_size: 8,
                api_key: Some("test-key".to_string()),
                base_url: Some(server.uri()),
                timeout_secs: 5,
                max_retries: 0,
            }),
            llm: Some(LlmConfig {
                model: "openai/gpt-4o-mini".to_string(),
                api_key: Some("test-key".to_string()),
                base_url: Some(server.uri()),
                timeout_secs: 5,
                max_retries: 0,
            }),
            rag: RagConfig::default(),
        };

        let db = Database::new(&config.database)
            .await
            .expect("Failed to open test database");

        Self {
            store: LibSqlBackend::new(db),
            server,
            config,
            _dir: dir,
        }
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        let config = self.config.embeddings.as_ref().expect("embeddings configured");
        Arc::new(EmbeddingProvider::new(config).expect("Failed to build embedding provider"))
    }

    pub fn summarizer(&self) -> Arc<dyn Summarizer> {
        Arc::new(LlmProvider::new(self.config.llm.as_ref()))
    }

    pub fn rag(&self) -> RagService {
        RagService::new(
            Some(self.embedder()),
            Some(self.summarizer()),
            self.config.rag.clone(),
        )
    }

    pub fn indexer(&self) -> MessageIndexer {
        MessageIndexer::new(Some(self.embedder()))
    }
}
