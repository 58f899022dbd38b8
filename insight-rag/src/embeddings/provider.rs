use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

use crate::config::{default_base_url, parse_provider_model, EmbeddingsConfig};
use crate::error::{RagError, Result};

use super::api::{EmbeddingApiClient, EmbeddingEndpoint};
use super::Embedder;

enum EmbeddingBackend {
    Local {
        model: Arc<Mutex<TextEmbedding>>,
        batch_size: usize,
    },
    Api {
        client: EmbeddingApiClient,
        batch_size: usize,
    },
}

pub struct EmbeddingProvider {
    backend: EmbeddingBackend,
    dimensions: usize,
}

impl EmbeddingProvider {
    /// Builds a local fastembed model, or an API client for
    /// `openai/`, `openrouter/`, `ollama/` and `lmstudio/` model names.
    pub fn new(config: &EmbeddingsConfig) -> Result<Self> {
        let (provider, model_name) = parse_provider_model(&config.model);

        if provider.eq_ignore_ascii_case("local") {
            return Self::new_local(config, model_name);
        }

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());
        let client = EmbeddingApiClient::new(EmbeddingEndpoint {
            base_url,
            api_key: config.api_key.clone(),
            model: model_name.to_string(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })?;

        tracing::info!(provider, model = model_name, "Using embedding API");

        Ok(Self {
            backend: EmbeddingBackend::Api {
                client,
                batch_size: config.batch_size.max(1),
            },
            dimensions: config.dimensions,
        })
    }

    fn new_local(config: &EmbeddingsConfig, model_name: &str) -> Result<Self> {
        let embedding_model = resolve_embedding_model(model_name);
        let model = TextEmbedding::try_new(
            InitOptions::new(embedding_model).with_show_download_progress(true),
        )
        .map_err(|e| RagError::Embedding(e.to_string()))?;

        tracing::info!(model = model_name, "Loaded local embedding model");

        Ok(Self {
            backend: EmbeddingBackend::Local {
                model: Arc::new(Mutex::new(model)),
                batch_size: config.batch_size.max(1),
            },
            dimensions: config.dimensions,
        })
    }

    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = match &self.backend {
            EmbeddingBackend::Local { model, batch_size } => {
                let model = Arc::clone(model);
                let batch_size = *batch_size;
                tokio::task::spawn_blocking(move || {
                    let mut model = model.lock().map_err(|e| {
                        RagError::Embedding(format!("Embedding model lock poisoned: {e}"))
                    })?;
                    model
                        .embed(texts, Some(batch_size))
                        .map_err(|e| RagError::Embedding(e.to_string()))
                })
                .await
                .map_err(|e| RagError::Embedding(format!("Embedding worker failed: {e}")))??
            }
            EmbeddingBackend::Api { client, batch_size } => {
                let mut all = Vec::with_capacity(texts.len());
                for batch in texts.chunks(*batch_size) {
                    let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
                    all.extend(client.embed(&refs).await?);
                }
                all
            }
        };

        for embedding in &embeddings {
            if embedding.len() != self.dimensions {
                return Err(RagError::Embedding(format!(
                    "Embedding has {} dimensions, expected {}",
                    embedding.len(),
                    self.dimensions
                )));
            }
        }

        Ok(embeddings)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn is_local(&self) -> bool {
        matches!(self.backend, EmbeddingBackend::Local { .. })
    }
}

#[async_trait]
impl Embedder for EmbeddingProvider {
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        // Local models use query: prefix
        let text = if self.is_local() {
            format!("query: {query}")
        } else {
            query.to_string()
        };

        self.embed(vec![text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("No embedding generated".to_string()))
    }

    async fn embed_passages(&self, passages: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let texts = if self.is_local() {
            passages
                .into_iter()
                .map(|p| format!("passage: {p}"))
                .collect()
        } else {
            passages
        };

        self.embed(texts).await
    }
}

fn resolve_embedding_model(model_name: &str) -> EmbeddingModel {
    match model_name {
        "BAAI/bge-small-en-v1.5" | "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "BAAI/bge-base-en-v1.5" | "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
        "BAAI/bge-large-en-v1.5" | "bge-large-en-v1.5" => EmbeddingModel::BGELargeENV15,
        "all-MiniLM-L6-v2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            EmbeddingModel::AllMiniLML6V2
        }
        "nomic-embed-text-v1.5" | "nomic-ai/nomic-embed-text-v1.5" => {
            EmbeddingModel::NomicEmbedTextV15
        }
        _ => {
            tracing::warn!(model = model_name, "Unknown local embedding model, using bge-small-en-v1.5");
            EmbeddingModel::BGESmallENV15
        }
    }
}
