mod api;
mod provider;


use async_trait::async_trait;

use crate::error::Result;

pub use api::{EmbeddingApiClient, EmbeddingEndpoint};
pub use provider::EmbeddingProvider;

/// Turns text into vectors comparable by cosine distance.
///
/// Queries and stored passages may be encoded differently (some models
/// expect a `query:` / `passage:` prefix), so callers say which one they have.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>>;
    async fn embed_passages(&self, passages: Vec<String>) -> Result<Vec<Vec<f32>>>;
}
