use std::sync::Arc;

use crate::db::{ConversationStore, DatabaseBackend, MessageStore};
use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::models::{BackfillReport, Message, NewMessage};

/// Writes chat messages and keeps their embeddings current.
#[derive(Clone)]
pub struct MessageIndexer {
    embedder: Option<Arc<dyn Embedder>>,
}

impl MessageIndexer {
    pub fn new(embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self { embedder }
    }

    /// Stores a message and attaches its embedding.
    ///
    /// The message is kept even when embedding fails; it is picked up by
    /// [`backfill_embeddings`](Self::backfill_embeddings) later.
    pub async fn record_message(
        &self,
        store: &dyn DatabaseBackend,
        message: &NewMessage,
    ) -> Result<Message> {
        if message.content.trim().is_empty() {
            return Err(RagError::Validation("Message content is empty".to_string()));
        }

        store
            .ensure_conversation(
                message.conversation_kind,
                message.conversation_id,
                message.owner_user_id,
            )
            .await?;
        let stored = store.append_message(message).await?;

        let Some(embedder) = &self.embedder else {
            return Ok(stored);
        };

        let embedding = match embedder.embed_passages(vec![stored.content.clone()]).await {
            Ok(mut vectors) if vectors.len() == 1 => vectors.remove(0),
            Ok(vectors) => {
                tracing::warn!(
                    message_id = stored.id,
                    returned = vectors.len(),
                    "Embedder returned unexpected vector count"
                );
                return Ok(stored);
            }
            Err(e) => {
                tracing::warn!(
                    message_id = stored.id,
                    conversation_id = stored.conversation_id,
                    error = %e,
                    "Failed to embed message, leaving for backfill"
                );
                return Ok(stored);
            }
        };

        if let Err(e) = store.update_message_embedding(stored.id, &embedding).await {
            tracing::warn!(message_id = stored.id, error = %e, "Failed to store message embedding");
        }

        Ok(stored)
    }

    /// Embeds every stored message that has no embedding yet.
    ///
    /// A batch the embedder rejects is counted as failed and skipped; the run
    /// continues with the next batch.
    pub async fn backfill_embeddings(
        &self,
        store: &dyn DatabaseBackend,
        batch_size: usize,
    ) -> Result<BackfillReport> {
        let Some(embedder) = &self.embedder else {
            return Err(RagError::Embedding(
                "Embeddings are disabled; nothing to backfill with".to_string(),
            ));
        };
        if batch_size == 0 {
            return Err(RagError::Validation("Batch size must be positive".to_string()));
        }
        let limit = u32::try_from(batch_size).unwrap_or(u32::MAX);

        let mut report = BackfillReport::default();
        let mut cursor = 0i64;

        loop {
            let batch = store.get_messages_without_embedding(cursor, limit).await?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = last.id;

            let texts: Vec<String> = batch.iter().map(|m| m.content.clone()).collect();
            let vectors = match embedder.embed_passages(texts).await {
                Ok(vectors) if vectors.len() == batch.len() => vectors,
                Ok(vectors) => {
                    tracing::warn!(
                        expected = batch.len(),
                        returned = vectors.len(),
                        "Embedding batch size mismatch, skipping batch"
                    );
                    report.failed += batch.len() as u64;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(
                        batch_len = batch.len(),
                        last_id = cursor,
                        error = %e,
                        "Embedding batch failed, skipping"
                    );
                    report.failed += batch.len() as u64;
                    continue;
                }
            };

            for (message, vector) in batch.iter().zip(vectors) {
                match store.update_message_embedding(message.id, &vector).await {
                    Ok(()) => report.updated += 1,
                    Err(e) => {
                        tracing::warn!(message_id = message.id, error = %e, "Failed to store embedding");
                        report.failed += 1;
                    }
                }
            }

            tracing::debug!(updated = report.updated, last_id = cursor, "Backfill batch done");
        }

        tracing::info!(
            updated = report.updated,
            failed = report.failed,
            "Embedding backfill complete"
        );
        Ok(report)
    }
}
