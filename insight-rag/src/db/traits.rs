use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    Conversation, ConversationKind, ConversationSummary, Message, MessageSearchHit, NewMessage,
};

// ---------------------------------------------------------------------------
// Individual store traits
// ---------------------------------------------------------------------------

/// Conversation rows keyed by (kind, id).
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create the conversation for `owner_user_id` if it does not exist yet.
    /// Fails with `Validation` when another user owns it.
    async fn ensure_conversation(
        &self,
        kind: ConversationKind,
        id: i64,
        owner_user_id: i64,
    ) -> Result<Conversation>;
    async fn get_conversation(
        &self,
        kind: ConversationKind,
        id: i64,
    ) -> Result<Option<Conversation>>;

    /// Remove the conversation, its messages and its cached summary atomically.
    /// Returns `false` (and deletes nothing) unless `owner_user_id` owns it.
    async fn delete_conversation(
        &self,
        kind: ConversationKind,
        id: i64,
        owner_user_id: i64,
    ) -> Result<bool>;
}

/// Append-only message log with vector search.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_message(&self, message: &NewMessage) -> Result<Message>;
    async fn update_message_embedding(&self, id: i64, embedding: &[f32]) -> Result<()>;

    /// Cosine nearest neighbours among `owner_user_id`'s messages of `kind`,
    /// closest first, skipping `exclude_conversation_id` when given.
    async fn search_similar_messages(
        &self,
        owner_user_id: i64,
        kind: ConversationKind,
        embedding: &[f32],
        exclude_conversation_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<MessageSearchHit>>;

    async fn get_messages_before(&self, anchor: &Message, limit: u32) -> Result<Vec<Message>>;
    async fn get_messages_after(&self, anchor: &Message, limit: u32) -> Result<Vec<Message>>;
    async fn get_messages_between(&self, start: &Message, end: &Message) -> Result<Vec<Message>>;

    async fn count_messages(&self, kind: ConversationKind, conversation_id: i64) -> Result<u32>;

    /// The `limit` newest messages of a conversation, oldest first.
    async fn get_recent_messages(
        &self,
        kind: ConversationKind,
        conversation_id: i64,
        limit: u32,
    ) -> Result<Vec<Message>>;
    async fn get_first_message_at(
        &self,
        kind: ConversationKind,
        conversation_id: i64,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Messages lacking an embedding with id greater than `after_id`, by id.
    async fn get_messages_without_embedding(
        &self,
        after_id: i64,
        limit: u32,
    ) -> Result<Vec<Message>>;
}

/// Conversation summary cache. Every row is disposable.
#[async_trait]
pub trait SummaryStore: Send + Sync {
    async fn get_conversation_summary(
        &self,
        kind: ConversationKind,
        conversation_id: i64,
    ) -> Result<Option<ConversationSummary>>;
    async fn upsert_conversation_summary(
        &self,
        kind: ConversationKind,
        conversation_id: i64,
        summary_text: &str,
        message_count: u32,
    ) -> Result<()>;
    async fn clear_conversation_summaries(&self) -> Result<u64>;
}

// ---------------------------------------------------------------------------
// Unified backend supertrait
// ---------------------------------------------------------------------------

/// A complete database backend that combines all store traits plus lifecycle
/// operations.
#[async_trait]
pub trait DatabaseBackend: ConversationStore + MessageStore + SummaryStore {
    /// Sync with remote (e.g. Turso replication). No-op for local-only backends.
    async fn sync(&self) -> Result<()>;
}
