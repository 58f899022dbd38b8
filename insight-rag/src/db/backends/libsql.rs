use crate::db::connection::Database;
use crate::db::repository::{ConversationRepository, MessageRepository, SummaryRepository};
use crate::db::traits::{ConversationStore, DatabaseBackend, MessageStore, SummaryStore};
use crate::error::Result;
use crate::models::{
    Conversation, ConversationKind, ConversationSummary, Message, MessageSearchHit, NewMessage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub struct LibSqlBackend {
    db: Database,
}

impl LibSqlBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ConversationStore for LibSqlBackend {
    async fn ensure_conversation(
        &self,
        kind: ConversationKind,
        id: i64,
        owner_user_id: i64,
    ) -> Result<Conversation> {
        let conn = self.db.connect()?;
        ConversationRepository::ensure(&conn, kind, id, owner_user_id, Utc::now()).await
    }
    async fn get_conversation(
        &self,
        kind: ConversationKind,
        id: i64,
    ) -> Result<Option<Conversation>> {
        let conn = self.db.connect()?;
        ConversationRepository::get(&conn, kind, id).await
    }
    async fn delete_conversation(
        &self,
        kind: ConversationKind,
        id: i64,
        owner_user_id: i64,
    ) -> Result<bool> {
        let conn = self.db.connect()?;
        ConversationRepository::delete(&conn, kind, id, owner_user_id).await
    }
}

#[async_trait]
impl MessageStore for LibSqlBackend {
    async fn append_message(&self, message: &NewMessage) -> Result<Message> {
        let conn = self.db.connect()?;
        MessageRepository::append(&conn, message).await
    }
    async fn update_message_embedding(&self, id: i64, embedding: &[f32]) -> Result<()> {
        let conn = self.db.connect()?;
        MessageRepository::update_embedding(&conn, id, embedding).await
    }
    async fn search_similar_messages(
        &self,
        owner_user_id: i64,
        kind: ConversationKind,
        embedding: &[f32],
        exclude_conversation_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<MessageSearchHit>> {
        let conn = self.db.connect()?;
        MessageRepository::search_similar(
            &conn,
            owner_user_id,
            kind,
            embedding,
            exclude_conversation_id,
            limit,
        )
        .await
    }
    async fn get_messages_before(&self, anchor: &Message, limit: u32) -> Result<Vec<Message>> {
        let conn = self.db.connect()?;
        MessageRepository::before(&conn, anchor, limit).await
    }
    async fn get_messages_after(&self, anchor: &Message, limit: u32) -> Result<Vec<Message>> {
        let conn = self.db.connect()?;
        MessageRepository::after(&conn, anchor, limit).await
    }
    async fn get_messages_between(&self, start: &Message, end: &Message) -> Result<Vec<Message>> {
        let conn = self.db.connect()?;
        MessageRepository::between(&conn, start, end).await
    }
    async fn count_messages(&self, kind: ConversationKind, conversation_id: i64) -> Result<u32> {
        let conn = self.db.connect()?;
        MessageRepository::count(&conn, kind, conversation_id).await
    }
    async fn get_recent_messages(
        &self,
        kind: ConversationKind,
        conversation_id: i64,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let conn = self.db.connect()?;
        MessageRepository::recent(&conn, kind, conversation_id, limit).await
    }
    async fn get_first_message_at(
        &self,
        kind: ConversationKind,
        conversation_id: i64,
    ) -> Result<Option<DateTime<Utc>>> {
        let conn = self.db.connect()?;
        MessageRepository::first_created_at(&conn, kind, conversation_id).await
    }
    async fn get_messages_without_embedding(
        &self,
        after_id: i64,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let conn = self.db.connect()?;
        MessageRepository::missing_embeddings(&conn, after_id, limit).await
    }
}

#[async_trait]
impl SummaryStore for LibSqlBackend {
    async fn get_conversation_summary(
        &self,
        kind: ConversationKind,
        conversation_id: i64,
    ) -> Result<Option<ConversationSummary>> {
        let conn = self.db.connect()?;
        SummaryRepository::get(&conn, kind, conversation_id).await
    }
    async fn upsert_conversation_summary(
        &self,
        kind: ConversationKind,
        conversation_id: i64,
        summary_text: &str,
        message_count: u32,
    ) -> Result<()> {
        let conn = self.db.connect()?;
        SummaryRepository::upsert(&conn, kind, conversation_id, summary_text, message_count).await
    }
    async fn clear_conversation_summaries(&self) -> Result<u64> {
        let conn = self.db.connect()?;
        SummaryRepository::clear(&conn).await
    }
}

#[async_trait]
impl DatabaseBackend for LibSqlBackend {
    async fn sync(&self) -> Result<()> {
        self.db.sync().await
    }
}
