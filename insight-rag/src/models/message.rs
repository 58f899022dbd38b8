use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationKind, Role};

/// A single chat message. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: i64,
    pub conversation_kind: ConversationKind,
    pub conversation_id: i64,
    pub owner_user_id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Input for appending a message to a conversation.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_kind: ConversationKind,
    pub conversation_id: i64,
    pub owner_user_id: i64,
    pub role: Role,
    pub content: String,
    /// Defaults to the insertion time.
    pub created_at: Option<DateTime<Utc>>,
}

impl NewMessage {
    pub fn new(
        conversation_kind: ConversationKind,
        conversation_id: i64,
        owner_user_id: i64,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            conversation_kind,
            conversation_id,
            owner_user_id,
            role,
            content: content.into(),
            created_at: None,
        }
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

/// A message returned by vector search together with its cosine distance.
#[derive(Debug, Clone)]
pub struct MessageSearchHit {
    pub message: Message,
    pub distance: f32,
}

/// Storage form for message timestamps.
///
/// Fixed-width UTC with microseconds, so string comparison in SQL matches
/// chronological order.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
