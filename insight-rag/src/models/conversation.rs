use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ConversationKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub kind: ConversationKind,
    pub id: i64,
    pub owner_user_id: i64,
    pub created_at: DateTime<Utc>,
}

/// Cached one-paragraph summary of a conversation.
///
/// Valid only while `message_count` equals the live message count of the
/// conversation it describes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummary {
    pub conversation_kind: ConversationKind,
    pub conversation_id: i64,
    pub summary_text: String,
    pub message_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSummary {
    pub fn is_valid_for(&self, live_count: u32) -> bool {
        self.message_count == live_count
    }
}
