use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversationKind, Message};

pub const DEFAULT_RESULT_LIMIT: u32 = 5;

/// A retrieval request for past-conversation context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagQuery {
    pub owner_user_id: i64,
    pub query: String,
    pub conversation_kind: ConversationKind,
    /// Conversation the user is currently in; its messages are never returned.
    pub current_conversation_id: Option<i64>,
    pub limit: u32,
}

impl RagQuery {
    pub fn new(owner_user_id: i64, query: impl Into<String>, kind: ConversationKind) -> Self {
        Self {
            owner_user_id,
            query: query.into(),
            conversation_kind: kind,
            current_conversation_id: None,
            limit: DEFAULT_RESULT_LIMIT,
        }
    }

    pub fn excluding(mut self, conversation_id: i64) -> Self {
        self.current_conversation_id = Some(conversation_id);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }
}

/// Messages immediately around a matched message, oldest first on both sides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SurroundingMessages {
    pub before: Vec<Message>,
    pub after: Vec<Message>,
}

/// Window around several matches from one conversation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedSurroundingMessages {
    pub before: Vec<Message>,
    /// All matches, chronological.
    pub matched: Vec<Message>,
    /// Non-matched messages strictly between the earliest and latest match.
    pub between: Vec<Message>,
    pub after: Vec<Message>,
}

/// One semantically matched message with its conversational context.
#[derive(Debug, Clone, PartialEq)]
pub struct EnhancedRagContext {
    pub conversation_id: i64,
    pub conversation_kind: ConversationKind,
    pub summary: String,
    pub matched_message: Message,
    pub messages_before: Vec<Message>,
    pub messages_after: Vec<Message>,
    /// Timestamp of the conversation's first message.
    pub conversation_date: DateTime<Utc>,
}

/// All matches from one conversation collapsed into a single excerpt.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRagContext {
    pub conversation_id: i64,
    pub conversation_kind: ConversationKind,
    pub summary: String,
    pub matched_messages: Vec<Message>,
    pub messages_before: Vec<Message>,
    pub messages_between: Vec<Message>,
    pub messages_after: Vec<Message>,
    pub conversation_date: DateTime<Utc>,
}

/// Outcome of an embedding backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub updated: u64,
    pub failed: u64,
}
