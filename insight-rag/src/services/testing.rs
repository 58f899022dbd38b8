//! Fakes and fixtures shared by the service tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::NamedTempFile;

use crate::config::DatabaseConfig;
use crate::db::{ConversationStore, Database, LibSqlBackend, MessageStore};
use crate::embeddings::Embedder;
use crate::error::{RagError, Result};
use crate::llm::Summarizer;
use crate::models::{ConversationKind, Message, NewMessage, Role};

pub const TEST_DIMENSIONS: usize = 3;

/// A file-backed store; the temp file must outlive the backend.
pub async fn test_store() -> (LibSqlBackend, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let config = DatabaseConfig {
        url: temp_file.path().to_string_lossy().into_owned(),
        auth_token: None,
        local_path: None,
        embedding_dimensions: TEST_DIMENSIONS,
    };
    let db = Database::new(&config).await.unwrap();
    (LibSqlBackend::new(db), temp_file)
}

pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 24, hour, minute, 0).unwrap()
}

/// Maps text onto one of three axes by keyword.
pub fn keyword_vector(text: &str) -> Vec<f32> {
    let text = text.to_lowercase();
    if text.contains("pray") {
        vec![1.0, 0.0, 0.0]
    } else if text.contains("faith") {
        vec![0.0, 1.0, 0.0]
    } else {
        vec![0.0, 0.0, 1.0]
    }
}

#[derive(Default)]
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(keyword_vector(query))
    }

    async fn embed_passages(&self, passages: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(passages.iter().map(|p| keyword_vector(p)).collect())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_query(&self, _query: &str) -> Result<Vec<f32>> {
        Err(RagError::Embedding("embedding service down".to_string()))
    }

    async fn embed_passages(&self, _passages: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Err(RagError::Embedding("embedding service down".to_string()))
    }
}

/// Summarizer returning a canned reply, optionally slow or failing.
pub struct FakeSummarizer {
    reply: Result<String>,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
    pub last_transcript: std::sync::Mutex<Option<String>>,
}

impl FakeSummarizer {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
            last_transcript: std::sync::Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: Err(RagError::LlmUnavailable("summarizer offline".to_string())),
            ..Self::replying("")
        }
    }

    pub fn slow(text: &str, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::replying(text)
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_transcript.lock().unwrap() = Some(transcript.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(e) => Err(RagError::Llm(e.to_string())),
        }
    }
}

/// Appends `lines` one minute apart starting at `start`, alternating
/// user/assistant, and embeds every message by keyword.
pub async fn seed_conversation(
    store: &LibSqlBackend,
    kind: ConversationKind,
    conversation_id: i64,
    owner_user_id: i64,
    start: DateTime<Utc>,
    lines: &[&str],
) -> Vec<Message> {
    store
        .ensure_conversation(kind, conversation_id, owner_user_id)
        .await
        .unwrap();

    let mut messages = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        let message = store
            .append_message(
                &NewMessage::new(kind, conversation_id, owner_user_id, role, *line)
                    .at(start + chrono::Duration::minutes(i as i64)),
            )
            .await
            .unwrap();
        store
            .update_message_embedding(message.id, &keyword_vector(line))
            .await
            .unwrap();
        messages.push(message);
    }
    messages
}
