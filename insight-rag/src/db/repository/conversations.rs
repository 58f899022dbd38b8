use chrono::{DateTime, Utc};
use libsql::{params, Connection};

use crate::error::{RagError, Result};
use crate::models::{format_timestamp, parse_timestamp, Conversation, ConversationKind};

pub struct ConversationRepository;

impl ConversationRepository {
    /// Returns the conversation, creating it for `owner_user_id` if absent.
    ///
    /// Fails with `Validation` when the conversation belongs to someone else.
    pub async fn ensure(
        conn: &Connection,
        kind: ConversationKind,
        id: i64,
        owner_user_id: i64,
        created_at: DateTime<Utc>,
    ) -> Result<Conversation> {
        conn.execute(
            r#"
            INSERT INTO conversations (kind, id, owner_user_id, created_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(kind, id) DO NOTHING
            "#,
            params![kind.as_str(), id, owner_user_id, format_timestamp(&created_at)],
        )
        .await?;

        let conversation = Self::get(conn, kind, id).await?.ok_or_else(|| {
            RagError::Internal(format!("Conversation {kind}/{id} vanished after insert"))
        })?;

        if conversation.owner_user_id != owner_user_id {
            return Err(RagError::Validation(format!(
                "Conversation {kind}/{id} belongs to another user"
            )));
        }

        Ok(conversation)
    }

    pub async fn get(
        conn: &Connection,
        kind: ConversationKind,
        id: i64,
    ) -> Result<Option<Conversation>> {
        let mut rows = conn
            .query(
                "SELECT kind, id, owner_user_id, created_at FROM conversations WHERE kind = ?1 AND id = ?2",
                params![kind.as_str(), id],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::row_to_conversation(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Deletes the conversation with its messages and cached summary.
    ///
    /// Nothing is deleted unless `owner_user_id` owns the conversation.
    pub async fn delete(
        conn: &Connection,
        kind: ConversationKind,
        id: i64,
        owner_user_id: i64,
    ) -> Result<bool> {
        let tx = conn.transaction().await?;

        let owned = tx
            .query(
                "SELECT 1 FROM conversations WHERE kind = ?1 AND id = ?2 AND owner_user_id = ?3",
                params![kind.as_str(), id, owner_user_id],
            )
            .await?
            .next()
            .await?
            .is_some();

        if !owned {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.execute(
            "DELETE FROM conversation_summaries WHERE conversation_kind = ?1 AND conversation_id = ?2",
            params![kind.as_str(), id],
        )
        .await?;
        let removed_messages = tx
            .execute(
                "DELETE FROM messages WHERE conversation_kind = ?1 AND conversation_id = ?2",
                params![kind.as_str(), id],
            )
            .await?;
        tx.execute(
            "DELETE FROM conversations WHERE kind = ?1 AND id = ?2",
            params![kind.as_str(), id],
        )
        .await?;

        tx.commit().await?;

        tracing::debug!(
            conversation_kind = %kind,
            conversation_id = id,
            removed_messages,
            "Deleted conversation"
        );
        Ok(true)
    }

    fn row_to_conversation(row: &libsql::Row) -> Result<Conversation> {
        let kind: String = row.get(0)?;
        let created_at: String = row.get(3)?;

        Ok(Conversation {
            kind: kind.parse().map_err(RagError::Internal)?,
            id: row.get(1)?,
            owner_user_id: row.get(2)?,
            created_at: parse_timestamp(&created_at).ok_or_else(|| {
                RagError::Internal(format!("Invalid conversation timestamp: {created_at}"))
            })?,
        })
    }
}
