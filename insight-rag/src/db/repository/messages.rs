use chrono::{DateTime, Utc};
use libsql::{params, Connection};

use crate::error::{RagError, Result};
use crate::models::{
    format_timestamp, parse_timestamp, ConversationKind, Message, MessageSearchHit, NewMessage,
};

const MESSAGE_COLUMNS: &str =
    "id, conversation_kind, conversation_id, owner_user_id, role, content, created_at";

pub struct MessageRepository;

impl MessageRepository {
    pub async fn append(conn: &Connection, new_message: &NewMessage) -> Result<Message> {
        let created_at = new_message.created_at.unwrap_or_else(Utc::now);

        let mut rows = conn
            .query(
                r#"
                INSERT INTO messages (
                    conversation_kind, conversation_id, owner_user_id, role, content, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                RETURNING id
                "#,
                params![
                    new_message.conversation_kind.as_str(),
                    new_message.conversation_id,
                    new_message.owner_user_id,
                    new_message.role.as_str(),
                    new_message.content.clone(),
                    format_timestamp(&created_at),
                ],
            )
            .await?;

        let id: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => return Err(RagError::Internal("INSERT returned no message id".into())),
        };

        Ok(Message {
            id,
            conversation_kind: new_message.conversation_kind,
            conversation_id: new_message.conversation_id,
            owner_user_id: new_message.owner_user_id,
            role: new_message.role,
            content: new_message.content.clone(),
            created_at,
        })
    }

    pub async fn update_embedding(conn: &Connection, id: i64, embedding: &[f32]) -> Result<()> {
        let embedding_json = serde_json::to_string(embedding)?;
        conn.execute(
            "UPDATE messages SET embedding = vector32(?2) WHERE id = ?1",
            params![id, embedding_json],
        )
        .await?;
        Ok(())
    }

    /// Nearest neighbours of `embedding` among one user's messages of one kind.
    ///
    /// Ties on distance go to the newer message.
    pub async fn search_similar(
        conn: &Connection,
        owner_user_id: i64,
        kind: ConversationKind,
        embedding: &[f32],
        exclude_conversation_id: Option<i64>,
        limit: u32,
    ) -> Result<Vec<MessageSearchHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let embedding_json = serde_json::to_string(embedding)?;
        let exclude_filter = if exclude_conversation_id.is_some() {
            "AND conversation_id != ?5"
        } else {
            ""
        };

        let query = format!(
            r#"
            SELECT {MESSAGE_COLUMNS},
                   vector_distance_cos(embedding, vector32(?1)) AS distance
            FROM messages
            WHERE embedding IS NOT NULL
              AND owner_user_id = ?2
              AND conversation_kind = ?3
              {exclude_filter}
            ORDER BY distance ASC, created_at DESC, id DESC
            LIMIT ?4
            "#
        );

        let mut rows = match exclude_conversation_id {
            Some(excluded) => {
                conn.query(
                    &query,
                    params![embedding_json, owner_user_id, kind.as_str(), limit, excluded],
                )
                .await?
            }
            None => {
                conn.query(
                    &query,
                    params![embedding_json, owner_user_id, kind.as_str(), limit],
                )
                .await?
            }
        };

        let mut hits = Vec::new();
        while let Some(row) = rows.next().await? {
            let distance: f64 = row.get(7)?;
            hits.push(MessageSearchHit {
                message: Self::row_to_message(&row)?,
                distance: distance as f32,
            });
        }
        Ok(hits)
    }

    /// Up to `limit` messages strictly earlier than `anchor`, oldest first.
    pub async fn before(conn: &Connection, anchor: &Message, limit: u32) -> Result<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut rows = conn
            .query(
                &format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE conversation_kind = ?1 AND conversation_id = ?2
                      AND (created_at < ?3 OR (created_at = ?3 AND id < ?4))
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?5
                    "#
                ),
                params![
                    anchor.conversation_kind.as_str(),
                    anchor.conversation_id,
                    format_timestamp(&anchor.created_at),
                    anchor.id,
                    limit,
                ],
            )
            .await?;

        let mut messages = Self::collect(&mut rows).await?;
        messages.reverse();
        Ok(messages)
    }

    /// Up to `limit` messages strictly later than `anchor`, oldest first.
    pub async fn after(conn: &Connection, anchor: &Message, limit: u32) -> Result<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut rows = conn
            .query(
                &format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE conversation_kind = ?1 AND conversation_id = ?2
                      AND (created_at > ?3 OR (created_at = ?3 AND id > ?4))
                    ORDER BY created_at ASC, id ASC
                    LIMIT ?5
                    "#
                ),
                params![
                    anchor.conversation_kind.as_str(),
                    anchor.conversation_id,
                    format_timestamp(&anchor.created_at),
                    anchor.id,
                    limit,
                ],
            )
            .await?;

        Self::collect(&mut rows).await
    }

    /// Every message strictly between `start` and `end` of the same conversation.
    pub async fn between(conn: &Connection, start: &Message, end: &Message) -> Result<Vec<Message>> {
        let mut rows = conn
            .query(
                &format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE conversation_kind = ?1 AND conversation_id = ?2
                      AND (created_at > ?3 OR (created_at = ?3 AND id > ?4))
                      AND (created_at < ?5 OR (created_at = ?5 AND id < ?6))
                    ORDER BY created_at ASC, id ASC
                    "#
                ),
                params![
                    start.conversation_kind.as_str(),
                    start.conversation_id,
                    format_timestamp(&start.created_at),
                    start.id,
                    format_timestamp(&end.created_at),
                    end.id,
                ],
            )
            .await?;

        Self::collect(&mut rows).await
    }

    pub async fn count(conn: &Connection, kind: ConversationKind, conversation_id: i64) -> Result<u32> {
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM messages WHERE conversation_kind = ?1 AND conversation_id = ?2",
                params![kind.as_str(), conversation_id],
            )
            .await?;

        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(count as u32)
    }

    /// The `limit` most recent messages, returned oldest first.
    pub async fn recent(
        conn: &Connection,
        kind: ConversationKind,
        conversation_id: i64,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let mut rows = conn
            .query(
                &format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE conversation_kind = ?1 AND conversation_id = ?2
                    ORDER BY created_at DESC, id DESC
                    LIMIT ?3
                    "#
                ),
                params![kind.as_str(), conversation_id, limit],
            )
            .await?;

        let mut messages = Self::collect(&mut rows).await?;
        messages.reverse();
        Ok(messages)
    }

    pub async fn first_created_at(
        conn: &Connection,
        kind: ConversationKind,
        conversation_id: i64,
    ) -> Result<Option<DateTime<Utc>>> {
        let mut rows = conn
            .query(
                r#"
                SELECT created_at FROM messages
                WHERE conversation_kind = ?1 AND conversation_id = ?2
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                "#,
                params![kind.as_str(), conversation_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(Self::parse_created_at(&raw)?))
            }
            None => Ok(None),
        }
    }

    /// Messages without an embedding and with an id above `after_id`, by id.
    pub async fn missing_embeddings(
        conn: &Connection,
        after_id: i64,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let mut rows = conn
            .query(
                &format!(
                    r#"
                    SELECT {MESSAGE_COLUMNS} FROM messages
                    WHERE embedding IS NULL AND id > ?1
                    ORDER BY id ASC
                    LIMIT ?2
                    "#
                ),
                params![after_id, limit],
            )
            .await?;

        Self::collect(&mut rows).await
    }

    async fn collect(rows: &mut libsql::Rows) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            messages.push(Self::row_to_message(&row)?);
        }
        Ok(messages)
    }

    fn parse_created_at(raw: &str) -> Result<DateTime<Utc>> {
        parse_timestamp(raw)
            .ok_or_else(|| RagError::Internal(format!("Invalid message timestamp: {raw}")))
    }

    pub(crate) fn row_to_message(row: &libsql::Row) -> Result<Message> {
        let kind: String = row.get(1)?;
        let role: String = row.get(4)?;
        let created_at: String = row.get(6)?;

        Ok(Message {
            id: row.get(0)?,
            conversation_kind: kind.parse().map_err(RagError::Internal)?,
            conversation_id: row.get(2)?,
            owner_user_id: row.get(3)?,
            role: role.parse().map_err(RagError::Internal)?,
            content: row.get(5)?,
            created_at: Self::parse_created_at(&created_at)?,
        })
    }
}
