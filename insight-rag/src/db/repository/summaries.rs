use chrono::Utc;
use libsql::{params, Connection};

use crate::error::{RagError, Result};
use crate::models::{format_timestamp, parse_timestamp, ConversationKind, ConversationSummary};

pub struct SummaryRepository;

impl SummaryRepository {
    pub async fn get(
        conn: &Connection,
        kind: ConversationKind,
        conversation_id: i64,
    ) -> Result<Option<ConversationSummary>> {
        let mut rows = conn
            .query(
                r#"
                SELECT conversation_kind, conversation_id, summary_text, message_count,
                       created_at, updated_at
                FROM conversation_summaries
                WHERE conversation_kind = ?1 AND conversation_id = ?2
                "#,
                params![kind.as_str(), conversation_id],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::row_to_summary(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Inserts or overwrites the cached summary. `created_at` survives overwrites.
    pub async fn upsert(
        conn: &Connection,
        kind: ConversationKind,
        conversation_id: i64,
        summary_text: &str,
        message_count: u32,
    ) -> Result<()> {
        let now = format_timestamp(&Utc::now());

        conn.execute(
            r#"
            INSERT INTO conversation_summaries (
                conversation_kind, conversation_id, summary_text, message_count,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            ON CONFLICT(conversation_kind, conversation_id) DO UPDATE SET
                summary_text = excluded.summary_text,
                message_count = excluded.message_count,
                updated_at = excluded.updated_at
            "#,
            params![kind.as_str(), conversation_id, summary_text, message_count, now],
        )
        .await?;

        Ok(())
    }

    pub async fn clear(conn: &Connection) -> Result<u64> {
        let affected = conn
            .execute("DELETE FROM conversation_summaries", ())
            .await?;
        Ok(affected)
    }

    fn row_to_summary(row: &libsql::Row) -> Result<ConversationSummary> {
        let kind: String = row.get(0)?;
        let message_count: i64 = row.get(3)?;
        let created_at: String = row.get(4)?;
        let updated_at: String = row.get(5)?;

        let parse = |raw: &str| {
            parse_timestamp(raw)
                .ok_or_else(|| RagError::Internal(format!("Invalid summary timestamp: {raw}")))
        };

        Ok(ConversationSummary {
            conversation_kind: kind.parse().map_err(RagError::Internal)?,
            conversation_id: row.get(1)?,
            summary_text: row.get(2)?,
            message_count: message_count as u32,
            created_at: parse(&created_at)?,
            updated_at: parse(&updated_at)?,
        })
    }
}
