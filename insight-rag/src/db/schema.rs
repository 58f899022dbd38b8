use libsql::Connection;

use crate::error::Result;

pub async fn init_schema(conn: &Connection, embedding_dimensions: usize) -> Result<()> {
    conn.execute_batch(&format!(
        r#"
        -- Conversations, keyed by kind + id
        CREATE TABLE IF NOT EXISTS conversations (
            kind TEXT NOT NULL,
            id INTEGER NOT NULL,
            owner_user_id INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (kind, id)
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_owner ON conversations(owner_user_id);

        -- Messages of both conversation kinds with vector embedding
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_kind TEXT NOT NULL,
            conversation_id INTEGER NOT NULL,
            owner_user_id INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding F32_BLOB({embedding_dimensions}),
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_kind, conversation_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_messages_owner_kind
            ON messages(owner_user_id, conversation_kind);

        -- Conversation summary cache. Safe to truncate at any time.
        CREATE TABLE IF NOT EXISTS conversation_summaries (
            conversation_kind TEXT NOT NULL,
            conversation_id INTEGER NOT NULL,
            summary_text TEXT NOT NULL,
            message_count INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (conversation_kind, conversation_id)
        );
        "#
    ))
    .await?;

    create_vector_indexes(conn).await?;

    Ok(())
}

async fn create_vector_indexes(conn: &Connection) -> Result<()> {
    let message_index_exists: bool = conn
        .query(
            "SELECT 1 FROM sqlite_master WHERE type='index' AND name='messages_embedding_idx'",
            (),
        )
        .await?
        .next()
        .await?
        .is_some();

    if !message_index_exists {
        if let Err(e) = conn
            .execute(
                "CREATE INDEX IF NOT EXISTS messages_embedding_idx ON messages(libsql_vector_idx(embedding))",
                (),
            )
            .await
        {
            tracing::warn!("Vector index creation failed for messages (may already exist): {e}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    #[tokio::test]
    async fn test_schema_creates_tables_and_vector_column() {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        let conn = db.connect().unwrap();

        init_schema(&conn, 4).await.unwrap();

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('conversations', 'messages', 'conversation_summaries') ORDER BY name",
                (),
            )
            .await
            .unwrap();
        let mut tables = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            tables.push(row.get::<String>(0).unwrap());
        }
        assert_eq!(
            tables,
            vec!["conversation_summaries", "conversations", "messages"]
        );

        let column_type: String = conn
            .query(
                "SELECT type FROM pragma_table_info('messages') WHERE name = 'embedding'",
                (),
            )
            .await
            .unwrap()
            .next()
            .await
            .unwrap()
            .expect("embedding column should exist")
            .get(0)
            .unwrap();
        assert_eq!(column_type, "F32_BLOB(4)");
    }

    #[tokio::test]
    async fn test_schema_init_is_idempotent() {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        let conn = db.connect().unwrap();

        init_schema(&conn, 4).await.unwrap();
        init_schema(&conn, 4).await.unwrap();
    }
}
