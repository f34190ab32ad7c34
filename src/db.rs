//! SQLite connection and schema setup.

use crate::error::Result;
use anyhow::Context as _;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;

/// Database handle owning the SQLite pool.
#[derive(Debug, Clone)]
pub struct Db {
    pub pool: SqlitePool,
}

impl Db {
    /// Open (or create) the database at the given path and run schema setup.
    pub async fn connect(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open SQLite database at {}", path.display()))?;

        initialize(&pool).await?;

        Ok(Self { pool })
    }

    /// Close the pool, flushing outstanding writes.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Create the conversation tables if they don't exist.
pub async fn initialize(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            room_id TEXT NOT NULL,
            person_id TEXT NOT NULL,
            person_email TEXT,
            person_display_name TEXT,
            message_count INTEGER NOT NULL DEFAULT 0,
            max_messages INTEGER NOT NULL DEFAULT 20,
            is_active BOOLEAN NOT NULL DEFAULT 1,
            created_at TIMESTAMP NOT NULL,
            last_updated TIMESTAMP NOT NULL,
            last_message_at TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await
    .with_context(|| "failed to create conversations table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            message_id TEXT,
            created_at TIMESTAMP NOT NULL,
            FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE,
            UNIQUE(conversation_id, seq)
        )
        "#,
    )
    .execute(pool)
    .await
    .with_context(|| "failed to create conversation_messages table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_room_person \
         ON conversations(room_id, person_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_conversations_email ON conversations(person_email)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_person_updated \
         ON conversations(person_id, last_updated)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_messages_conversation \
         ON conversation_messages(conversation_id, seq)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
