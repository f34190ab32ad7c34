//! Conversation persistence (SQLite) with bounded retention.

use crate::config::ConversationConfig;
use crate::conversation::{Conversation, Role, StoredMessage};
use crate::error::StorageError;

use sqlx::{Row, SqlitePool};
use std::future::Future;

/// Store for conversation records and their retained messages.
///
/// Every operation runs under a timeout ceiling so a slow or unreachable
/// database surfaces as `StorageError::Unavailable` instead of stalling the
/// webhook pipeline.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
    config: ConversationConfig,
}

/// Input for creating a new conversation.
#[derive(Debug, Clone, Default)]
pub struct NewConversation {
    pub room_id: String,
    pub person_id: String,
    pub person_email: Option<String>,
    pub person_display_name: Option<String>,
}

const CONVERSATION_COLUMNS: &str = "id, room_id, person_id, person_email, person_display_name, \
     message_count, max_messages, is_active, created_at, last_updated, last_message_at";

impl ConversationStore {
    /// Create a new store over the given SQLite pool.
    pub fn new(pool: SqlitePool, config: ConversationConfig) -> Self {
        Self { pool, config }
    }

    /// Run a storage operation under the configured timeout ceiling.
    async fn bounded<T, F>(
        &self,
        context: &'static str,
        operation: F,
    ) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.config.storage_timeout, operation).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(sqlx::Error::PoolClosed)) => Err(StorageError::NotConnected),
            Ok(Err(source)) => Err(StorageError::Query { context, source }),
            Err(_elapsed) => Err(StorageError::Unavailable { context }),
        }
    }

    /// Create a new active conversation with no messages.
    pub async fn create(&self, input: NewConversation) -> Result<Conversation, StorageError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        let max_messages = self.config.max_messages;
        let pool = self.pool.clone();

        let conversation = Conversation {
            id: id.clone(),
            room_id: input.room_id,
            person_id: input.person_id,
            person_email: input.person_email,
            person_display_name: input.person_display_name,
            message_count: 0,
            max_messages,
            is_active: true,
            created_at: now,
            last_updated: now,
            last_message_at: None,
        };

        let record = conversation.clone();
        self.bounded("create conversation", async move {
            sqlx::query(
                "INSERT INTO conversations (id, room_id, person_id, person_email, \
                 person_display_name, message_count, max_messages, is_active, created_at, \
                 last_updated, last_message_at) \
                 VALUES (?, ?, ?, ?, ?, 0, ?, 1, ?, ?, NULL)",
            )
            .bind(&record.id)
            .bind(&record.room_id)
            .bind(&record.person_id)
            .bind(&record.person_email)
            .bind(&record.person_display_name)
            .bind(record.max_messages)
            .bind(record.created_at)
            .bind(record.last_updated)
            .execute(&pool)
            .await?;
            Ok(())
        })
        .await?;

        tracing::info!(conversation_id = %conversation.id, room_id = %conversation.room_id, "conversation created");
        Ok(conversation)
    }

    /// Load a conversation by id.
    pub async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>, StorageError> {
        let pool = self.pool.clone();
        let id = conversation_id.to_string();
        let query = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?");

        let row = self
            .bounded("load conversation", async move {
                sqlx::query(&query).bind(&id).fetch_optional(&pool).await
            })
            .await?;

        Ok(row.map(|row| row_to_conversation(&row)))
    }

    /// Find the most-recently-updated active conversation for (room, person).
    pub async fn find_by_room_and_person(
        &self,
        room_id: &str,
        person_id: &str,
    ) -> Result<Option<Conversation>, StorageError> {
        let pool = self.pool.clone();
        let room_id = room_id.to_string();
        let person_id = person_id.to_string();
        let query = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE room_id = ? AND person_id = ? AND is_active = 1 \
             ORDER BY last_updated DESC LIMIT 1"
        );

        let row = self
            .bounded("find conversation by room and person", async move {
                sqlx::query(&query)
                    .bind(&room_id)
                    .bind(&person_id)
                    .fetch_optional(&pool)
                    .await
            })
            .await?;

        Ok(row.map(|row| row_to_conversation(&row)))
    }

    /// Find the most-recently-updated active conversation by person email.
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Conversation>, StorageError> {
        let pool = self.pool.clone();
        let email = email.to_string();
        let query = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE person_email = ? AND is_active = 1 \
             ORDER BY last_updated DESC LIMIT 1"
        );

        let row = self
            .bounded("find conversation by email", async move {
                sqlx::query(&query).bind(&email).fetch_optional(&pool).await
            })
            .await?;

        Ok(row.map(|row| row_to_conversation(&row)))
    }

    /// Find the most-recently-updated active conversation for a person,
    /// restricted to those updated since `since`.
    pub async fn find_recent_by_person(
        &self,
        person_id: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<Conversation>, StorageError> {
        let pool = self.pool.clone();
        let person_id = person_id.to_string();
        let query = format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE person_id = ? AND last_updated >= ? AND is_active = 1 \
             ORDER BY last_updated DESC LIMIT 1"
        );

        let row = self
            .bounded("find recent conversation", async move {
                sqlx::query(&query)
                    .bind(&person_id)
                    .bind(since)
                    .fetch_optional(&pool)
                    .await
            })
            .await?;

        Ok(row.map(|row| row_to_conversation(&row)))
    }

    /// Point an existing conversation at a new (room, person) identity.
    pub async fn reassign_identity(
        &self,
        conversation_id: &str,
        room_id: &str,
        person_id: &str,
    ) -> Result<(), StorageError> {
        let pool = self.pool.clone();
        let id = conversation_id.to_string();
        let room_id = room_id.to_string();
        let person_id = person_id.to_string();

        self.bounded("reassign conversation identity", async move {
            sqlx::query("UPDATE conversations SET room_id = ?, person_id = ? WHERE id = ?")
                .bind(&room_id)
                .bind(&person_id)
                .bind(&id)
                .execute(&pool)
                .await?;
            Ok(())
        })
        .await
    }

    /// Point an existing conversation at a new room.
    pub async fn reassign_room(
        &self,
        conversation_id: &str,
        room_id: &str,
    ) -> Result<(), StorageError> {
        let pool = self.pool.clone();
        let id = conversation_id.to_string();
        let room_id = room_id.to_string();

        self.bounded("reassign conversation room", async move {
            sqlx::query("UPDATE conversations SET room_id = ? WHERE id = ?")
                .bind(&room_id)
                .bind(&id)
                .execute(&pool)
                .await?;
            Ok(())
        })
        .await
    }

    /// Append a message, bump the monotonic counter, and evict messages
    /// beyond the retention cap (oldest first).
    pub async fn append(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        message_id: Option<&str>,
    ) -> Result<Conversation, StorageError> {
        let pool = self.pool.clone();
        let id = conversation_id.to_string();
        let message_row_id = uuid::Uuid::new_v4().to_string();
        let role_str = role.to_string();
        let content = content.to_string();
        let message_id = message_id.map(String::from);
        let now = chrono::Utc::now();
        let select = format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?");

        self.bounded("append message", async move {
            let mut tx = pool.begin().await?;

            let row = sqlx::query(
                "SELECT message_count, max_messages FROM conversations WHERE id = ?",
            )
            .bind(&id)
            .fetch_one(&mut *tx)
            .await?;
            let count: i64 = row.try_get("message_count")?;
            let max_messages: i64 = row.try_get("max_messages")?;
            let seq = count + 1;

            sqlx::query(
                "INSERT INTO conversation_messages \
                 (id, conversation_id, seq, role, content, message_id, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&message_row_id)
            .bind(&id)
            .bind(seq)
            .bind(&role_str)
            .bind(&content)
            .bind(&message_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE conversations SET message_count = ?, last_updated = ?, last_message_at = ? \
                 WHERE id = ?",
            )
            .bind(seq)
            .bind(now)
            .bind(now)
            .bind(&id)
            .execute(&mut *tx)
            .await?;

            // FIFO eviction: keep only the most recent max_messages entries.
            sqlx::query("DELETE FROM conversation_messages WHERE conversation_id = ? AND seq <= ?")
                .bind(&id)
                .bind(seq - max_messages)
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;

            let row = sqlx::query(&select).bind(&id).fetch_one(&pool).await?;
            Ok(row_to_conversation(&row))
        })
        .await
    }

    /// Load the currently retained messages, oldest first.
    pub async fn recent_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let pool = self.pool.clone();
        let id = conversation_id.to_string();

        let rows = self
            .bounded("load retained messages", async move {
                sqlx::query(
                    "SELECT id, conversation_id, seq, role, content, message_id, created_at \
                     FROM conversation_messages WHERE conversation_id = ? ORDER BY seq ASC",
                )
                .bind(&id)
                .fetch_all(&pool)
                .await
            })
            .await?;

        Ok(rows.iter().map(row_to_message).collect())
    }

    /// Render the retained history as `role: content` lines, chronological.
    ///
    /// History beyond the retention window is gone for good; the downstream
    /// responder only ever sees a bounded context.
    pub async fn formatted_history(&self, conversation_id: &str) -> Result<String, StorageError> {
        let messages = self.recent_messages(conversation_id).await?;
        let lines: Vec<String> = messages
            .iter()
            .map(|message| format!("{}: {}", message.role, message.content))
            .collect();
        Ok(lines.join("\n"))
    }

    /// Mark active conversations idle for more than `days` as inactive.
    /// Returns the number of conversations affected. Matches only active
    /// rows, so repeated sweeps report zero instead of re-counting.
    pub async fn deactivate_older_than(&self, days: i64) -> Result<u64, StorageError> {
        let pool = self.pool.clone();
        let cutoff = chrono::Utc::now() - chrono::Duration::days(days);

        let affected = self
            .bounded("deactivate idle conversations", async move {
                let result =
                    sqlx::query("UPDATE conversations SET is_active = 0 WHERE is_active = 1 AND last_updated < ?")
                        .bind(cutoff)
                        .execute(&pool)
                        .await?;
                Ok(result.rows_affected())
            })
            .await?;

        if affected > 0 {
            tracing::info!(affected, "deactivated idle conversations");
        }
        Ok(affected)
    }
}

/// Helper: Convert a database row to a Conversation.
fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Conversation {
    Conversation {
        id: row.try_get("id").unwrap_or_default(),
        room_id: row.try_get("room_id").unwrap_or_default(),
        person_id: row.try_get("person_id").unwrap_or_default(),
        person_email: row.try_get("person_email").ok().flatten(),
        person_display_name: row.try_get("person_display_name").ok().flatten(),
        message_count: row.try_get("message_count").unwrap_or(0),
        max_messages: row.try_get("max_messages").unwrap_or(20),
        is_active: row.try_get("is_active").unwrap_or(true),
        created_at: row
            .try_get("created_at")
            .unwrap_or_else(|_| chrono::Utc::now()),
        last_updated: row
            .try_get("last_updated")
            .unwrap_or_else(|_| chrono::Utc::now()),
        last_message_at: row.try_get("last_message_at").ok().flatten(),
    }
}

/// Helper: Convert a database row to a StoredMessage.
fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> StoredMessage {
    let role_str: String = row.try_get("role").unwrap_or_default();
    StoredMessage {
        id: row.try_get("id").unwrap_or_default(),
        conversation_id: row.try_get("conversation_id").unwrap_or_default(),
        seq: row.try_get("seq").unwrap_or(0),
        role: parse_role(&role_str),
        content: row.try_get("content").unwrap_or_default(),
        message_id: row.try_get("message_id").ok().flatten(),
        created_at: row
            .try_get("created_at")
            .unwrap_or_else(|_| chrono::Utc::now()),
    }
}

/// Helper: Parse a role from its stored string form.
fn parse_role(s: &str) -> Role {
    match s {
        "assistant" => Role::Assistant,
        _ => Role::User,
    }
}
