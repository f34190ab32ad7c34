//! Conversation records and resolution.

pub mod resolver;
pub mod store;

pub use resolver::{ConversationResolver, EventIdentity};
pub use store::ConversationStore;

use serde::{Deserialize, Serialize};

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A persisted message. Immutable once appended.
#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    /// Position in the conversation's full history (1-based, never reused).
    pub seq: i64,
    pub role: Role,
    pub content: String,
    /// Platform message id, when the platform supplied one.
    pub message_id: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A durable per-identity conversation record.
///
/// `message_count` counts every message ever appended; eviction of old
/// messages never decrements it.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub room_id: String,
    pub person_id: String,
    pub person_email: Option<String>,
    pub person_display_name: Option<String>,
    pub message_count: i64,
    pub max_messages: i64,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub last_updated: chrono::DateTime<chrono::Utc>,
    pub last_message_at: Option<chrono::DateTime<chrono::Utc>>,
}
