//! Relaybot: a webhook-driven chat relay with bounded conversation memory.
//!
//! Inbound platform events arrive over HTTP, are matched to a durable
//! conversation record, answered through a generative backend, and the reply
//! is posted back to the originating room. Sustained backend failures move
//! the whole service into a degraded maintenance mode until a recovery
//! signal arrives.

pub mod api;
pub mod cleanup;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod health;
pub mod llm;
pub mod platform;
pub mod prompts;
pub mod relay;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Platform webhook envelope. Only message-created events carry `data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub data: Option<MessageEvent>,
}

/// Inbound message-notification event.
///
/// The envelope only identifies the message; the text itself is fetched
/// separately through the platform API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    pub id: String,
    pub room_id: String,
    pub person_id: String,
    #[serde(default)]
    pub person_email: Option<String>,
    #[serde(default)]
    pub person_display_name: Option<String>,
}
