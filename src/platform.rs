//! Messaging-platform REST client.

use crate::config::PlatformConfig;
use crate::error::PlatformError;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A fetched platform message. The webhook envelope only carries ids; the
/// text (and the sender email, when the envelope lacked it) comes from here.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformMessage {
    pub id: String,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub person_email: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Narrow interface to the messaging platform.
#[async_trait]
pub trait Platform: Send + Sync {
    /// Fetch the full content of a message by id.
    async fn fetch_message(&self, message_id: &str) -> Result<PlatformMessage, PlatformError>;

    /// Post a plain-text message to a room.
    async fn send_message(&self, room_id: &str, text: &str) -> Result<(), PlatformError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutboundMessage<'a> {
    room_id: &'a str,
    text: &'a str,
}

/// REST implementation over the platform HTTP API with bearer-token auth.
pub struct RestPlatform {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl RestPlatform {
    pub fn new(config: &PlatformConfig) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .with_context(|| "failed to build platform HTTP client")?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
        })
    }
}

#[async_trait]
impl Platform for RestPlatform {
    async fn fetch_message(&self, message_id: &str) -> Result<PlatformMessage, PlatformError> {
        let url = format!("{}/messages/{}", self.api_base, message_id);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.bot_token)
            .send()
            .await
            .map_err(|error| PlatformError::Fetch {
                message_id: message_id.to_string(),
                reason: error.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(PlatformError::Fetch {
                message_id: message_id.to_string(),
                reason: format!("platform returned {}", response.status()),
            });
        }

        response
            .json::<PlatformMessage>()
            .await
            .map_err(|error| PlatformError::Fetch {
                message_id: message_id.to_string(),
                reason: error.to_string(),
            })
    }

    async fn send_message(&self, room_id: &str, text: &str) -> Result<(), PlatformError> {
        let url = format!("{}/messages", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.bot_token)
            .json(&OutboundMessage { room_id, text })
            .send()
            .await
            .map_err(|error| PlatformError::Dispatch {
                room_id: room_id.to_string(),
                reason: error.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(PlatformError::Dispatch {
                room_id: room_id.to_string(),
                reason: format!("platform returned {}", response.status()),
            });
        }

        tracing::debug!(room_id, "message dispatched");
        Ok(())
    }
}
