//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use anyhow::Context as _;
use std::net::SocketAddr;
use std::time::Duration;

/// Relaybot configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path.
    pub data_dir: std::path::PathBuf,

    /// HTTP bind address for the webhook surface.
    pub bind: SocketAddr,

    /// Messaging-platform API configuration.
    pub platform: PlatformConfig,

    /// Generative backend configuration.
    pub llm: LlmConfig,

    /// Conversation retention settings.
    pub conversation: ConversationConfig,

    /// Background sweep settings.
    pub cleanup: CleanupConfig,

    /// Persona and organization context used in prompts.
    pub profile: OrgProfile,
}

/// Messaging-platform API configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Base URL of the platform REST API.
    pub api_base: String,

    /// Bearer token for the bot account.
    pub bot_token: String,

    /// Email of the bot account, used to skip the bot's own messages.
    pub bot_email: Option<String>,
}

/// Generative backend configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of the chat-completions API.
    pub api_base: String,

    /// API key for the backend.
    pub api_key: String,

    /// Model name.
    pub model: String,
}

/// Conversation retention configuration.
#[derive(Debug, Clone, Copy)]
pub struct ConversationConfig {
    /// Retained messages per conversation (oldest evicted first).
    pub max_messages: i64,

    /// Ceiling on every storage operation so a slow dependency cannot
    /// stall the pipeline.
    pub storage_timeout: Duration,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_messages: 20,
            storage_timeout: Duration::from_secs(5),
        }
    }
}

/// Background sweep configuration.
#[derive(Debug, Clone, Copy)]
pub struct CleanupConfig {
    /// Conversations idle longer than this many days are marked inactive.
    pub retention_days: i64,

    /// Interval between sweep runs.
    pub interval: Duration,

    /// Dedup key-set size that triggers a full clear.
    pub dedup_ceiling: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            interval: Duration::from_secs(3600),
            dedup_ceiling: 100,
        }
    }
}

/// Persona and organization context rendered into prompts.
#[derive(Debug, Clone)]
pub struct OrgProfile {
    /// Display name of the bot.
    pub bot_name: String,

    /// Organization the bot answers for.
    pub org_name: String,

    /// Short description of the organization.
    pub org_description: String,

    /// Contact for escalations and degraded-mode notices.
    pub support_email: String,
}

impl Default for OrgProfile {
    fn default() -> Self {
        Self {
            bot_name: "Relaybot".into(),
            org_name: "Support".into(),
            org_description: "An organization that values responsive support.".into(),
            support_email: "support@example.com".into(),
        }
    }
}

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var("RELAYBOT_DATA_DIR") {
            Ok(dir) => std::path::PathBuf::from(dir),
            Err(_) => dirs::data_dir()
                .map(|d| d.join("relaybot"))
                .unwrap_or_else(|| std::path::PathBuf::from("./data")),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

        let bind = std::env::var("RELAYBOT_BIND")
            .unwrap_or_else(|_| "0.0.0.0:3000".into())
            .parse()
            .map_err(|_| ConfigError::Invalid("RELAYBOT_BIND is not a socket address".into()))?;

        let platform = PlatformConfig {
            api_base: std::env::var("RELAYBOT_PLATFORM_API")
                .unwrap_or_else(|_| "https://webexapis.com/v1".into()),
            bot_token: std::env::var("RELAYBOT_PLATFORM_TOKEN")
                .map_err(|_| ConfigError::MissingKey("RELAYBOT_PLATFORM_TOKEN".into()))?,
            bot_email: std::env::var("RELAYBOT_BOT_EMAIL").ok(),
        };

        let llm = LlmConfig {
            api_base: std::env::var("RELAYBOT_LLM_API")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key: std::env::var("RELAYBOT_LLM_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .map_err(|_| ConfigError::MissingKey("RELAYBOT_LLM_KEY".into()))?,
            model: std::env::var("RELAYBOT_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
        };

        let mut conversation = ConversationConfig::default();
        if let Ok(value) = std::env::var("RELAYBOT_MAX_MESSAGES") {
            conversation.max_messages = positive_number(&value, "RELAYBOT_MAX_MESSAGES")?;
        }

        let mut cleanup = CleanupConfig::default();
        if let Ok(value) = std::env::var("RELAYBOT_RETENTION_DAYS") {
            cleanup.retention_days = positive_number(&value, "RELAYBOT_RETENTION_DAYS")?;
        }

        let defaults = OrgProfile::default();
        let profile = OrgProfile {
            bot_name: std::env::var("RELAYBOT_BOT_NAME").unwrap_or(defaults.bot_name),
            org_name: std::env::var("RELAYBOT_ORG_NAME").unwrap_or(defaults.org_name),
            org_description: std::env::var("RELAYBOT_ORG_DESCRIPTION")
                .unwrap_or(defaults.org_description),
            support_email: std::env::var("RELAYBOT_SUPPORT_EMAIL").unwrap_or(defaults.support_email),
        };

        Ok(Self {
            data_dir,
            bind,
            platform,
            llm,
            conversation,
            cleanup,
            profile,
        })
    }

    /// Get the SQLite database path.
    pub fn sqlite_path(&self) -> std::path::PathBuf {
        self.data_dir.join("relaybot.db")
    }
}

/// Parse a numeric override that must be at least 1. A zero message cap
/// would evict every retained message, including the one just appended.
fn positive_number(value: &str, key: &str) -> Result<i64> {
    let parsed: i64 = value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} must be a number")))?;
    if parsed < 1 {
        return Err(ConfigError::Invalid(format!("{key} must be at least 1")).into());
    }
    Ok(parsed)
}
