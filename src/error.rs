//! Top-level error types for Relaybot.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("template rendering failed: {0}")]
    Template(#[from] minijinja::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Conversation persistence errors.
///
/// `Unavailable` is the bounded-timeout case: the backing store did not answer
/// within the configured ceiling. `NotConnected` is the distinguishable
/// precondition failure (pool already closed), not just a slow dependency.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage unavailable: {context} timed out")]
    Unavailable { context: &'static str },

    #[error("storage not connected")]
    NotConnected,

    #[error("{context}: {source}")]
    Query {
        context: &'static str,
        source: sqlx::Error,
    },
}

/// Messaging-platform API errors.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("failed to fetch message {message_id}: {reason}")]
    Fetch { message_id: String, reason: String },

    #[error("failed to dispatch message to room {room_id}: {reason}")]
    Dispatch { room_id: String, reason: String },
}

/// Generative backend errors.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    RequestFailed(String),

    #[error("generation backend returned no content")]
    EmptyResponse,
}
