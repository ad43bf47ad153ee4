//! Error types for the guard core

use thiserror::Error;

/// Result type alias for core operations
pub type GuardResult<T> = Result<T, GuardError>;

/// Errors surfaced by the core. None of these terminate the process; callers
/// reject, retry, count or degrade depending on the variant.
#[derive(Error, Debug)]
pub enum GuardError {
    /// Malformed wordlist, sanction schedule or agent config. The previous
    /// configuration stays authoritative.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Enforcement error: {0}")]
    Enforcement(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Admin action addressed to a machine with no live or persisted state.
    #[error("Unknown machine: {0}")]
    UnknownMachine(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

/// Admin authentication failures. Every `InvalidCredential` counts toward the lockout.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid admin credential")]
    InvalidCredential,

    #[error("authentication locked, retry in {remaining_secs}s")]
    LockedOut { remaining_secs: u64 },

    #[error("malformed stored credential: {0}")]
    MalformedCredential(String),
}

impl GuardError {
    pub fn config(msg: impl Into<String>) -> Self {
        GuardError::Config(msg.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, GuardError::Config(_))
    }
}

impl From<sled::Error> for GuardError {
    fn from(err: sled::Error) -> Self {
        GuardError::Storage(err.to_string())
    }
}

impl From<config::ConfigError> for GuardError {
    fn from(err: config::ConfigError) -> Self {
        GuardError::Config(err.to_string())
    }
}

impl From<regex::Error> for GuardError {
    fn from(err: regex::Error) -> Self {
        GuardError::Config(format!("pattern build failed: {}", err))
    }
}
