//! Error types for the enforcement surface

use guard_core::GuardError;
use thiserror::Error;

pub type SentinelResult<T> = Result<T, SentinelError>;

/// Enforcement faults degrade the surface (overlay-only, warning-only); they are
/// logged and never stop the agent.
#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("Input hook install failed: {0}")]
    HookInstall(String),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Denied: {0}")]
    Denied(String),

    #[error("Enforcement worker is gone")]
    PumpGone,
}

impl From<SentinelError> for GuardError {
    fn from(err: SentinelError) -> Self {
        GuardError::Enforcement(err.to_string())
    }
}
