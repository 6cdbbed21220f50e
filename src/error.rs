use thiserror::Error;
use uuid::Uuid;

use crate::models::ResourceKey;

/// Crate-wide error taxonomy.
///
/// Everything except [`Error::Database`] is recoverable by the caller:
/// `LockTimeout` is expected to be retried with backoff, `SessionNotFound`
/// and `AgentNotFound` are caller errors, and `InvalidInput` is an
/// immediately rejected malformed request. `Database` is a genuine
/// persistence-layer fault — fatal to the operation, and the caller may
/// choose to crash-restart (recovery reconciles on the next start).
#[derive(Debug, Error)]
pub enum Error {
    #[error("timed out waiting for lock on {0}")]
    LockTimeout(ResourceKey),

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("agent not found: {0}")]
    AgentNotFound(Uuid),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] anyhow::Error),
}

impl Error {
    /// Whether the caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout(_))
    }

    /// A clear, actionable message with no internal state detail, suitable
    /// for surfacing to a user.
    pub fn user_message(&self) -> String {
        match self {
            Self::LockTimeout(_) => "resource busy, retry later".to_string(),
            Self::SessionNotFound(_) => "session not found".to_string(),
            Self::AgentNotFound(_) => "agent not found".to_string(),
            Self::InvalidInput(reason) => reason.clone(),
            Self::Database(_) => "internal storage error".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
