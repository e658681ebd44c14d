//! Lock client error types.

use thiserror::Error;

/// Result type alias for lock operations.
pub type LockResult<T> = Result<T, LockError>;

/// Errors returned by a lock service or while configuring one.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another owner currently holds the resource.
    #[error("lock already held: {0}")]
    AlreadyHeld(String),

    /// The lock service could not be reached or failed the call.
    #[error("lock service transport error: {0}")]
    Transport(String),

    /// TLS material or endpoint configuration is unusable.
    #[error("lock client configuration error: {0}")]
    Config(String),
}

impl From<tonic::Status> for LockError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::AlreadyExists => LockError::AlreadyHeld(status.message().to_string()),
            code => LockError::Transport(format!("{code:?}: {}", status.message())),
        }
    }
}
