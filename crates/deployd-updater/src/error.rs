//! Updater error types.

use thiserror::Error;

use deployd_state::StateError;

/// Errors that stop one deployment from being processed this cycle.
#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("app not found: {0}")]
    MissingApp(String),

    #[error("app {0} has no web process")]
    MissingWebProcess(String),

    #[error("process not found: {0}")]
    MissingProcess(String),

    #[error("deployment {0} has no webish process")]
    MissingWebishProcess(String),

    #[error("deployment {deployment} targets the app's current web process {process}")]
    WebishIsWebProcess { deployment: String, process: String },
}

pub type UpdateResult<T> = Result<T, UpdateError>;
