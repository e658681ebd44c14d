//! Instance reporter contract.
//!
//! The updater asks a reporter for the live state of every instance
//! backing a process. Reporters must tell "the backend is down" apart
//! from a legitimately empty or partial map.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use deployd_state::Process;

/// Live state of a single instance as reported by the scheduler backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Running,
    Starting,
    Crashed,
    Down,
    Failing,
    /// Any state string this build does not recognise.
    #[serde(other)]
    Unknown,
}

/// Status record for one instance index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub state: InstanceState,
    /// Seconds since the instance started.
    pub uptime: u64,
    /// Unix timestamp of the last state change.
    pub since: u64,
}

impl InstanceStatus {
    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }
}

/// Instance index → status.
pub type InstanceMap = BTreeMap<u32, InstanceStatus>;

/// Result type alias for reporter queries.
pub type ReporterResult<T> = Result<T, ReporterError>;

/// Errors a reporter can return.
#[derive(Debug, Error)]
pub enum ReporterError {
    /// The backend could not be reached or refused to answer.
    #[error("instances unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with something that is not an instance map.
    #[error("invalid instances response: {0}")]
    InvalidResponse(String),

    /// The configured backend URL cannot be used.
    #[error("invalid instances reporter url: {0}")]
    InvalidUrl(String),
}

/// Source of live instance state for processes.
#[async_trait]
pub trait InstancesReporter: Send + Sync {
    /// Return the state of every instance backing `process`.
    async fn all_instances_for_process(&self, process: &Process) -> ReporterResult<InstanceMap>;
}

#[async_trait]
impl<T: InstancesReporter + ?Sized> InstancesReporter for Arc<T> {
    async fn all_instances_for_process(&self, process: &Process) -> ReporterResult<InstanceMap> {
        (**self).all_instances_for_process(process).await
    }
}
