//! deployd-instances: live instance state for deployment readiness.
//!
//! The deployment updater only advances a deployment once every
//! instance of its new process is running. This crate defines the
//! reporter contract it queries and an HTTP implementation that talks to
//! the scheduler backend.
//!
//! # Components
//!
//! - **`reporter`**: `InstancesReporter` trait, `InstanceMap`, `ReporterError`
//! - **`backend`**: `HttpInstancesReporter` (hyper HTTP/1 client with timeout)

pub mod backend;
pub mod reporter;

pub use backend::HttpInstancesReporter;
pub use reporter::{
    InstanceMap, InstanceState, InstanceStatus, InstancesReporter, ReporterError, ReporterResult,
};
