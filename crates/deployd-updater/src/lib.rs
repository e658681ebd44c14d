//! deployd-updater: rolling deployment state machine.
//!
//! A deployment replaces an app's web process with a new "webish"
//! process one instance at a time. Each cycle the updater checks that
//! every webish instance is running, then moves a single instance from
//! the old process to the new one. Once the old process is empty the new
//! one is promoted to be the app's web process and the deployment is
//! marked `DEPLOYED`.
//!
//! # Components
//!
//! - **`updater`**: `Updater` (one pass over deploying deployments)
//! - **`outcome`**: `Action`, `Outcome`, `SkipReason`, `CycleReport`
//! - **`scheduler`**: `Scheduler` (interval loop, optional lock gate)
//! - **`error`**: `UpdateError`

pub mod error;
pub mod outcome;
pub mod scheduler;
pub mod updater;

pub use error::{UpdateError, UpdateResult};
pub use outcome::{Action, CycleReport, DeploymentReport, Outcome, SkipReason};
pub use scheduler::Scheduler;
pub use updater::{Updater, UpdaterOptions};
