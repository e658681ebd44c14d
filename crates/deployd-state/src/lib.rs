//! deployd-state: embedded state store for deployd.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for the records a rolling deployment moves through: apps,
//! processes, deployments and route mappings.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns,
//! keyed by guid. Plain CRUD lives in [`store`]; the multi-record,
//! compare-and-swap mutations that advance a deployment live in
//! [`transition`] and each run inside a single write transaction.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod transition;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use transition::{CutOver, CutOverSummary, RetireLastInstance, ScaleStep, ScaledCounts};
pub use types::*;
