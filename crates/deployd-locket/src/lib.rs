//! deployd-locket: cluster-wide leadership for the deployment updater.
//!
//! Several control plane replicas run the updater loop; a lock held in
//! the Locket service decides which one does the work.
//!
//! # Architecture
//!
//! ```text
//! LockClient
//!   ├── Background renewal task (every retry_interval)
//!   │   └── LockService::lock(LockRequest{key, owner, LOCK, ttl})
//!   │        ├── Ok            → acquired = true
//!   │        └── AlreadyHeld / transport error → acquired = false
//!   ├── lock_acquired()  → atomic read of the flag
//!   └── with_lock(body)  → run body iff the flag is set
//!
//! GrpcLockService (LockService impl)
//!   └── tonic channel, mTLS (CA bundle + client cert/key)
//! ```

pub mod client;
pub mod error;
pub mod proto;
pub mod service;
pub mod tls;

pub use client::{DEFAULT_LOCK_KEY, LockClient, LockSettings};
pub use error::{LockError, LockResult};
pub use service::{GrpcLockService, LockService};
pub use tls::LocketConfig;
