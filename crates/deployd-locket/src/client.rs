//! Lock client: keeps this replica's belief about lock ownership fresh.
//!
//! A background task re-issues the lock request every `retry_interval`.
//! Each attempt's outcome overwrites the `acquired` flag; failures of any
//! kind (held elsewhere, transport errors) only clear the flag and never
//! end the loop.
//!
//! Ownership is advisory. `with_lock` checks the flag and then runs the
//! body, and the lock can expire in between, so protected work must be
//! safe to run twice.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::LockError;
use crate::proto::{LockRequest, ReleaseRequest, Resource, TypeCode};
use crate::service::LockService;

/// Resource key the deployment updater contends on.
pub const DEFAULT_LOCK_KEY: &str = "cc-deployment-updater";

/// What to lock and how often to renew it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSettings {
    pub key: String,
    /// Identity of this replica.
    pub owner: String,
    /// Expiry enforced by the lock service if renewals stop.
    pub ttl: Duration,
    /// Delay between acquisition attempts.
    pub retry_interval: Duration,
}

impl LockSettings {
    pub fn new(owner: &str) -> Self {
        Self {
            key: DEFAULT_LOCK_KEY.to_string(),
            owner: owner.to_string(),
            ttl: Duration::from_secs(15),
            retry_interval: Duration::from_secs(1),
        }
    }

    fn resource(&self) -> Resource {
        Resource {
            key: self.key.clone(),
            owner: self.owner.clone(),
            value: String::new(),
            type_code: TypeCode::Lock as i32,
        }
    }

    /// The acquire/renew request sent on every attempt.
    pub fn lock_request(&self) -> LockRequest {
        LockRequest {
            resource: Some(self.resource()),
            ttl_in_seconds: i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX),
        }
    }

    pub fn release_request(&self) -> ReleaseRequest {
        ReleaseRequest {
            resource: Some(self.resource()),
        }
    }
}

/// Handle to the running renewal task.
struct RenewalTask {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Maintains this replica's view of whether it holds the lock.
pub struct LockClient {
    service: Arc<dyn LockService>,
    settings: LockSettings,
    acquired: Arc<AtomicBool>,
    task: Mutex<Option<RenewalTask>>,
}

impl LockClient {
    pub fn new(service: Arc<dyn LockService>, settings: LockSettings) -> Self {
        Self {
            service,
            settings,
            acquired: Arc::new(AtomicBool::new(false)),
            task: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &LockSettings {
        &self.settings
    }

    /// Spawn the background acquisition loop. A second call while the
    /// loop is running does nothing.
    pub fn start(&self) {
        let Ok(mut slot) = self.task.lock() else {
            warn!("lock client state poisoned, not starting");
            return;
        };
        if slot.is_some() {
            debug!(key = %self.settings.key, "lock client already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let service = Arc::clone(&self.service);
        let acquired = Arc::clone(&self.acquired);
        let settings = self.settings.clone();

        let handle = tokio::spawn(async move {
            run_renewal_loop(service, settings, acquired, shutdown_rx).await;
        });

        *slot = Some(RenewalTask {
            handle,
            shutdown_tx,
        });
        info!(
            key = %self.settings.key,
            owner = %self.settings.owner,
            ttl_secs = self.settings.ttl.as_secs(),
            "lock client started"
        );
    }

    /// Stop the acquisition loop, wait for it to finish, and give the lock
    /// back if this replica believed it held it.
    pub async fn stop(&self) {
        let task = match self.task.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        let Some(task) = task else {
            return;
        };

        let _ = task.shutdown_tx.send(true);
        if let Err(e) = task.handle.await {
            warn!(error = %e, "lock renewal task ended abnormally");
        }

        if self.acquired.swap(false, Ordering::AcqRel) {
            match self.service.release(self.settings.release_request()).await {
                Ok(()) => info!(key = %self.settings.key, "lock released"),
                Err(e) => warn!(key = %self.settings.key, error = %e, "lock release failed"),
            }
        }
        info!(key = %self.settings.key, "lock client stopped");
    }

    /// Whether the most recent acquisition attempt succeeded.
    pub fn lock_acquired(&self) -> bool {
        self.acquired.load(Ordering::Acquire)
    }

    /// Make one acquisition attempt now and record its outcome.
    pub async fn try_acquire(&self) -> bool {
        attempt(self.service.as_ref(), &self.settings, &self.acquired).await
    }

    /// Run `body` if this replica currently believes it holds the lock.
    ///
    /// Returns `None` without running `body` otherwise.
    pub async fn with_lock<F, Fut, T>(&self, body: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self.lock_acquired() {
            Some(body().await)
        } else {
            None
        }
    }
}

async fn run_renewal_loop(
    service: Arc<dyn LockService>,
    settings: LockSettings,
    acquired: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        attempt(service.as_ref(), &settings, &acquired).await;

        tokio::select! {
            _ = tokio::time::sleep(settings.retry_interval) => {}
            _ = shutdown.changed() => {
                debug!(key = %settings.key, "lock renewal loop shutting down");
                break;
            }
        }
    }
}

/// One acquire/renew call. Only its outcome updates the flag.
async fn attempt(service: &dyn LockService, settings: &LockSettings, acquired: &AtomicBool) -> bool {
    match service.lock(settings.lock_request()).await {
        Ok(()) => {
            if !acquired.swap(true, Ordering::AcqRel) {
                info!(key = %settings.key, owner = %settings.owner, "lock acquired");
            }
            true
        }
        Err(e) => {
            if acquired.swap(false, Ordering::AcqRel) {
                warn!(key = %settings.key, error = %e, "lock lost");
            }
            match e {
                LockError::AlreadyHeld(_) => {
                    debug!(key = %settings.key, "lock held by another owner")
                }
                other => debug!(key = %settings.key, error = %other, "lock attempt failed"),
            }
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LockResult;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Lock service that answers from a script, repeating the last answer.
    struct ScriptedLockService {
        script: Mutex<VecDeque<bool>>,
        last: Mutex<bool>,
        lock_calls: AtomicUsize,
        releases: AtomicUsize,
        requests: Mutex<Vec<LockRequest>>,
    }

    impl ScriptedLockService {
        fn new(script: &[bool]) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.iter().copied().collect()),
                last: Mutex::new(false),
                lock_calls: AtomicUsize::new(0),
                releases: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LockService for ScriptedLockService {
        async fn lock(&self, request: LockRequest) -> LockResult<()> {
            self.lock_calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request);
            let granted = match self.script.lock().unwrap().pop_front() {
                Some(next) => {
                    *self.last.lock().unwrap() = next;
                    next
                }
                None => *self.last.lock().unwrap(),
            };
            if granted {
                Ok(())
            } else {
                Err(LockError::AlreadyHeld("lock-collision".to_string()))
            }
        }

        async fn release(&self, _request: ReleaseRequest) -> LockResult<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Always fails at the transport level.
    struct UnreachableLockService;

    #[async_trait]
    impl LockService for UnreachableLockService {
        async fn lock(&self, _request: LockRequest) -> LockResult<()> {
            Err(LockError::Transport("connection refused".to_string()))
        }

        async fn release(&self, _request: ReleaseRequest) -> LockResult<()> {
            Err(LockError::Transport("connection refused".to_string()))
        }
    }

    fn fast_settings() -> LockSettings {
        LockSettings {
            retry_interval: Duration::from_millis(10),
            ..LockSettings::new("replica-0")
        }
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn lock_request_shape() {
        let request = LockSettings::new("replica-0").lock_request();
        let resource = request.resource.unwrap();

        assert_eq!(resource.key, "cc-deployment-updater");
        assert_eq!(resource.owner, "replica-0");
        assert_eq!(resource.type_code(), TypeCode::Lock);
        assert_eq!(request.ttl_in_seconds, 15);
    }

    #[test]
    fn oversized_ttl_saturates_instead_of_wrapping() {
        let mut settings = LockSettings::new("replica-0");
        settings.ttl = Duration::from_secs(u64::MAX);

        assert_eq!(settings.lock_request().ttl_in_seconds, i64::MAX);
    }

    #[tokio::test]
    async fn flag_tracks_most_recent_attempt() {
        let service = ScriptedLockService::new(&[true, false, true, false]);
        let client = LockClient::new(service, fast_settings());

        assert!(!client.lock_acquired());
        assert!(client.try_acquire().await);
        assert!(client.lock_acquired());
        assert!(!client.try_acquire().await);
        assert!(!client.lock_acquired());
        assert!(client.try_acquire().await);
        assert!(client.lock_acquired());
        assert!(!client.try_acquire().await);
        assert!(!client.lock_acquired());
    }

    #[tokio::test]
    async fn with_lock_runs_body_only_when_last_attempt_succeeded() {
        let service = ScriptedLockService::new(&[true, false]);
        let client = LockClient::new(service, fast_settings());

        assert_eq!(client.with_lock(|| async { 1 }).await, None);

        client.try_acquire().await;
        assert_eq!(client.with_lock(|| async { 2 }).await, Some(2));

        client.try_acquire().await;
        assert_eq!(client.with_lock(|| async { 3 }).await, None);
    }

    #[tokio::test]
    async fn transport_errors_count_as_not_acquired() {
        let client = LockClient::new(Arc::new(UnreachableLockService), fast_settings());
        assert!(!client.try_acquire().await);
        assert!(!client.lock_acquired());
    }

    #[tokio::test]
    async fn start_attempts_immediately_and_keeps_renewing() {
        let service = ScriptedLockService::new(&[true]);
        let client = LockClient::new(service.clone(), fast_settings());

        client.start();
        wait_for(|| client.lock_acquired()).await;
        wait_for(|| service.lock_calls.load(Ordering::SeqCst) >= 3).await;

        let requests = service.requests.lock().unwrap().clone();
        assert!(requests.iter().all(|r| *r == fast_settings().lock_request()));

        client.stop().await;
    }

    #[tokio::test]
    async fn stop_joins_loop_and_releases_held_lock() {
        let service = ScriptedLockService::new(&[true]);
        let client = LockClient::new(service.clone(), fast_settings());

        client.start();
        wait_for(|| client.lock_acquired()).await;
        client.stop().await;

        assert!(!client.lock_acquired());
        assert_eq!(service.releases.load(Ordering::SeqCst), 1);

        // No more attempts once stopped.
        let calls = service.lock_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(service.lock_calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn stop_without_lock_skips_release() {
        let service = ScriptedLockService::new(&[false]);
        let client = LockClient::new(service.clone(), fast_settings());

        client.start();
        wait_for(|| service.lock_calls.load(Ordering::SeqCst) >= 2).await;
        client.stop().await;

        assert_eq!(service.releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn loop_survives_unreachable_service() {
        let client = LockClient::new(Arc::new(UnreachableLockService), fast_settings());

        client.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!client.lock_acquired());
        client.stop().await;
    }

    #[tokio::test]
    async fn start_twice_is_a_no_op() {
        let service = ScriptedLockService::new(&[true]);
        let client = LockClient::new(service, fast_settings());

        client.start();
        client.start();
        wait_for(|| client.lock_acquired()).await;
        client.stop().await;
        // Stopping again after the task is gone is fine too.
        client.stop().await;
    }
}
