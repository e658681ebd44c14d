//! Periodic driver for the [`Updater`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use deployd_locket::LockClient;

use crate::outcome::CycleReport;
use crate::updater::Updater;

/// Runs `Updater::update` every `interval`, optionally only while this
/// replica holds the cluster lock.
pub struct Scheduler {
    updater: Updater,
    interval: Duration,
    lock: Option<Arc<LockClient>>,
}

impl Scheduler {
    /// Ungated scheduler: every cycle runs.
    pub fn new(updater: Updater, interval: Duration) -> Self {
        Self {
            updater,
            interval,
            lock: None,
        }
    }

    /// Gate every cycle on `lock`.
    pub fn with_lock(mut self, lock: Arc<LockClient>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Run a single cycle if allowed.
    ///
    /// Returns `None` when the lock is not held or listing deployments
    /// failed.
    pub async fn run_once(&self) -> Option<CycleReport> {
        match &self.lock {
            Some(lock) => match lock.with_lock(|| self.cycle()).await {
                Some(report) => report,
                None => {
                    debug!("deployment updater lock not held, skipping cycle");
                    None
                }
            },
            None => self.cycle().await,
        }
    }

    async fn cycle(&self) -> Option<CycleReport> {
        match self.updater.update().await {
            Ok(report) => Some(report),
            Err(e) => {
                error!(error = %e, "deployment update cycle failed");
                None
            }
        }
    }

    /// Run cycles until `shutdown` changes.
    ///
    /// A cycle that has started always runs to completion; shutdown only
    /// interrupts the sleep between cycles.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            gated = self.lock.is_some(),
            "deployment scheduler started"
        );

        loop {
            self.run_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => {
                    info!("deployment scheduler shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::updater::UpdaterOptions;
    use async_trait::async_trait;
    use deployd_instances::{InstanceMap, InstancesReporter, ReporterResult};
    use deployd_locket::proto::{LockRequest, ReleaseRequest};
    use deployd_locket::{LockError, LockResult, LockService, LockSettings};
    use deployd_state::{App, Deployment, Process, StateStore, WEB_PROCESS_TYPE};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct AllRunning;

    #[async_trait]
    impl InstancesReporter for AllRunning {
        async fn all_instances_for_process(
            &self,
            _process: &Process,
        ) -> ReporterResult<InstanceMap> {
            Ok(InstanceMap::new())
        }
    }

    /// Lock service whose answer is flipped by the test.
    struct SwitchLockService {
        grant: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LockService for SwitchLockService {
        async fn lock(&self, request: LockRequest) -> LockResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.grant.load(Ordering::SeqCst) {
                Ok(())
            } else {
                let owner = request.resource.map(|r| r.owner).unwrap_or_default();
                Err(LockError::AlreadyHeld(format!("not {owner}")))
            }
        }

        async fn release(&self, _request: ReleaseRequest) -> LockResult<()> {
            Ok(())
        }
    }

    fn seeded_store(old_instances: u32) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_app(&App::new("app-1", "checkout", Some("web-1")))
            .unwrap();
        store
            .put_process(&Process::new("web-1", "app-1", WEB_PROCESS_TYPE, old_instances))
            .unwrap();
        store
            .put_process(&Process::new("webish-1", "app-1", "web-deployment-d-1", 1))
            .unwrap();
        store
            .put_deployment(&Deployment::deploying("d-1", "app-1", "webish-1"))
            .unwrap();
        store
    }

    fn old_instances(store: &StateStore) -> u32 {
        store.get_process("web-1").unwrap().unwrap().instances
    }

    fn scheduler(store: &StateStore, interval: Duration) -> Scheduler {
        let updater = Updater::new(store.clone(), Arc::new(AllRunning), UpdaterOptions::default());
        Scheduler::new(updater, interval)
    }

    #[tokio::test]
    async fn ungated_run_once_always_updates() {
        let store = seeded_store(3);
        let scheduler = scheduler(&store, Duration::from_secs(5));

        let report = scheduler.run_once().await.unwrap();

        assert_eq!(report.progressed(), 1);
        assert_eq!(old_instances(&store), 2);
    }

    #[tokio::test]
    async fn gated_run_once_follows_lock() {
        let store = seeded_store(3);
        let service = Arc::new(SwitchLockService {
            grant: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        });
        let lock = Arc::new(LockClient::new(service.clone(), LockSettings::new("replica-0")));
        let scheduler = scheduler(&store, Duration::from_secs(5)).with_lock(lock.clone());

        assert!(!lock.try_acquire().await);
        assert!(scheduler.run_once().await.is_none());
        assert_eq!(old_instances(&store), 3);

        service.grant.store(true, Ordering::SeqCst);
        assert!(lock.try_acquire().await);
        assert!(scheduler.run_once().await.is_some());
        assert_eq!(old_instances(&store), 2);
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_loops_until_shutdown() {
        let store = seeded_store(4);
        let scheduler = Arc::new(scheduler(&store, Duration::from_millis(10)));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run(rx).await }
        });

        for _ in 0..200 {
            if old_instances(&store) <= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(old_instances(&store) <= 2);
    }
}
