//! Rolling deployment end-to-end tests.
//!
//! Drives the updater against a real redb store (on disk) and a scripted
//! instance reporter, from the first step through cutover.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use deployd_instances::{
    InstanceMap, InstanceState, InstanceStatus, InstancesReporter, ReporterError, ReporterResult,
};
use deployd_state::*;
use deployd_updater::{Outcome, SkipReason, Updater, UpdaterOptions};

/// Reports every instance of a process in the configured state.
#[derive(Default)]
struct ScriptedReporter {
    states: Mutex<HashMap<String, InstanceState>>,
    down: Mutex<bool>,
}

impl ScriptedReporter {
    fn set_state(&self, process_guid: &str, state: InstanceState) {
        self.states
            .lock()
            .unwrap()
            .insert(process_guid.to_string(), state);
    }

    fn set_down(&self, down: bool) {
        *self.down.lock().unwrap() = down;
    }
}

#[async_trait]
impl InstancesReporter for ScriptedReporter {
    async fn all_instances_for_process(&self, process: &Process) -> ReporterResult<InstanceMap> {
        if *self.down.lock().unwrap() {
            return Err(ReporterError::Unavailable("diego unreachable".to_string()));
        }
        let state = self
            .states
            .lock()
            .unwrap()
            .get(&process.guid)
            .copied()
            .unwrap_or(InstanceState::Running);
        Ok((0..process.instances)
            .map(|i| {
                (
                    i,
                    InstanceStatus {
                        state,
                        uptime: 60,
                        since: 1_700_000_000,
                    },
                )
            })
            .collect())
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    store: StateStore,
    reporter: Arc<ScriptedReporter>,
    updater: Updater,
}

/// App with web=3 and a worker, a deployment whose webish process was
/// created at 5 instances, and one route on the web process.
fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(&dir.path().join("deployd.redb")).unwrap();

    store
        .put_app(&App::new("app-1", "storefront", Some("web-old")))
        .unwrap();
    store
        .put_process(&Process::new("web-old", "app-1", WEB_PROCESS_TYPE, 3))
        .unwrap();
    store
        .put_process(&Process::new("worker-1", "app-1", "worker", 2))
        .unwrap();
    store
        .put_process(&Process::new("web-new", "app-1", "web-deployment-dep-1", 5))
        .unwrap();
    store
        .put_deployment(&Deployment::deploying("dep-1", "app-1", "web-new"))
        .unwrap();
    store
        .put_route_mapping(&RouteMapping::new(
            "rm-1",
            "app-1",
            "web-old",
            "storefront.example.com",
        ))
        .unwrap();

    let reporter = Arc::new(ScriptedReporter::default());
    let updater = Updater::new(store.clone(), reporter.clone(), UpdaterOptions::default());
    Fixture {
        dir,
        store,
        reporter,
        updater,
    }
}

fn instances(store: &StateStore, guid: &str) -> Option<u32> {
    store.get_process(guid).unwrap().map(|p| p.instances)
}

#[tokio::test]
async fn rolls_from_three_old_instances_to_cutover() {
    let f = fixture();

    let report = f.updater.update().await.unwrap();
    assert!(matches!(
        report.get("dep-1").unwrap(),
        Ok(Outcome::Stepped {
            old_instances: 2,
            new_instances: 6
        })
    ));

    f.updater.update().await.unwrap();
    assert_eq!(instances(&f.store, "web-old"), Some(1));
    assert_eq!(instances(&f.store, "web-new"), Some(7));

    let report = f.updater.update().await.unwrap();
    assert!(matches!(
        report.get("dep-1").unwrap(),
        Ok(Outcome::RetiredLastInstance {
            stopped_processes: 1
        })
    ));
    assert_eq!(instances(&f.store, "web-old"), Some(0));
    assert_eq!(instances(&f.store, "web-new"), Some(7));
    let worker = f.store.get_process("worker-1").unwrap().unwrap();
    assert_eq!(worker.state, ProcessState::Stopped);

    let report = f.updater.update().await.unwrap();
    assert!(matches!(
        report.get("dep-1").unwrap(),
        Ok(Outcome::CutOver {
            routes_moved: 1,
            processes_restarted: 1
        })
    ));
    let worker = f.store.get_process("worker-1").unwrap().unwrap();
    assert_eq!(worker.state, ProcessState::Started);

    assert_eq!(instances(&f.store, "web-old"), None);
    let web = f.store.get_process("web-new").unwrap().unwrap();
    assert_eq!(web.process_type, WEB_PROCESS_TYPE);
    assert_eq!(web.instances, 7);
    let app = f.store.get_app("app-1").unwrap().unwrap();
    assert_eq!(app.web_process_guid.as_deref(), Some("web-new"));
    assert!(f.store.list_route_mappings_for_process("web-old").unwrap().is_empty());
    assert_eq!(
        f.store.list_route_mappings_for_process("web-new").unwrap()[0].route,
        "storefront.example.com"
    );
    let deployment = f.store.get_deployment("dep-1").unwrap().unwrap();
    assert_eq!(deployment.state, DeploymentState::Deployed);

    // Finished deployments are left alone.
    let report = f.updater.update().await.unwrap();
    assert!(report.is_empty());
    assert_eq!(instances(&f.store, "web-new"), Some(7));
}

#[tokio::test]
async fn unready_instances_hold_the_rollout() {
    let f = fixture();
    f.reporter.set_state("web-new", InstanceState::Starting);

    for _ in 0..3 {
        let report = f.updater.update().await.unwrap();
        assert!(matches!(
            report.get("dep-1").unwrap(),
            Ok(Outcome::Skipped(SkipReason::InstancesNotRunning {
                running: 0,
                total: 5
            }))
        ));
    }
    assert_eq!(instances(&f.store, "web-old"), Some(3));
    assert_eq!(instances(&f.store, "web-new"), Some(5));

    f.reporter.set_state("web-new", InstanceState::Running);
    f.updater.update().await.unwrap();
    assert_eq!(instances(&f.store, "web-old"), Some(2));
}

#[tokio::test]
async fn reporter_outage_pauses_then_resumes() {
    let f = fixture();
    f.reporter.set_down(true);

    let report = f.updater.update().await.unwrap();
    assert!(matches!(
        report.get("dep-1").unwrap(),
        Ok(Outcome::Skipped(SkipReason::InstancesUnavailable(_)))
    ));
    assert_eq!(instances(&f.store, "web-old"), Some(3));

    f.reporter.set_down(false);
    f.updater.update().await.unwrap();
    assert_eq!(instances(&f.store, "web-old"), Some(2));
    assert_eq!(instances(&f.store, "web-new"), Some(6));
}

#[tokio::test]
async fn state_survives_reopening_the_store() {
    let f = fixture();
    f.updater.update().await.unwrap();
    let path = f.dir.path().join("deployd.redb");
    let Fixture {
        dir, updater, store, ..
    } = f;
    drop(updater);
    drop(store);

    let reopened = StateStore::open(&path).unwrap();
    assert_eq!(instances(&reopened, "web-old"), Some(2));
    assert_eq!(instances(&reopened, "web-new"), Some(6));
    drop(dir);
}
