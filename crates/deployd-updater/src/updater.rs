//! Deployment updater: one pass over every deploying deployment.
//!
//! Each pass looks at the app's current web process (`W` instances) and
//! the deployment's webish process. When every webish instance reports
//! `RUNNING` the deployment moves exactly one step:
//!
//! ```text
//! W > 1   old -1, new +1               (one transaction)
//! W == 1  old -> 0, stop other processes
//! W == 0  delete old, promote new to web, move routes,
//!         restart the stopped processes, DEPLOYED
//! ```
//!
//! Every mutation is conditional on the counts read while planning, so a
//! replica acting on stale data gets a conflict instead of double-stepping.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use deployd_instances::{InstancesReporter, ReporterError};
use deployd_state::{
    CutOver, Deployment, DeploymentState, Process, RetireLastInstance, ScaleStep, StateError,
    StateStore,
};

use crate::error::{UpdateError, UpdateResult};
use crate::outcome::{Action, CycleReport, Outcome, SkipReason};

/// Behaviour switches for the updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdaterOptions {
    /// Stop the app's non-web processes when the last old web instance is
    /// retired and start them again at cutover, on the new droplet.
    pub stop_non_web_processes: bool,
}

impl Default for UpdaterOptions {
    fn default() -> Self {
        Self {
            stop_non_web_processes: true,
        }
    }
}

/// Readiness of a deployment's webish process.
#[derive(Debug)]
enum Readiness {
    Ready,
    Held(SkipReason),
}

/// Advances rolling deployments one step at a time.
pub struct Updater {
    state: StateStore,
    reporter: Arc<dyn InstancesReporter>,
    options: UpdaterOptions,
}

/// Records read while planning one step.
struct Snapshot {
    old: Process,
    new: Process,
}

impl Updater {
    pub fn new(
        state: StateStore,
        reporter: Arc<dyn InstancesReporter>,
        options: UpdaterOptions,
    ) -> Self {
        Self {
            state,
            reporter,
            options,
        }
    }

    /// Run one pass over all deployments in the `DEPLOYING` state.
    ///
    /// A failure on one deployment is recorded in the report and does not
    /// stop the others. Only a failure to list deployments at all is
    /// returned as an error.
    pub async fn update(&self) -> UpdateResult<CycleReport> {
        info!("running deployment update");

        let deployments = self
            .state
            .list_deployments_in_state(DeploymentState::Deploying)?;

        let mut report = CycleReport::default();
        for deployment in deployments {
            let result = self.update_deployment(&deployment).await;
            match &result {
                Ok(Outcome::Skipped(reason)) => {
                    debug!(deployment = %deployment.guid, ?reason, "deployment held");
                }
                Ok(outcome) => {
                    info!(
                        deployment = %deployment.guid,
                        droplet = ?deployment.droplet_guid,
                        ?outcome,
                        "ran deployment update"
                    );
                }
                Err(e) => {
                    error!(deployment = %deployment.guid, error = %e, "deployment update failed");
                }
            }
            report.record(&deployment.guid, result);
        }

        debug!(
            deployments = report.deployments.len(),
            progressed = report.progressed(),
            skipped = report.skipped(),
            failed = report.failed(),
            "deployment update finished"
        );
        Ok(report)
    }

    async fn update_deployment(&self, deployment: &Deployment) -> UpdateResult<Outcome> {
        let snapshot = self.snapshot(deployment)?;

        if let Readiness::Held(reason) = self.ready_to_scale(deployment, &snapshot.new).await {
            return Ok(Outcome::Skipped(reason));
        }

        let applied = match Action::for_old_instances(snapshot.old.instances) {
            Action::Step => self
                .state
                .scale_step(&ScaleStep {
                    deployment_guid: deployment.guid.clone(),
                    old_process_guid: snapshot.old.guid.clone(),
                    new_process_guid: snapshot.new.guid.clone(),
                    expected_old_instances: snapshot.old.instances,
                    expected_new_instances: snapshot.new.instances,
                })
                .map(|counts| Outcome::Stepped {
                    old_instances: counts.old_instances,
                    new_instances: counts.new_instances,
                }),
            Action::RetireLastInstance => self
                .state
                .retire_last_instance(&RetireLastInstance {
                    deployment_guid: deployment.guid.clone(),
                    old_process_guid: snapshot.old.guid.clone(),
                    new_process_guid: snapshot.new.guid.clone(),
                    stop_non_web_processes: self.options.stop_non_web_processes,
                })
                .map(|stopped_processes| Outcome::RetiredLastInstance { stopped_processes }),
            Action::CutOver => self
                .state
                .cut_over(&CutOver {
                    deployment_guid: deployment.guid.clone(),
                    old_process_guid: snapshot.old.guid.clone(),
                    new_process_guid: snapshot.new.guid.clone(),
                })
                .map(|summary| Outcome::CutOver {
                    routes_moved: summary.routes_moved,
                    processes_restarted: summary.processes_restarted,
                }),
        };

        match applied {
            Ok(outcome) => Ok(outcome),
            Err(StateError::Conflict(msg)) => {
                warn!(deployment = %deployment.guid, reason = %msg, "deployment changed underneath update, skipping");
                Ok(Outcome::Skipped(SkipReason::Conflict(msg)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load the old web process and the webish process for a deployment.
    fn snapshot(&self, deployment: &Deployment) -> UpdateResult<Snapshot> {
        let app = self
            .state
            .get_app(&deployment.app_guid)?
            .ok_or_else(|| UpdateError::MissingApp(deployment.app_guid.clone()))?;
        let web_guid = app
            .web_process_guid
            .ok_or_else(|| UpdateError::MissingWebProcess(app.guid.clone()))?;
        let old = self
            .state
            .get_process(&web_guid)?
            .ok_or(UpdateError::MissingProcess(web_guid))?;

        let webish_guid = deployment
            .webish_process_guid
            .clone()
            .ok_or_else(|| UpdateError::MissingWebishProcess(deployment.guid.clone()))?;
        if webish_guid == old.guid {
            return Err(UpdateError::WebishIsWebProcess {
                deployment: deployment.guid.clone(),
                process: webish_guid,
            });
        }
        let new = self
            .state
            .get_process(&webish_guid)?
            .ok_or(UpdateError::MissingProcess(webish_guid))?;

        Ok(Snapshot { old, new })
    }

    /// Every reported instance of `process` must be `RUNNING`.
    ///
    /// An empty map counts as ready. A reporter failure holds the
    /// deployment for this cycle.
    async fn ready_to_scale(&self, deployment: &Deployment, process: &Process) -> Readiness {
        let instances = match self.reporter.all_instances_for_process(process).await {
            Ok(instances) => instances,
            Err(e) => {
                info!(
                    deployment = %deployment.guid,
                    process = %process.guid,
                    error = %e,
                    "skipping deployment update"
                );
                let reason = match e {
                    ReporterError::Unavailable(msg)
                    | ReporterError::InvalidResponse(msg)
                    | ReporterError::InvalidUrl(msg) => msg,
                };
                return Readiness::Held(SkipReason::InstancesUnavailable(reason));
            }
        };

        let total = instances.len();
        let running = instances.values().filter(|s| s.is_running()).count();
        if running == total {
            Readiness::Ready
        } else {
            debug!(
                deployment = %deployment.guid,
                process = %process.guid,
                running,
                total,
                "webish instances not all running"
            );
            Readiness::Held(SkipReason::InstancesNotRunning { running, total })
        }
    }
}
