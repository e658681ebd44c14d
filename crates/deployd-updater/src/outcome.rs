//! Per-deployment outcomes and the report for one update cycle.

use crate::error::UpdateError;

/// Scaling action chosen from the old web process's instance count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// `W > 1`: move one instance from old to new.
    Step,
    /// `W == 1`: retire the last old instance; the new process is already
    /// at its target.
    RetireLastInstance,
    /// `W == 0`: promote the new process and finish the deployment.
    CutOver,
}

impl Action {
    pub fn for_old_instances(old_instances: u32) -> Self {
        match old_instances {
            0 => Action::CutOver,
            1 => Action::RetireLastInstance,
            _ => Action::Step,
        }
    }
}

/// What happened to one deployment during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Stepped {
        old_instances: u32,
        new_instances: u32,
    },
    RetiredLastInstance {
        stopped_processes: u32,
    },
    CutOver {
        routes_moved: u32,
        processes_restarted: u32,
    },
    Skipped(SkipReason),
}

impl Outcome {
    /// Whether the deployment moved forward.
    pub fn progressed(&self) -> bool {
        !matches!(self, Outcome::Skipped(_))
    }
}

/// Why a deployment was held this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The instance reporter could not answer.
    InstancesUnavailable(String),
    /// Some new-process instances are not `RUNNING` yet.
    InstancesNotRunning { running: usize, total: usize },
    /// The records changed between planning and committing, most likely
    /// because another replica advanced the deployment first.
    Conflict(String),
}

/// Result for a single deployment.
#[derive(Debug)]
pub struct DeploymentReport {
    pub deployment_guid: String,
    pub result: Result<Outcome, UpdateError>,
}

/// Everything one `Updater::update` call did.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub deployments: Vec<DeploymentReport>,
}

impl CycleReport {
    pub(crate) fn record(&mut self, deployment_guid: &str, result: Result<Outcome, UpdateError>) {
        self.deployments.push(DeploymentReport {
            deployment_guid: deployment_guid.to_string(),
            result,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
    }

    /// Look up the result for one deployment.
    pub fn get(&self, deployment_guid: &str) -> Option<&Result<Outcome, UpdateError>> {
        self.deployments
            .iter()
            .find(|r| r.deployment_guid == deployment_guid)
            .map(|r| &r.result)
    }

    pub fn progressed(&self) -> usize {
        self.deployments
            .iter()
            .filter(|r| matches!(&r.result, Ok(o) if o.progressed()))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.deployments
            .iter()
            .filter(|r| matches!(&r.result, Ok(Outcome::Skipped(_))))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.deployments.iter().filter(|r| r.result.is_err()).count()
    }
}
