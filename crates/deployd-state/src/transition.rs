//! Conditional, single-transaction mutations that move a deployment forward.
//!
//! Each operation re-reads the records it touches inside one redb write
//! transaction and checks them against what the caller planned with
//! (expected instance counts, deployment still `DEPLOYING`, expected
//! webish process). Any mismatch returns [`StateError::Conflict`] and the
//! transaction is dropped, which aborts it: either every record changes
//! or none does. Because redb serializes write transactions, two control
//! plane replicas racing on the same plan cannot both apply it.

use redb::{ReadableTable, Table};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::store::{StateStore, decode, encode, map_err};
use crate::tables::*;
use crate::types::*;

type JsonRows<'txn> = Table<'txn, &'static str, &'static [u8]>;

/// Move one instance from the old web process to the webish process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleStep {
    pub deployment_guid: DeploymentGuid,
    pub old_process_guid: ProcessGuid,
    pub new_process_guid: ProcessGuid,
    pub expected_old_instances: u32,
    pub expected_new_instances: u32,
}

/// Instance counts after a committed [`ScaleStep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaledCounts {
    pub old_instances: u32,
    pub new_instances: u32,
}

/// Retire the last old web instance without growing the webish process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetireLastInstance {
    pub deployment_guid: DeploymentGuid,
    pub old_process_guid: ProcessGuid,
    pub new_process_guid: ProcessGuid,
    /// Also stop the app's other processes so they come back on the new droplet.
    pub stop_non_web_processes: bool,
}

/// Promote the webish process to be the app's web process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CutOver {
    pub deployment_guid: DeploymentGuid,
    pub old_process_guid: ProcessGuid,
    pub new_process_guid: ProcessGuid,
}

/// What a committed [`CutOver`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutOverSummary {
    pub routes_moved: u32,
    /// Processes stopped at retirement and started again here.
    pub processes_restarted: u32,
}

impl StateStore {
    /// Decrement the old process and increment the new one, atomically.
    pub fn scale_step(&self, step: &ScaleStep) -> StateResult<ScaledCounts> {
        distinct(&step.old_process_guid, &step.new_process_guid)?;
        if step.expected_old_instances == 0 {
            return Err(StateError::Conflict(format!(
                "process {} has no instances to move",
                step.old_process_guid
            )));
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let counts = {
            let deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut processes = txn.open_table(PROCESSES).map_err(map_err!(Table))?;

            check_deploying(&deployments, &step.deployment_guid, &step.new_process_guid)?;
            let mut old: Process = require(&processes, &step.old_process_guid)?;
            let mut new: Process = require(&processes, &step.new_process_guid)?;
            expect_instances(&old, step.expected_old_instances)?;
            expect_instances(&new, step.expected_new_instances)?;

            let now = epoch_secs();
            old.instances -= 1;
            old.updated_at = now;
            new.instances = new.instances.checked_add(1).ok_or_else(|| {
                StateError::Write(format!("instance count overflow on {}", new.guid))
            })?;
            new.updated_at = now;

            put(&mut processes, &old.guid, &old)?;
            put(&mut processes, &new.guid, &new)?;

            ScaledCounts {
                old_instances: old.instances,
                new_instances: new.instances,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;

        debug!(
            deployment = %step.deployment_guid,
            old = counts.old_instances,
            new = counts.new_instances,
            "scale step committed"
        );
        Ok(counts)
    }

    /// Scale the old process from 1 to 0. Returns the number of sibling
    /// processes stopped alongside it.
    pub fn retire_last_instance(&self, plan: &RetireLastInstance) -> StateResult<u32> {
        distinct(&plan.old_process_guid, &plan.new_process_guid)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let stopped = {
            let mut deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut processes = txn.open_table(PROCESSES).map_err(map_err!(Table))?;

            let mut deployment =
                check_deploying(&deployments, &plan.deployment_guid, &plan.new_process_guid)?;
            let mut old: Process = require(&processes, &plan.old_process_guid)?;
            expect_instances(&old, 1)?;

            let now = epoch_secs();
            old.instances = 0;
            old.updated_at = now;
            put(&mut processes, &old.guid, &old)?;

            let mut stopped = 0;
            if plan.stop_non_web_processes {
                let siblings: Vec<Process> = scan(&processes, |p: &Process| {
                    p.app_guid == deployment.app_guid
                        && p.guid != plan.old_process_guid
                        && p.guid != plan.new_process_guid
                        && p.state == ProcessState::Started
                })?;
                for mut sibling in siblings {
                    sibling.state = ProcessState::Stopped;
                    sibling.updated_at = now;
                    put(&mut processes, &sibling.guid, &sibling)?;
                    deployment.stopped_process_guids.push(sibling.guid);
                    stopped += 1;
                }
                deployment.updated_at = now;
                put(&mut deployments, &deployment.guid, &deployment)?;
            }
            stopped
        };
        txn.commit().map_err(map_err!(Transaction))?;

        debug!(deployment = %plan.deployment_guid, stopped, "last old instance retired");
        Ok(stopped)
    }

    /// Delete the old web process, promote the webish one, move routes and
    /// finish the deployment.
    pub fn cut_over(&self, plan: &CutOver) -> StateResult<CutOverSummary> {
        distinct(&plan.old_process_guid, &plan.new_process_guid)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let summary = {
            let mut deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut apps = txn.open_table(APPS).map_err(map_err!(Table))?;
            let mut processes = txn.open_table(PROCESSES).map_err(map_err!(Table))?;
            let mut routes = txn.open_table(ROUTE_MAPPINGS).map_err(map_err!(Table))?;

            let mut deployment =
                check_deploying(&deployments, &plan.deployment_guid, &plan.new_process_guid)?;
            let mut app: App = require(&apps, &deployment.app_guid)?;
            if app.web_process_guid.as_deref() != Some(plan.old_process_guid.as_str()) {
                return Err(StateError::Conflict(format!(
                    "app {} web process is {:?}, expected {}",
                    app.guid, app.web_process_guid, plan.old_process_guid
                )));
            }
            let old: Process = require(&processes, &plan.old_process_guid)?;
            expect_instances(&old, 0)?;
            let mut new: Process = require(&processes, &plan.new_process_guid)?;

            let now = epoch_secs();
            processes
                .remove(plan.old_process_guid.as_str())
                .map_err(map_err!(Write))?;

            new.process_type = WEB_PROCESS_TYPE.to_string();
            new.updated_at = now;
            put(&mut processes, &new.guid, &new)?;

            app.web_process_guid = Some(new.guid.clone());
            app.updated_at = now;
            put(&mut apps, &app.guid, &app)?;

            let mappings: Vec<RouteMapping> = scan(&routes, |m: &RouteMapping| {
                m.process_guid == plan.old_process_guid
            })?;
            let routes_moved = mappings.len() as u32;
            for mut mapping in mappings {
                mapping.process_guid = new.guid.clone();
                put(&mut routes, &mapping.guid, &mapping)?;
            }

            let mut processes_restarted = 0;
            for guid in std::mem::take(&mut deployment.stopped_process_guids) {
                let Some(mut sibling) = lookup::<Process>(&processes, &guid)? else {
                    continue;
                };
                if sibling.state == ProcessState::Stopped {
                    sibling.state = ProcessState::Started;
                    sibling.updated_at = now;
                    put(&mut processes, &sibling.guid, &sibling)?;
                    processes_restarted += 1;
                }
            }

            deployment.state = DeploymentState::Deployed;
            deployment.webish_process_guid = None;
            deployment.updated_at = now;
            put(&mut deployments, &deployment.guid, &deployment)?;

            CutOverSummary {
                routes_moved,
                processes_restarted,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;

        debug!(
            deployment = %plan.deployment_guid,
            routes_moved = summary.routes_moved,
            processes_restarted = summary.processes_restarted,
            "cutover committed"
        );
        Ok(summary)
    }
}

fn check_deploying(
    deployments: &JsonRows<'_>,
    guid: &str,
    webish_process_guid: &str,
) -> StateResult<Deployment> {
    let deployment: Deployment = require(deployments, guid)?;
    if deployment.state.is_terminal() {
        return Err(StateError::Conflict(format!(
            "deployment {guid} is {}",
            deployment.state
        )));
    }
    if deployment.webish_process_guid.as_deref() != Some(webish_process_guid) {
        return Err(StateError::Conflict(format!(
            "deployment {guid} no longer targets process {webish_process_guid}"
        )));
    }
    Ok(deployment)
}

fn expect_instances(process: &Process, expected: u32) -> StateResult<()> {
    if process.instances != expected {
        return Err(StateError::Conflict(format!(
            "process {} has {} instances, expected {expected}",
            process.guid, process.instances
        )));
    }
    Ok(())
}

/// The old and the new process must be different records.
fn distinct(old_process_guid: &str, new_process_guid: &str) -> StateResult<()> {
    if old_process_guid == new_process_guid {
        return Err(StateError::Conflict(format!(
            "process {old_process_guid} is both the web and the webish process"
        )));
    }
    Ok(())
}

fn lookup<T: DeserializeOwned>(table: &JsonRows<'_>, key: &str) -> StateResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => decode(guard.value()).map(Some),
        None => Ok(None),
    }
}

fn require<T: DeserializeOwned>(table: &JsonRows<'_>, key: &str) -> StateResult<T> {
    lookup(table, key)?.ok_or_else(|| StateError::NotFound(key.to_string()))
}

fn scan<T, F>(table: &JsonRows<'_>, mut keep: F) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    F: FnMut(&T) -> bool,
{
    let mut found = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        let record: T = decode(value.value())?;
        if keep(&record) {
            found.push(record);
        }
    }
    Ok(found)
}

fn put<T: Serialize>(table: &mut JsonRows<'_>, key: &str, record: &T) -> StateResult<()> {
    let value = encode(record)?;
    table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
    Ok(())
}
