//! Domain types for the deployd state store.
//!
//! These are the persisted records the deployment updater reads and
//! mutates: apps, their processes, in-flight deployments, and the route
//! mappings that follow the web process through a cutover. All types
//! are serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for an app.
pub type AppGuid = String;

/// Unique identifier for a process.
pub type ProcessGuid = String;

/// Unique identifier for a deployment.
pub type DeploymentGuid = String;

/// Process type label given to the canonical web process.
pub const WEB_PROCESS_TYPE: &str = "web";

// ── App ───────────────────────────────────────────────────────────

/// An application owning processes and at most one active deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    pub guid: AppGuid,
    pub name: String,
    /// The app's canonical web process. Cutover re-points this at the
    /// deployment's new process.
    pub web_process_guid: Option<ProcessGuid>,
    /// Unix timestamp (seconds) when this app was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) when this app was last updated.
    pub updated_at: u64,
}

// ── Process ───────────────────────────────────────────────────────

/// A group of identical instances belonging to an app.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Process {
    pub guid: ProcessGuid,
    pub app_guid: AppGuid,
    /// Free-form type label: `web`, `web-deployment-<id>`, `worker`, ...
    pub process_type: String,
    /// Desired instance count.
    pub instances: u32,
    pub state: ProcessState,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Desired run state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Started,
    Stopped,
}

// ── Deployment ────────────────────────────────────────────────────

/// A rolling deployment moving an app from its web process to a new one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub guid: DeploymentGuid,
    pub app_guid: AppGuid,
    pub state: DeploymentState,
    /// Droplet the new process runs, if known.
    pub droplet_guid: Option<String>,
    /// The new ("webish") process. Cleared at cutover.
    pub webish_process_guid: Option<ProcessGuid>,
    /// Non-web processes stopped when the last old instance was retired.
    /// They are started again at cutover.
    #[serde(default)]
    pub stopped_process_guids: Vec<ProcessGuid>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Lifecycle state of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentState {
    Deploying,
    Deployed,
    Canceled,
}

impl DeploymentState {
    /// Terminal states are never touched by the updater.
    pub fn is_terminal(self) -> bool {
        !matches!(self, DeploymentState::Deploying)
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeploymentState::Deploying => "DEPLOYING",
            DeploymentState::Deployed => "DEPLOYED",
            DeploymentState::Canceled => "CANCELED",
        };
        f.write_str(s)
    }
}

// ── Route mapping ─────────────────────────────────────────────────

/// Association of a route with the process that serves it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteMapping {
    pub guid: String,
    pub app_guid: AppGuid,
    pub process_guid: ProcessGuid,
    /// Route URL, e.g. `myapp.example.com/api`.
    pub route: String,
}

impl App {
    pub fn new(guid: &str, name: &str, web_process_guid: Option<&str>) -> Self {
        let now = epoch_secs();
        Self {
            guid: guid.to_string(),
            name: name.to_string(),
            web_process_guid: web_process_guid.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Process {
    /// A started process with the given instance count.
    pub fn new(guid: &str, app_guid: &str, process_type: &str, instances: u32) -> Self {
        let now = epoch_secs();
        Self {
            guid: guid.to_string(),
            app_guid: app_guid.to_string(),
            process_type: process_type.to_string(),
            instances,
            state: ProcessState::Started,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Deployment {
    /// A deployment in `DEPLOYING` state rolling onto `webish_process_guid`.
    pub fn deploying(guid: &str, app_guid: &str, webish_process_guid: &str) -> Self {
        let now = epoch_secs();
        Self {
            guid: guid.to_string(),
            app_guid: app_guid.to_string(),
            state: DeploymentState::Deploying,
            droplet_guid: None,
            webish_process_guid: Some(webish_process_guid.to_string()),
            stopped_process_guids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

impl RouteMapping {
    pub fn new(guid: &str, app_guid: &str, process_guid: &str, route: &str) -> Self {
        Self {
            guid: guid.to_string(),
            app_guid: app_guid.to_string(),
            process_guid: process_guid.to_string(),
            route: route.to_string(),
        }
    }
}

pub(crate) fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
