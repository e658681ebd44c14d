//! StateStore: redb-backed persistence for deployd.
//!
//! Provides typed CRUD operations over apps, processes, deployments and
//! route mappings. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).
//!
//! The conditional multi-record mutations the updater relies on live in
//! [`crate::transition`].

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::StateResult;
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::StateError::$variant(e.to_string())
    };
}
pub(crate) use map_err;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    pub(crate) db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(APPS).map_err(map_err!(Table))?;
        txn.open_table(PROCESSES).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(ROUTE_MAPPINGS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Apps ───────────────────────────────────────────────────────

    /// Insert or update an app.
    pub fn put_app(&self, app: &App) -> StateResult<()> {
        self.put_record(APPS, &app.guid, app)
    }

    /// Get an app by guid.
    pub fn get_app(&self, guid: &str) -> StateResult<Option<App>> {
        self.get_record(APPS, guid)
    }

    // ── Processes ──────────────────────────────────────────────────

    /// Insert or update a process.
    pub fn put_process(&self, process: &Process) -> StateResult<()> {
        self.put_record(PROCESSES, &process.guid, process)
    }

    /// Get a process by guid.
    pub fn get_process(&self, guid: &str) -> StateResult<Option<Process>> {
        self.get_record(PROCESSES, guid)
    }

    /// Delete a process by guid. Returns true if it existed.
    pub fn delete_process(&self, guid: &str) -> StateResult<bool> {
        self.delete_record(PROCESSES, guid)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or update a deployment.
    pub fn put_deployment(&self, deployment: &Deployment) -> StateResult<()> {
        self.put_record(DEPLOYMENTS, &deployment.guid, deployment)
    }

    /// Get a deployment by guid.
    pub fn get_deployment(&self, guid: &str) -> StateResult<Option<Deployment>> {
        self.get_record(DEPLOYMENTS, guid)
    }

    /// List deployments currently in the given state.
    pub fn list_deployments_in_state(
        &self,
        state: DeploymentState,
    ) -> StateResult<Vec<Deployment>> {
        self.list_records(DEPLOYMENTS, |d: &Deployment| d.state == state)
    }

    // ── Route mappings ─────────────────────────────────────────────

    /// Insert or update a route mapping.
    pub fn put_route_mapping(&self, mapping: &RouteMapping) -> StateResult<()> {
        self.put_record(ROUTE_MAPPINGS, &mapping.guid, mapping)
    }

    /// List the route mappings served by a process.
    pub fn list_route_mappings_for_process(
        &self,
        process_guid: &str,
    ) -> StateResult<Vec<RouteMapping>> {
        self.list_records(ROUTE_MAPPINGS, |m: &RouteMapping| {
            m.process_guid == process_guid
        })
    }

    // ── Generic record access ──────────────────────────────────────

    fn put_record<T: Serialize>(&self, def: JsonTable, key: &str, record: &T) -> StateResult<()> {
        let value = encode(record)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "record stored");
        Ok(())
    }

    fn get_record<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    fn list_records<T, F>(&self, def: JsonTable, mut keep: F) -> StateResult<Vec<T>>
    where
        T: DeserializeOwned,
        F: FnMut(&T) -> bool,
    {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: T = decode(value.value())?;
            if keep(&record) {
                results.push(record);
            }
        }
        Ok(results)
    }

    fn delete_record(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "record deleted");
        Ok(existed)
    }
}

pub(crate) fn encode<T: Serialize>(record: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(map_err!(Serialize))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}
