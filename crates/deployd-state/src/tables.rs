//! redb table definitions for the deployd state store.
//!
//! Every table uses `&str` keys (record guids) and `&[u8]` values
//! holding JSON-serialized domain types.

use redb::TableDefinition;

/// Shape shared by all tables: guid key, JSON value.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Apps keyed by `{app_guid}`.
pub const APPS: JsonTable = TableDefinition::new("apps");

/// Processes keyed by `{process_guid}`.
pub const PROCESSES: JsonTable = TableDefinition::new("processes");

/// Deployments keyed by `{deployment_guid}`.
pub const DEPLOYMENTS: JsonTable = TableDefinition::new("deployments");

/// Route mappings keyed by `{route_mapping_guid}`.
pub const ROUTE_MAPPINGS: JsonTable = TableDefinition::new("route_mappings");
