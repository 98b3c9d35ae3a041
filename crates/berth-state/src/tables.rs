//! redb table definitions for the Berth record store.

use redb::TableDefinition;

/// Logical deployments keyed by `{owner_id:020}/{id:020}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Monotonic id sequences keyed by sequence name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Sequence used to assign deployment ids.
pub const DEPLOYMENT_SEQ: &str = "deployment_id";

/// Build the row key for a deployment.
pub fn deployment_key(owner: u64, id: u64) -> String {
    format!("{owner:020}/{id:020}")
}

/// Key prefix covering every deployment of an owner.
pub fn owner_prefix(owner: u64) -> String {
    format!("{owner:020}/")
}
