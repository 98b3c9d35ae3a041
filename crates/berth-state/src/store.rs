//! DeploymentStore — redb-backed persistence for logical deployments.
//!
//! Provides owner-scoped CRUD over `LogicalDeployment`. Values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use berth_core::{DeploymentId, LogicalDeployment, OwnerId, epoch_secs};
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe deployment record store backed by redb.
#[derive(Clone)]
pub struct DeploymentStore {
    db: Arc<Database>,
}

impl DeploymentStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "record store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory record store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert a new deployment.
    ///
    /// Assigns `id`, `created_at` and `last_updated` on the passed record.
    pub fn insert(&self, deployment: &mut LogicalDeployment) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut seq = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            let next = seq
                .get(DEPLOYMENT_SEQ)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0)
                + 1;
            seq.insert(DEPLOYMENT_SEQ, next).map_err(map_err!(Write))?;

            let now = epoch_secs();
            deployment.id = next;
            deployment.created_at = now;
            deployment.last_updated = now;

            let key = deployment_key(deployment.owner_id, deployment.id);
            let value = serde_json::to_vec(deployment).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            if table.get(key.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::Duplicate(deployment.id));
            }
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = deployment.id, owner = deployment.owner_id, "deployment record inserted");
        Ok(())
    }

    /// Get a deployment by id, scoped to its owner.
    pub fn get_by_owner(&self, id: DeploymentId, owner: OwnerId) -> StateResult<LogicalDeployment> {
        let key = deployment_key(owner, id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => decode(guard.value(), owner),
            None => Err(StateError::NotFound { id, owner }),
        }
    }

    /// List every deployment of an owner, ordered by id.
    pub fn list_by_owner(&self, owner: OwnerId) -> StateResult<Vec<LogicalDeployment>> {
        let prefix = owner_prefix(owner);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            results.push(decode(value.value(), owner)?);
        }
        Ok(results)
    }

    /// Overwrite the mutable fields of an existing deployment.
    ///
    /// `id`, `owner_id`, `image` and `created_at` are kept from the stored
    /// row; `last_updated` is bumped. Returns the stored result.
    pub fn update_by_owner(
        &self,
        id: DeploymentId,
        owner: OwnerId,
        deployment: &LogicalDeployment,
    ) -> StateResult<LogicalDeployment> {
        let key = deployment_key(owner, id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let existing = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or(StateError::NotFound { id, owner })?;
            let existing = decode(&existing, owner)?;

            updated = LogicalDeployment {
                id: existing.id,
                owner_id: owner,
                image: existing.image,
                volume_gib: deployment.volume_gib,
                replicas: deployment.replicas,
                env_vars: deployment.env_vars.clone(),
                running: deployment.running,
                assigned_port: deployment.assigned_port,
                created_at: existing.created_at,
                last_updated: epoch_secs(),
            };
            let value = serde_json::to_vec(&updated).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id, owner, "deployment record updated");
        Ok(updated)
    }

    /// Delete a deployment, scoped to its owner.
    pub fn delete_by_owner(&self, id: DeploymentId, owner: OwnerId) -> StateResult<()> {
        let key = deployment_key(owner, id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id, owner, existed, "deployment record deleted");
        if existed {
            Ok(())
        } else {
            Err(StateError::NotFound { id, owner })
        }
    }
}

/// Decode a stored row; the owner lives in the key, not the value.
fn decode(bytes: &[u8], owner: OwnerId) -> StateResult<LogicalDeployment> {
    let mut deployment: LogicalDeployment =
        serde_json::from_slice(bytes).map_err(map_err!(Deserialize))?;
    deployment.owner_id = owner;
    Ok(deployment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn test_deployment(owner: OwnerId) -> LogicalDeployment {
        let mut env = BTreeMap::new();
        env.insert("POSTGRES_DB".to_string(), "app".to_string());
        env.insert("POSTGRES_PASSWORD".to_string(), "secret".to_string());
        env.insert("POSTGRES_USER".to_string(), "app".to_string());
        LogicalDeployment::provisional(owner, "postgres", 1, 2, env)
    }

    #[test]
    fn insert_assigns_sequential_ids() {
        let store = DeploymentStore::open_in_memory().unwrap();
        let mut a = test_deployment(1);
        let mut b = test_deployment(2);
        store.insert(&mut a).unwrap();
        store.insert(&mut b).unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert!(a.created_at > 0);
        assert_eq!(a.created_at, a.last_updated);
    }

    #[test]
    fn insert_and_get() {
        let store = DeploymentStore::open_in_memory().unwrap();
        let mut d = test_deployment(7);
        store.insert(&mut d).unwrap();

        let retrieved = store.get_by_owner(d.id, 7).unwrap();
        assert_eq!(retrieved, d);
        assert_eq!(retrieved.owner_id, 7);
    }

    #[test]
    fn get_with_wrong_owner_is_not_found() {
        let store = DeploymentStore::open_in_memory().unwrap();
        let mut d = test_deployment(7);
        store.insert(&mut d).unwrap();

        let err = store.get_by_owner(d.id, 8).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn list_is_scoped_to_owner() {
        let store = DeploymentStore::open_in_memory().unwrap();
        for owner in [1, 2, 1, 10, 1] {
            store.insert(&mut test_deployment(owner)).unwrap();
        }

        let owner1 = store.list_by_owner(1).unwrap();
        assert_eq!(owner1.len(), 3);
        assert!(owner1.iter().all(|d| d.owner_id == 1));
        let ids: Vec<u64> = owner1.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);

        assert_eq!(store.list_by_owner(10).unwrap().len(), 1);
        assert!(store.list_by_owner(3).unwrap().is_empty());
    }

    #[test]
    fn update_keeps_identity_fields() {
        let store = DeploymentStore::open_in_memory().unwrap();
        let mut d = test_deployment(4);
        store.insert(&mut d).unwrap();

        let mut changed = d.clone();
        changed.image = "redis".to_string();
        changed.replicas = 4;
        changed.running = false;
        changed.assigned_port = 31000;
        changed.created_at = 1;

        let updated = store.update_by_owner(d.id, 4, &changed).unwrap();
        assert_eq!(updated.image, "postgres");
        assert_eq!(updated.replicas, 4);
        assert!(!updated.running);
        assert_eq!(updated.assigned_port, 31000);
        assert_eq!(updated.created_at, d.created_at);

        assert_eq!(store.get_by_owner(d.id, 4).unwrap(), updated);
    }

    #[test]
    fn update_missing_is_not_found() {
        let store = DeploymentStore::open_in_memory().unwrap();
        let d = test_deployment(4);
        let err = store.update_by_owner(99, 4, &d).unwrap_err();
        assert!(matches!(err, StateError::NotFound { id: 99, owner: 4 }));
    }

    #[test]
    fn delete_then_delete_again() {
        let store = DeploymentStore::open_in_memory().unwrap();
        let mut d = test_deployment(4);
        store.insert(&mut d).unwrap();

        store.delete_by_owner(d.id, 4).unwrap();
        assert!(store.delete_by_owner(d.id, 4).unwrap_err().is_not_found());
        assert!(store.get_by_owner(d.id, 4).unwrap_err().is_not_found());
    }

    #[test]
    fn delete_with_wrong_owner_keeps_record() {
        let store = DeploymentStore::open_in_memory().unwrap();
        let mut d = test_deployment(4);
        store.insert(&mut d).unwrap();

        assert!(store.delete_by_owner(d.id, 5).unwrap_err().is_not_found());
        assert!(store.get_by_owner(d.id, 4).is_ok());
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        let id = {
            let store = DeploymentStore::open(&db_path).unwrap();
            let mut d = test_deployment(3);
            store.insert(&mut d).unwrap();
            d.id
        };

        // Reopen the same database file; the id sequence continues.
        let store = DeploymentStore::open(&db_path).unwrap();
        assert_eq!(store.get_by_owner(id, 3).unwrap().image, "postgres");
        let mut next = test_deployment(3);
        store.insert(&mut next).unwrap();
        assert_eq!(next.id, id + 1);
    }
}
