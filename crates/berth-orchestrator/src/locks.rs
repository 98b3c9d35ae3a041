//! Per-deployment critical section.
//!
//! Create, update and delete of the same (id, owner) are serialized so two
//! requests never interleave their steps. Different deployments proceed
//! in parallel. Callers that keep a record next to the cluster objects
//! hold the guard across their own read and write of that record too.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use berth_core::{DeploymentId, OwnerId};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Key = (DeploymentId, OwnerId);

/// Exclusive access to one deployment, released on drop.
#[derive(Debug)]
pub struct DeploymentGuard {
    key: Key,
    _guard: OwnedMutexGuard<()>,
}

impl DeploymentGuard {
    pub fn id(&self) -> DeploymentId {
        self.key.0
    }

    pub fn owner(&self) -> OwnerId {
        self.key.1
    }

    pub fn covers(&self, id: DeploymentId, owner: OwnerId) -> bool {
        self.key == (id, owner)
    }
}

/// Keyed async mutex.
#[derive(Debug, Default)]
pub struct DeploymentLocks {
    entries: Mutex<HashMap<Key, Arc<AsyncMutex<()>>>>,
}

impl DeploymentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one deployment.
    pub async fn acquire(&self, id: DeploymentId, owner: OwnerId) -> DeploymentGuard {
        let slot = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries nobody holds or waits on are only referenced by the map.
            entries.retain(|_, slot| Arc::strong_count(slot) > 1);
            entries.entry((id, owner)).or_default().clone()
        };
        DeploymentGuard {
            key: (id, owner),
            _guard: slot.lock_owned().await,
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
