//! Logical deployment types shared across Berth crates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Record-store assigned deployment identifier.
pub type DeploymentId = u64;

/// Identifier of the user owning a deployment.
pub type OwnerId = u64;

/// Lowest NodePort the control plane hands out.
pub const NODE_PORT_MIN: i32 = 30000;

/// Highest NodePort the control plane hands out.
pub const NODE_PORT_MAX: i32 = 32767;

/// Largest persistent volume a deployment may request, in GiB.
pub const MAX_VOLUME_GIB: i32 = 5;

/// Replica bounds for a running deployment.
pub const MIN_REPLICAS: i32 = 1;
pub const MAX_REPLICAS: i32 = 4;

/// The durable, user-facing description of a managed workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogicalDeployment {
    pub id: DeploymentId,
    #[serde(skip_serializing)]
    #[serde(default)]
    pub owner_id: OwnerId,
    /// Catalog key of the image to run.
    pub image: String,
    /// Persistent storage in GiB; 0 means no storage objects.
    #[serde(default)]
    pub volume_gib: i32,
    pub replicas: i32,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    pub running: bool,
    /// NodePort chosen by the control plane, 0 until created.
    #[serde(default)]
    pub assigned_port: i32,
    /// Unix timestamp (seconds) when the record was inserted.
    #[serde(default)]
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last record update.
    #[serde(default)]
    pub last_updated: u64,
}

impl LogicalDeployment {
    /// A fresh provisional deployment as the caller builds it before insert.
    pub fn provisional(
        owner_id: OwnerId,
        image: impl Into<String>,
        volume_gib: i32,
        replicas: i32,
        env_vars: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: 0,
            owner_id,
            image: image.into(),
            volume_gib,
            replicas,
            env_vars,
            running: true,
            assigned_port: 0,
            created_at: 0,
            last_updated: 0,
        }
    }

    /// Replica count the workload controller should run right now.
    pub fn effective_replicas(&self) -> i32 {
        if self.running { self.replicas } else { 0 }
    }

    pub fn has_storage(&self) -> bool {
        self.volume_gib > 0
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisional_starts_running_without_port() {
        let d = LogicalDeployment::provisional(7, "redis", 1, 2, BTreeMap::new());
        assert!(d.running);
        assert_eq!(d.assigned_port, 0);
        assert_eq!(d.id, 0);
        assert_eq!(d.effective_replicas(), 2);
    }

    #[test]
    fn paused_deployment_runs_zero_replicas() {
        let mut d = LogicalDeployment::provisional(7, "redis", 1, 3, BTreeMap::new());
        d.running = false;
        assert_eq!(d.effective_replicas(), 0);
    }

    #[test]
    fn owner_is_not_serialized() {
        let d = LogicalDeployment::provisional(42, "redis", 1, 1, BTreeMap::new());
        let json = serde_json::to_value(&d).unwrap();
        assert!(json.get("owner_id").is_none());
        assert_eq!(json["image"], "redis");
    }
}
