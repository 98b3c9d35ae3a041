//! Deterministic cluster object names.
//!
//! Every object belonging to a deployment is a fixed suffix of one base
//! name derived from (id, owner). Update and delete locate prior objects
//! by recomputing the names, so nothing here may depend on time or
//! randomness.

use berth_core::{DeploymentId, OwnerId};

/// The family of cluster object names for one logical deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceNames {
    base: String,
}

impl ResourceNames {
    pub fn new(id: DeploymentId, owner: OwnerId) -> Self {
        // Both parts are decimal, so the `-user-` separator keeps the map injective.
        Self {
            base: format!("deployment-{id}-user-{owner}"),
        }
    }

    /// Base name, also used as the `app` label value.
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn workload(&self) -> String {
        format!("{}-deployment", self.base)
    }

    pub fn service(&self) -> String {
        format!("{}-service", self.base)
    }

    pub fn volume(&self) -> String {
        format!("{}-pv", self.base)
    }

    pub fn claim(&self) -> String {
        format!("{}-pv-claim", self.base)
    }

    /// Name of the pod volume that mounts the claim.
    pub fn volume_mount(&self) -> String {
        format!("{}-volume", self.base)
    }

    pub fn storage_class(&self) -> String {
        format!("{}-storage-class", self.base)
    }

    /// Where the claim is mounted inside the container.
    pub fn mount_path(&self) -> String {
        format!("/var/lib/{}-volume/data", self.base)
    }

    /// Node directory backing the persistent volume.
    pub fn host_path(&self) -> String {
        format!("/mnt/{}/data", self.base)
    }
}
