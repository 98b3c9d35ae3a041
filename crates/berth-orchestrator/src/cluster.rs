//! The control-plane seam.
//!
//! `ControlPlane` is the only way the orchestrator touches the cluster.
//! Writes after creation go through `replace`, which carries the object's
//! `resourceVersion` as its base version; a stale base version surfaces as
//! `ClusterError::Conflict`.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim, Service};
use kube::{Api, Client};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Result type alias for control-plane calls.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// The four object kinds a deployment is realized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    Workload,
    Service,
    Volume,
    Claim,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectKind::Workload => "workload",
            ObjectKind::Service => "service",
            ObjectKind::Volume => "persistent volume",
            ObjectKind::Claim => "volume claim",
        })
    }
}

/// Errors from a single control-plane call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: ObjectKind, name: String },

    /// The write was based on a stale resource version.
    #[error("{kind} {name} was modified concurrently")]
    Conflict { kind: ObjectKind, name: String },

    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: ObjectKind, name: String },

    #[error("{kind} {name}: call did not complete within {timeout:?}")]
    Timeout {
        kind: ObjectKind,
        name: String,
        timeout: Duration,
    },

    #[error("{kind} {name} is malformed: {reason}")]
    Malformed {
        kind: ObjectKind,
        name: String,
        reason: String,
    },

    #[error("control plane rejected {kind} {name}: {message}")]
    Api {
        kind: ObjectKind,
        name: String,
        message: String,
    },
}

impl ClusterError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ClusterError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

/// A cluster object kind the orchestrator manages.
pub trait ClusterObject:
    kube::Resource<DynamicType = ()>
    + Clone
    + fmt::Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const KIND: ObjectKind;

    /// API handle for this kind, namespaced unless the kind is cluster scoped.
    fn api(client: Client, namespace: &str) -> Api<Self>;
}

impl ClusterObject for Deployment {
    const KIND: ObjectKind = ObjectKind::Workload;

    fn api(client: Client, namespace: &str) -> Api<Self> {
        Api::namespaced(client, namespace)
    }
}

impl ClusterObject for Service {
    const KIND: ObjectKind = ObjectKind::Service;

    fn api(client: Client, namespace: &str) -> Api<Self> {
        Api::namespaced(client, namespace)
    }
}

impl ClusterObject for PersistentVolume {
    const KIND: ObjectKind = ObjectKind::Volume;

    fn api(client: Client, _namespace: &str) -> Api<Self> {
        Api::all(client)
    }
}

impl ClusterObject for PersistentVolumeClaim {
    const KIND: ObjectKind = ObjectKind::Claim;

    fn api(client: Client, namespace: &str) -> Api<Self> {
        Api::namespaced(client, namespace)
    }
}

/// Object name, or an error naming the kind when the object has none.
pub fn object_name<K: ClusterObject>(obj: &K) -> ClusterResult<String> {
    obj.meta().name.clone().ok_or_else(|| ClusterError::Malformed {
        kind: K::KIND,
        name: String::new(),
        reason: "object has no name".to_string(),
    })
}

/// Create/read/replace/delete access to the cluster control plane.
pub trait ControlPlane: Send + Sync + 'static {
    /// Submit a new object; returns it as stored (server-assigned fields filled in).
    fn create<K: ClusterObject>(&self, obj: &K) -> impl Future<Output = ClusterResult<K>> + Send;

    /// Read an object by name.
    fn get<K: ClusterObject>(&self, name: &str) -> impl Future<Output = ClusterResult<K>> + Send;

    /// Overwrite an object, conditional on its `resourceVersion`.
    fn replace<K: ClusterObject>(&self, obj: &K) -> impl Future<Output = ClusterResult<K>> + Send;

    /// Delete an object with foreground propagation.
    fn delete<K: ClusterObject>(&self, name: &str) -> impl Future<Output = ClusterResult<()>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn kinds_display() {
        assert_eq!(ObjectKind::Workload.to_string(), "workload");
        assert_eq!(ObjectKind::Claim.to_string(), "volume claim");
    }

    #[test]
    fn error_predicates() {
        let conflict = ClusterError::Conflict {
            kind: ObjectKind::Service,
            name: "svc".to_string(),
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_not_found());
        assert_eq!(conflict.to_string(), "service svc was modified concurrently");
    }

    #[test]
    fn object_name_requires_metadata_name() {
        let unnamed = Service::default();
        assert!(matches!(
            object_name(&unnamed),
            Err(ClusterError::Malformed { kind: ObjectKind::Service, .. })
        ));

        let named = Service {
            metadata: ObjectMeta {
                name: Some("svc".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(object_name(&named).unwrap(), "svc");
    }
}
