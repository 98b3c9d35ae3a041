//! `ControlPlane` backed by a Kubernetes API server via `kube`.

use std::path::Path;

use kube::api::{DeleteParams, PostParams};
use kube::config::{InferConfigError, KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::{Client, Config};
use thiserror::Error;
use tracing::{debug, info};

use crate::cluster::{ClusterError, ClusterObject, ClusterResult, ControlPlane, ObjectKind, object_name};

/// Which call produced an API error; a 409 means different things per verb.
#[derive(Clone, Copy)]
enum Call {
    Create,
    Read,
    Replace,
    Delete,
}

/// Failure to build a client for the cluster.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid kubeconfig: {0}")]
    Kubeconfig(#[from] KubeconfigError),

    #[error("no cluster configuration found: {0}")]
    Infer(#[from] InferConfigError),

    #[error("failed to create cluster client: {0}")]
    Client(#[from] kube::Error),
}

/// Control plane talking to a real cluster.
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
    namespace: String,
}

impl KubeControlPlane {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Connect using an explicit kubeconfig, or the default discovery chain
    /// (in-cluster service account, then `$KUBECONFIG` / `~/.kube/config`).
    pub async fn connect(kubeconfig: Option<&Path>, namespace: &str) -> Result<Self, ConnectError> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
            }
            None => Config::infer().await?,
        };
        let client = Client::try_from(config)?;
        info!(%namespace, "kubernetes client established");
        Ok(Self::new(client, namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Map a `kube` error onto the orchestrator's taxonomy.
fn classify(err: kube::Error, kind: ObjectKind, name: &str, call: Call) -> ClusterError {
    let name = name.to_string();
    match err {
        kube::Error::Api(ae) if ae.code == 404 => ClusterError::NotFound { kind, name },
        kube::Error::Api(ae) if ae.code == 409 => match call {
            Call::Create => ClusterError::AlreadyExists { kind, name },
            Call::Replace | Call::Read | Call::Delete => ClusterError::Conflict { kind, name },
        },
        other => ClusterError::Api {
            kind,
            name,
            message: other.to_string(),
        },
    }
}

impl ControlPlane for KubeControlPlane {
    async fn create<K: ClusterObject>(&self, obj: &K) -> ClusterResult<K> {
        let name = object_name(obj)?;
        debug!(kind = %K::KIND, %name, "create");
        K::api(self.client.clone(), &self.namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| classify(e, K::KIND, &name, Call::Create))
    }

    async fn get<K: ClusterObject>(&self, name: &str) -> ClusterResult<K> {
        debug!(kind = %K::KIND, %name, "get");
        K::api(self.client.clone(), &self.namespace)
            .get(name)
            .await
            .map_err(|e| classify(e, K::KIND, name, Call::Read))
    }

    async fn replace<K: ClusterObject>(&self, obj: &K) -> ClusterResult<K> {
        let name = object_name(obj)?;
        debug!(kind = %K::KIND, %name, version = ?obj.meta().resource_version, "replace");
        K::api(self.client.clone(), &self.namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| classify(e, K::KIND, &name, Call::Replace))
    }

    async fn delete<K: ClusterObject>(&self, name: &str) -> ClusterResult<()> {
        debug!(kind = %K::KIND, %name, "delete (foreground)");
        K::api(self.client.clone(), &self.namespace)
            .delete(name, &DeleteParams::foreground())
            .await
            .map(|_| ())
            .map_err(|e| classify(e, K::KIND, name, Call::Delete))
    }
}
