//! Create, update and delete protocols.
//!
//! Each protocol is a fixed sequence of named steps. A failing step aborts
//! the protocol and is reported by name; nothing already done is undone.
//! Every control-plane call runs under its own deadline, and update steps
//! run as independent conflict-retry scopes.
//!
//! Protocols on one (id, owner) never interleave. Callers that pair the
//! cluster objects with a stored record take the deployment lock with
//! [`Orchestrator::lock`] and pass the guard to the `*_locked` variants,
//! so their record read and write sit inside the same critical section.

use std::future::Future;
use std::time::Duration;

use berth_core::{BerthConfig, DeploymentId, LogicalDeployment, OwnerId};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{EnvVar, PersistentVolume, PersistentVolumeClaim, Service};
use tracing::{debug, info, warn};

use crate::builder::{self, storage_resources};
use crate::cluster::{ClusterError, ClusterObject, ClusterResult, ControlPlane, ObjectKind, object_name};
use crate::error::{AtStep, OrchestratorError, OrchestratorResult, Step};
use crate::locks::{DeploymentGuard, DeploymentLocks};
use crate::naming::ResourceNames;
use crate::retry::{RetryPolicy, retry_on_conflict};

/// Default deadline for a single control-plane call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Drives the cluster resource set of logical deployments.
pub struct Orchestrator<C> {
    cluster: C,
    retry: RetryPolicy,
    call_timeout: Duration,
    locks: DeploymentLocks,
}

impl<C: ControlPlane> Orchestrator<C> {
    pub fn new(cluster: C, retry: RetryPolicy, call_timeout: Duration) -> Self {
        Self {
            cluster,
            retry,
            call_timeout,
            locks: DeploymentLocks::new(),
        }
    }

    pub fn from_config(cluster: C, config: &BerthConfig) -> Self {
        Self::new(
            cluster,
            RetryPolicy::from_config(&config.retry),
            config.cluster.call_timeout(),
        )
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Wait for exclusive access to one deployment.
    pub async fn lock(&self, id: DeploymentId, owner: OwnerId) -> DeploymentGuard {
        self.locks.acquire(id, owner).await
    }

    /// [`Orchestrator::create_locked`] under a freshly taken lock.
    pub async fn create(&self, deployment: &LogicalDeployment) -> OrchestratorResult<i32> {
        let guard = self.lock(deployment.id, deployment.owner_id).await;
        self.create_locked(&guard, deployment).await
    }

    pub async fn update(&self, old: &LogicalDeployment, new: &LogicalDeployment) -> OrchestratorResult<()> {
        let guard = self.lock(new.id, new.owner_id).await;
        self.update_locked(&guard, old, new).await
    }

    pub async fn delete(&self, id: DeploymentId, owner: OwnerId) -> OrchestratorResult<()> {
        let guard = self.lock(id, owner).await;
        self.delete_locked(&guard).await
    }

    /// Realize a deployment on the cluster and return the NodePort the
    /// control plane assigned to its service.
    ///
    /// Storage comes first so the workload never references a missing
    /// claim. A failure leaves earlier objects in place; callers clean up
    /// with [`Orchestrator::delete`].
    pub async fn create_locked(
        &self,
        guard: &DeploymentGuard,
        deployment: &LogicalDeployment,
    ) -> OrchestratorResult<i32> {
        debug_assert!(guard.covers(deployment.id, deployment.owner_id));
        let set = builder::build(deployment);
        info!(
            id = deployment.id,
            owner = deployment.owner_id,
            image = %deployment.image,
            volume_gib = deployment.volume_gib,
            replicas = deployment.effective_replicas(),
            "creating deployment resources"
        );

        if let Some(storage) = &set.storage {
            self.create_object(&storage.volume).await.at(Step::CreateVolume)?;
            self.create_object(&storage.claim).await.at(Step::CreateClaim)?;
        }
        self.create_object(&set.workload).await.at(Step::CreateWorkload)?;
        let service = self.create_object(&set.service).await.at(Step::CreateService)?;

        let port = match builder::assigned_node_port(&service) {
            Some(port) => port,
            None => {
                let name = set.names.service();
                debug!(service = %name, "node port missing from create response, reading back");
                let service: Service = self.get_object(&name).await.at(Step::ReadAssignedPort)?;
                builder::assigned_node_port(&service).ok_or(OrchestratorError::MissingNodePort {
                    step: Step::ReadAssignedPort,
                    service: name,
                })?
            }
        };

        info!(id = deployment.id, owner = deployment.owner_id, port, "deployment resources created");
        Ok(port)
    }

    /// Bring an existing resource set in line with `new`.
    ///
    /// `old` is the stored state before the edit; it decides whether the
    /// storage objects need resizing.
    pub async fn update_locked(
        &self,
        guard: &DeploymentGuard,
        old: &LogicalDeployment,
        new: &LogicalDeployment,
    ) -> OrchestratorResult<()> {
        debug_assert!(guard.covers(new.id, new.owner_id));
        let names = ResourceNames::new(new.id, new.owner_id);
        let replicas = new.effective_replicas();
        info!(id = new.id, owner = new.owner_id, replicas, running = new.running, "updating deployment resources");

        let workload_name = names.workload();
        let env = (!new.env_vars.is_empty()).then(|| builder::env_vars(&new.env_vars));
        let name = workload_name.as_str();
        let env = env.as_deref();
        retry_on_conflict(&self.retry, Step::UpdateWorkload, move || async move {
            let mut workload: Deployment = self.get_object(name).await?;
            set_workload(&mut workload, name, replicas, env)?;
            self.replace_object(&workload).await
        })
        .await?;

        if old.volume_gib != 0 && new.volume_gib != 0 && old.volume_gib != new.volume_gib {
            let gib = new.volume_gib;
            debug!(from = old.volume_gib, to = gib, "resizing storage");

            let volume_name = names.volume();
            let name = volume_name.as_str();
            retry_on_conflict(&self.retry, Step::ResizeVolume, move || async move {
                let mut volume: PersistentVolume = self.get_object(name).await?;
                resize_volume(&mut volume, name, gib)?;
                self.replace_object(&volume).await
            })
            .await?;

            let claim_name = names.claim();
            let name = claim_name.as_str();
            retry_on_conflict(&self.retry, Step::ResizeClaim, move || async move {
                let mut claim: PersistentVolumeClaim = self.get_object(name).await?;
                resize_claim(&mut claim, name, gib)?;
                self.replace_object(&claim).await
            })
            .await?;
        }

        // Port 0 means the deployment never got one; leave the service alone.
        if new.assigned_port != 0 {
            let port = new.assigned_port;
            let service_name = names.service();
            let name = service_name.as_str();
            retry_on_conflict(&self.retry, Step::UpdateServicePort, move || async move {
                let mut service: Service = self.get_object(name).await?;
                set_node_port(&mut service, name, port)?;
                self.replace_object(&service).await
            })
            .await?;
        }

        info!(id = new.id, owner = new.owner_id, "deployment resources updated");
        Ok(())
    }

    /// Remove every object of a deployment: volume, claim, service, then
    /// workload, each with foreground propagation and no retry.
    ///
    /// A deployment without storage has no volume or claim, so those two
    /// steps accept `NotFound`. The service and workload must exist; a
    /// second delete of the same deployment fails at `DeleteService`.
    pub async fn delete_locked(&self, guard: &DeploymentGuard) -> OrchestratorResult<()> {
        let (id, owner) = (guard.id(), guard.owner());
        let names = ResourceNames::new(id, owner);
        info!(id, owner, "deleting deployment resources");

        self.delete_if_present::<PersistentVolume>(&names.volume())
            .await
            .at(Step::DeleteVolume)?;
        self.delete_if_present::<PersistentVolumeClaim>(&names.claim())
            .await
            .at(Step::DeleteClaim)?;
        self.delete_object::<Service>(&names.service())
            .await
            .at(Step::DeleteService)?;
        self.delete_object::<Deployment>(&names.workload())
            .await
            .at(Step::DeleteWorkload)?;

        info!(id, owner, "deployment resources deleted");
        Ok(())
    }

    /// Run one control-plane call under the per-call deadline.
    async fn call<T>(
        &self,
        kind: ObjectKind,
        name: &str,
        fut: impl Future<Output = ClusterResult<T>>,
    ) -> ClusterResult<T> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%kind, %name, timeout = ?self.call_timeout, "control-plane call timed out");
                Err(ClusterError::Timeout {
                    kind,
                    name: name.to_string(),
                    timeout: self.call_timeout,
                })
            }
        }
    }

    async fn create_object<K: ClusterObject>(&self, obj: &K) -> ClusterResult<K> {
        let name = object_name(obj)?;
        debug!(kind = %K::KIND, %name, "submitting");
        self.call(K::KIND, &name, self.cluster.create(obj)).await
    }

    async fn get_object<K: ClusterObject>(&self, name: &str) -> ClusterResult<K> {
        self.call(K::KIND, name, self.cluster.get::<K>(name)).await
    }

    async fn replace_object<K: ClusterObject>(&self, obj: &K) -> ClusterResult<K> {
        let name = object_name(obj)?;
        self.call(K::KIND, &name, self.cluster.replace(obj)).await
    }

    async fn delete_object<K: ClusterObject>(&self, name: &str) -> ClusterResult<()> {
        self.call(K::KIND, name, self.cluster.delete::<K>(name)).await
    }

    async fn delete_if_present<K: ClusterObject>(&self, name: &str) -> ClusterResult<()> {
        match self.delete_object::<K>(name).await {
            Err(err) if err.is_not_found() => {
                debug!(kind = %K::KIND, %name, "nothing to delete");
                Ok(())
            }
            other => other,
        }
    }
}

fn malformed(kind: ObjectKind, name: &str, reason: &str) -> ClusterError {
    ClusterError::Malformed {
        kind,
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

/// Set replica count and, when given, the container environment.
fn set_workload(
    workload: &mut Deployment,
    name: &str,
    replicas: i32,
    env: Option<&[EnvVar]>,
) -> ClusterResult<()> {
    let spec = workload
        .spec
        .as_mut()
        .ok_or_else(|| malformed(ObjectKind::Workload, name, "missing spec"))?;
    spec.replicas = Some(replicas);

    if let Some(env) = env {
        let container = spec
            .template
            .spec
            .as_mut()
            .and_then(|pod| pod.containers.first_mut())
            .ok_or_else(|| malformed(ObjectKind::Workload, name, "missing container"))?;
        container.env = Some(env.to_vec());
    }
    Ok(())
}

fn resize_volume(volume: &mut PersistentVolume, name: &str, gib: i32) -> ClusterResult<()> {
    let spec = volume
        .spec
        .as_mut()
        .ok_or_else(|| malformed(ObjectKind::Volume, name, "missing spec"))?;
    spec.capacity = Some(storage_resources(gib));
    Ok(())
}

fn resize_claim(claim: &mut PersistentVolumeClaim, name: &str, gib: i32) -> ClusterResult<()> {
    let spec = claim
        .spec
        .as_mut()
        .ok_or_else(|| malformed(ObjectKind::Claim, name, "missing spec"))?;
    spec.resources.get_or_insert_with(Default::default).requests = Some(storage_resources(gib));
    Ok(())
}

fn set_node_port(service: &mut Service, name: &str, port: i32) -> ClusterResult<()> {
    let first = service
        .spec
        .as_mut()
        .and_then(|spec| spec.ports.as_mut())
        .and_then(|ports| ports.first_mut())
        .ok_or_else(|| malformed(ObjectKind::Service, name, "missing port"))?;
    first.node_port = Some(port);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{assigned_node_port, storage_gib};
    use std::collections::BTreeMap;

    fn sample() -> builder::ResourceSet {
        let env = BTreeMap::from([("REDIS_PASSWORD".to_string(), "s3cret".to_string())]);
        let mut d = LogicalDeployment::provisional(4, "redis", 1, 2, env);
        d.id = 9;
        builder::build(&d)
    }

    #[test]
    fn set_workload_keeps_env_when_none_given() {
        let mut workload = sample().workload;
        set_workload(&mut workload, "w", 0, None).unwrap();
        let spec = workload.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(0));
        let env = spec.template.spec.as_ref().unwrap().containers[0].env.as_ref().unwrap();
        assert_eq!(env[0].name, "REDIS_PASSWORD");
    }

    #[test]
    fn set_workload_replaces_env() {
        let mut workload = sample().workload;
        let env = builder::env_vars(&BTreeMap::from([("REDIS_PASSWORD".to_string(), "new".to_string())]));
        set_workload(&mut workload, "w", 3, Some(&env)).unwrap();
        let container = &workload.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0];
        assert_eq!(container.env.as_ref().unwrap()[0].value.as_deref(), Some("new"));
    }

    #[test]
    fn set_workload_rejects_empty_object() {
        let mut workload = Deployment::default();
        let err = set_workload(&mut workload, "w", 1, None).unwrap_err();
        assert!(matches!(err, ClusterError::Malformed { kind: ObjectKind::Workload, .. }));
    }

    #[test]
    fn resize_sets_both_capacities() {
        let storage = sample().storage.unwrap();
        let (mut volume, mut claim) = (storage.volume, storage.claim);
        resize_volume(&mut volume, "pv", 4).unwrap();
        resize_claim(&mut claim, "pvc", 4).unwrap();
        assert_eq!(storage_gib(volume.spec.as_ref().unwrap().capacity.as_ref()), Some(4));
        let requests = claim.spec.as_ref().unwrap().resources.as_ref().unwrap().requests.as_ref();
        assert_eq!(storage_gib(requests), Some(4));
    }

    #[test]
    fn node_port_is_written_to_first_port() {
        let mut service = sample().service;
        set_node_port(&mut service, "svc", 31234).unwrap();
        assert_eq!(assigned_node_port(&service), Some(31234));
    }
}
