//! Cluster resource builder.
//!
//! Pure construction of the objects realizing a validated deployment. No
//! control-plane calls happen here; the external NodePort is left unset
//! so the control plane picks it at creation time.

use std::collections::BTreeMap;

use berth_core::LogicalDeployment;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, HostPathVolumeSource, PersistentVolume, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PersistentVolumeSpec, PodSpec,
    PodTemplateSpec, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::naming::ResourceNames;

/// Port every managed workload listens on inside the cluster.
pub const SERVICE_PORT: i32 = 5432;

const ACCESS_MODE_SINGLE_WRITER: &str = "ReadWriteOnce";
const STORAGE_RESOURCE: &str = "storage";

/// All objects for one logical deployment.
#[derive(Debug, Clone)]
pub struct ResourceSet {
    pub names: ResourceNames,
    pub workload: Deployment,
    pub service: Service,
    pub storage: Option<StorageSet>,
}

/// Persistent storage objects, present only when volume_gib > 0.
#[derive(Debug, Clone)]
pub struct StorageSet {
    pub volume: PersistentVolume,
    pub claim: PersistentVolumeClaim,
}

/// Build the object graph for a validated deployment.
pub fn build(deployment: &LogicalDeployment) -> ResourceSet {
    let names = ResourceNames::new(deployment.id, deployment.owner_id);
    let storage = deployment
        .has_storage()
        .then(|| build_storage(&names, deployment.volume_gib));

    ResourceSet {
        workload: build_workload(&names, deployment),
        service: build_service(&names),
        storage,
        names,
    }
}

fn app_labels(names: &ResourceNames) -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), names.base().to_string())])
}

fn build_workload(names: &ResourceNames, deployment: &LogicalDeployment) -> Deployment {
    let mut container = Container {
        name: names.workload(),
        image: Some(deployment.image.clone()),
        env: Some(env_vars(&deployment.env_vars)),
        ..Default::default()
    };
    let mut volumes = None;

    if deployment.has_storage() {
        container.volume_mounts = Some(vec![VolumeMount {
            name: names.volume_mount(),
            mount_path: names.mount_path(),
            ..Default::default()
        }]);
        volumes = Some(vec![Volume {
            name: names.volume_mount(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: names.claim(),
                read_only: None,
            }),
            ..Default::default()
        }]);
    }

    Deployment {
        metadata: ObjectMeta {
            name: Some(names.workload()),
            labels: Some(app_labels(names)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(deployment.effective_replicas()),
            selector: LabelSelector {
                match_labels: Some(app_labels(names)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_labels(names)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_storage(names: &ResourceNames, volume_gib: i32) -> StorageSet {
    let mut pv_labels = app_labels(names);
    pv_labels.insert("type".to_string(), "local".to_string());

    let volume = PersistentVolume {
        metadata: ObjectMeta {
            name: Some(names.volume()),
            labels: Some(pv_labels),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            storage_class_name: Some(names.storage_class()),
            capacity: Some(storage_resources(volume_gib)),
            access_modes: Some(vec![ACCESS_MODE_SINGLE_WRITER.to_string()]),
            host_path: Some(HostPathVolumeSource {
                path: names.host_path(),
                type_: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let claim = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(names.claim()),
            labels: Some(app_labels(names)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            storage_class_name: Some(names.storage_class()),
            access_modes: Some(vec![ACCESS_MODE_SINGLE_WRITER.to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(storage_resources(volume_gib)),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    StorageSet { volume, claim }
}

fn build_service(names: &ResourceNames) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(names.service()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(app_labels(names)),
            type_: Some("NodePort".to_string()),
            ports: Some(vec![ServicePort {
                port: SERVICE_PORT,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(SERVICE_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Container environment, one entry per variable, in key order.
pub fn env_vars(vars: &BTreeMap<String, String>) -> Vec<EnvVar> {
    vars.iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            value_from: None,
        })
        .collect()
}

/// Binary-gigabyte storage quantity, e.g. `2Gi`.
pub fn storage_quantity(gib: i32) -> Quantity {
    Quantity(format!("{gib}Gi"))
}

/// `{storage: <gib>Gi}` resource list used for capacity and requests.
pub fn storage_resources(gib: i32) -> BTreeMap<String, Quantity> {
    BTreeMap::from([(STORAGE_RESOURCE.to_string(), storage_quantity(gib))])
}

/// Storage size in GiB read back from a resource list, if it is a `<n>Gi` quantity.
pub fn storage_gib(resources: Option<&BTreeMap<String, Quantity>>) -> Option<i32> {
    resources?
        .get(STORAGE_RESOURCE)?
        .0
        .strip_suffix("Gi")?
        .parse()
        .ok()
}

/// NodePort of the first service port, once the control plane assigned one.
pub fn assigned_node_port(service: &Service) -> Option<i32> {
    service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .first()?
        .node_port
        .filter(|port| *port != 0)
}
