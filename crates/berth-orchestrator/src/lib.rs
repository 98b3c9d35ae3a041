//! berth-orchestrator — turns logical deployments into cluster resources.
//!
//! A logical deployment is realized as a workload controller
//! (`apps/v1 Deployment`), a NodePort `Service`, and, when storage is
//! requested, a `PersistentVolume` plus a `PersistentVolumeClaim`. The
//! orchestrator creates, updates and deletes that family of objects
//! through the `ControlPlane` seam.
//!
//! # Components
//!
//! - **`naming`** — deterministic object names per (id, owner)
//! - **`builder`** — pure construction of the object graph
//! - **`cluster`** — `ControlPlane` / `ClusterObject` traits and errors
//! - **`kube_cluster`** — `ControlPlane` over a real API server
//! - **`memory`** — in-process `ControlPlane` with fault injection
//! - **`retry`** — bounded conflict-retry with increasing backoff
//! - **`locks`** — per-deployment critical section
//! - **`orchestrator`** — the create/update/delete protocols
//!
//! The orchestrator holds no durable state: the control plane is the
//! system of record for objects, the record store (owned by the caller)
//! for the logical deployment.

pub mod builder;
pub mod cluster;
pub mod error;
pub mod kube_cluster;
pub mod locks;
pub mod memory;
pub mod naming;
pub mod orchestrator;
pub mod retry;

pub use cluster::{ClusterError, ClusterObject, ClusterResult, ControlPlane, ObjectKind};
pub use error::{OrchestratorError, OrchestratorResult, Step};
pub use kube_cluster::{ConnectError, KubeControlPlane};
pub use memory::{Fault, MemoryControlPlane, Verb};
pub use naming::ResourceNames;
pub use locks::DeploymentGuard;
pub use orchestrator::Orchestrator;
pub use retry::RetryPolicy;
