//! In-process `ControlPlane` with resource versions and fault injection.
//!
//! Objects are stored JSON-encoded, keyed by (kind, name). Every write
//! bumps a global resource version and a `replace` whose base version is
//! stale is rejected with `Conflict`, like a real API server. Services get
//! a NodePort from [30000, 32767] at creation time.
//!
//! Faults can be scripted per (verb, kind) so every protocol failure path
//! is reachable in tests, and the daemon can run against this backend for
//! local development.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use berth_core::{NODE_PORT_MAX, NODE_PORT_MIN};
use serde_json::Value;
use tracing::debug;

use crate::cluster::{ClusterError, ClusterObject, ClusterResult, ControlPlane, ObjectKind, object_name};

/// The kind of control-plane call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Get,
    Replace,
    Delete,
}

/// A scripted failure for the next matching call.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Another writer got there first: the stored version is bumped and
    /// the call fails with `Conflict`.
    Conflict,
    /// The control plane rejects the call outright.
    Reject(String),
    /// The call stalls for the given time before proceeding normally.
    Stall(Duration),
}

/// One recorded call, for asserting on protocol order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub verb: Verb,
    pub kind: ObjectKind,
    pub name: String,
}

#[derive(Debug)]
struct Stored {
    value: Value,
    version: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: BTreeMap<(ObjectKind, String), Stored>,
    version: u64,
    faults: HashMap<(Verb, ObjectKind), VecDeque<Fault>>,
    calls: Vec<Call>,
}

impl MemoryState {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn node_ports_in_use(&self, except: &str) -> Vec<i32> {
        self.objects
            .iter()
            .filter(|((kind, name), _)| *kind == ObjectKind::Service && name != except)
            .flat_map(|(_, stored)| node_ports(&stored.value))
            .collect()
    }
}

/// Shared, cloneable in-memory control plane.
#[derive(Clone, Default)]
pub struct MemoryControlPlane {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a fault for the next `verb` call on `kind`.
    pub fn inject(&self, verb: Verb, kind: ObjectKind, fault: Fault) {
        self.lock()
            .faults
            .entry((verb, kind))
            .or_default()
            .push_back(fault);
    }

    /// Queue the same fault `times` times.
    pub fn inject_times(&self, verb: Verb, kind: ObjectKind, fault: Fault, times: usize) {
        for _ in 0..times {
            self.inject(verb, kind, fault.clone());
        }
    }

    /// Simulate an out-of-band writer touching an object.
    pub fn touch(&self, kind: ObjectKind, name: &str) -> bool {
        let mut state = self.lock();
        let version = state.next_version();
        match state.objects.get_mut(&(kind, name.to_string())) {
            Some(stored) => {
                stored.version = version;
                stored.value["metadata"]["resourceVersion"] = Value::String(version.to_string());
                true
            }
            None => false,
        }
    }

    /// Typed snapshot of a stored object.
    pub fn object<K: ClusterObject>(&self, name: &str) -> Option<K> {
        let state = self.lock();
        let stored = state.objects.get(&(K::KIND, name.to_string()))?;
        serde_json::from_value(stored.value.clone()).ok()
    }

    pub fn contains(&self, kind: ObjectKind, name: &str) -> bool {
        self.lock().objects.contains_key(&(kind, name.to_string()))
    }

    /// Number of stored objects of a kind.
    pub fn count(&self, kind: ObjectKind) -> usize {
        self.lock().objects.keys().filter(|(k, _)| *k == kind).count()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of calls matching `verb` on `kind`.
    pub fn call_count(&self, verb: Verb, kind: ObjectKind) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.verb == verb && c.kind == kind)
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Record the call and pop its scripted fault, if any.
    fn begin(&self, verb: Verb, kind: ObjectKind, name: &str) -> Option<Fault> {
        let mut state = self.lock();
        state.calls.push(Call {
            verb,
            kind,
            name: name.to_string(),
        });
        state.faults.get_mut(&(verb, kind))?.pop_front()
    }

    /// Apply a scripted fault. Returns an error when the call must fail.
    async fn apply_fault(&self, fault: Option<Fault>, kind: ObjectKind, name: &str) -> ClusterResult<()> {
        match fault {
            None => Ok(()),
            Some(Fault::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Some(Fault::Reject(message)) => Err(ClusterError::Api {
                kind,
                name: name.to_string(),
                message,
            }),
            Some(Fault::Conflict) => {
                self.touch(kind, name);
                Err(ClusterError::Conflict {
                    kind,
                    name: name.to_string(),
                })
            }
        }
    }
}

fn encode<K: ClusterObject>(obj: &K, name: &str) -> ClusterResult<Value> {
    serde_json::to_value(obj).map_err(|e| ClusterError::Malformed {
        kind: K::KIND,
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn decode<K: ClusterObject>(value: &Value, name: &str) -> ClusterResult<K> {
    serde_json::from_value(value.clone()).map_err(|e| ClusterError::Malformed {
        kind: K::KIND,
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn node_ports(service: &Value) -> Vec<i32> {
    service["spec"]["ports"]
        .as_array()
        .map(|ports| {
            ports
                .iter()
                .filter_map(|p| p["nodePort"].as_i64())
                .filter_map(|p| i32::try_from(p).ok())
                .filter(|p| *p != 0)
                .collect()
        })
        .unwrap_or_default()
}

/// Allocate or check the NodePorts of a service, like the API server's
/// port allocator: unset ports get the lowest free port, explicit ports
/// must be in range and not held by another service.
fn admit_node_ports(value: &mut Value, in_use: &[i32], name: &str) -> ClusterResult<()> {
    let reject = |message: String| ClusterError::Api {
        kind: ObjectKind::Service,
        name: name.to_string(),
        message,
    };
    let mut taken: Vec<i32> = in_use.to_vec();
    let Some(ports) = value["spec"]["ports"].as_array_mut() else {
        return Ok(());
    };
    for port in ports {
        match port["nodePort"].as_i64().filter(|p| *p != 0) {
            Some(requested) => {
                let requested = i32::try_from(requested).unwrap_or(i32::MAX);
                if !(NODE_PORT_MIN..=NODE_PORT_MAX).contains(&requested) {
                    return Err(reject(format!("nodePort {requested} outside the valid range")));
                }
                if taken.contains(&requested) {
                    return Err(reject(format!("nodePort {requested} is already allocated")));
                }
                taken.push(requested);
            }
            None => {
                let free = (NODE_PORT_MIN..=NODE_PORT_MAX)
                    .find(|p| !taken.contains(p))
                    .ok_or_else(|| reject("no free node ports".to_string()))?;
                port["nodePort"] = Value::from(free);
                taken.push(free);
            }
        }
    }
    Ok(())
}

impl ControlPlane for MemoryControlPlane {
    async fn create<K: ClusterObject>(&self, obj: &K) -> ClusterResult<K> {
        let name = object_name(obj)?;
        let fault = self.begin(Verb::Create, K::KIND, &name);
        self.apply_fault(fault, K::KIND, &name).await?;

        let mut value = encode(obj, &name)?;
        let mut state = self.lock();
        let key = (K::KIND, name.clone());
        if state.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists { kind: K::KIND, name });
        }
        if K::KIND == ObjectKind::Service {
            let in_use = state.node_ports_in_use(&name);
            admit_node_ports(&mut value, &in_use, &name)?;
        }
        let version = state.next_version();
        value["metadata"]["resourceVersion"] = Value::String(version.to_string());
        let created = decode(&value, &name)?;
        state.objects.insert(key, Stored { value, version });
        debug!(kind = %K::KIND, %name, version, "memory: created");
        Ok(created)
    }

    async fn get<K: ClusterObject>(&self, name: &str) -> ClusterResult<K> {
        let fault = self.begin(Verb::Get, K::KIND, name);
        self.apply_fault(fault, K::KIND, name).await?;

        let state = self.lock();
        match state.objects.get(&(K::KIND, name.to_string())) {
            Some(stored) => decode(&stored.value, name),
            None => Err(ClusterError::NotFound {
                kind: K::KIND,
                name: name.to_string(),
            }),
        }
    }

    async fn replace<K: ClusterObject>(&self, obj: &K) -> ClusterResult<K> {
        let name = object_name(obj)?;
        let fault = self.begin(Verb::Replace, K::KIND, &name);
        self.apply_fault(fault, K::KIND, &name).await?;

        let mut value = encode(obj, &name)?;
        let mut state = self.lock();
        let key = (K::KIND, name.clone());
        let Some(current) = state.objects.get(&key).map(|s| s.version) else {
            return Err(ClusterError::NotFound { kind: K::KIND, name });
        };
        // An absent base version is an unconditional replace.
        if let Some(base) = obj.meta().resource_version.as_deref() {
            if base != current.to_string() {
                return Err(ClusterError::Conflict { kind: K::KIND, name });
            }
        }
        if K::KIND == ObjectKind::Service {
            let in_use = state.node_ports_in_use(&name);
            admit_node_ports(&mut value, &in_use, &name)?;
        }
        let version = state.next_version();
        value["metadata"]["resourceVersion"] = Value::String(version.to_string());
        let replaced = decode(&value, &name)?;
        state.objects.insert(key, Stored { value, version });
        debug!(kind = %K::KIND, %name, version, "memory: replaced");
        Ok(replaced)
    }

    async fn delete<K: ClusterObject>(&self, name: &str) -> ClusterResult<()> {
        let fault = self.begin(Verb::Delete, K::KIND, name);
        self.apply_fault(fault, K::KIND, name).await?;

        let mut state = self.lock();
        match state.objects.remove(&(K::KIND, name.to_string())) {
            Some(_) => {
                debug!(kind = %K::KIND, %name, "memory: deleted");
                Ok(())
            }
            None => Err(ClusterError::NotFound {
                kind: K::KIND,
                name: name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn service(name: &str, node_port: Option<i32>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port: 5432,
                    node_port,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn port_of(svc: &Service) -> Option<i32> {
        svc.spec.as_ref()?.ports.as_ref()?[0].node_port
    }

    #[tokio::test]
    async fn create_assigns_distinct_node_ports() {
        let cp = MemoryControlPlane::new();
        let a = cp.create(&service("a", None)).await.unwrap();
        let b = cp.create(&service("b", None)).await.unwrap();
        assert_eq!(port_of(&a), Some(30000));
        assert_eq!(port_of(&b), Some(30001));
        assert!(a.metadata.resource_version.is_some());
    }

    #[tokio::test]
    async fn create_twice_already_exists() {
        let cp = MemoryControlPlane::new();
        cp.create(&service("a", None)).await.unwrap();
        let err = cp.create(&service("a", None)).await.unwrap_err();
        assert!(matches!(err, ClusterError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn explicit_node_port_must_be_free_and_in_range() {
        let cp = MemoryControlPlane::new();
        cp.create(&service("a", Some(31000))).await.unwrap();
        let err = cp.create(&service("b", Some(31000))).await.unwrap_err();
        assert!(matches!(err, ClusterError::Api { .. }));
        let err = cp.create(&service("c", Some(8080))).await.unwrap_err();
        assert!(matches!(err, ClusterError::Api { .. }));
    }

    #[tokio::test]
    async fn stale_replace_conflicts() {
        let cp = MemoryControlPlane::new();
        cp.create(&service("a", None)).await.unwrap();
        let read: Service = cp.get("a").await.unwrap();

        assert!(cp.touch(ObjectKind::Service, "a"));
        let err = cp.replace(&read).await.unwrap_err();
        assert!(err.is_conflict());

        let fresh: Service = cp.get("a").await.unwrap();
        cp.replace(&fresh).await.unwrap();
    }

    #[tokio::test]
    async fn replace_keeps_own_node_port() {
        let cp = MemoryControlPlane::new();
        let created = cp.create(&service("a", None)).await.unwrap();
        let replaced = cp.replace(&created).await.unwrap();
        assert_eq!(port_of(&replaced), port_of(&created));
    }

    #[tokio::test]
    async fn injected_faults_fire_once_each() {
        let cp = MemoryControlPlane::new();
        cp.create(&service("a", None)).await.unwrap();
        cp.inject(Verb::Get, ObjectKind::Service, Fault::Reject("denied".to_string()));

        assert!(matches!(
            cp.get::<Service>("a").await,
            Err(ClusterError::Api { .. })
        ));
        assert!(cp.get::<Service>("a").await.is_ok());
        assert_eq!(cp.call_count(Verb::Get, ObjectKind::Service), 2);
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let cp = MemoryControlPlane::new();
        let err = cp.delete::<Service>("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
