//! Deployment validation.
//!
//! Every check runs, so a rejected candidate reports all of its field
//! violations at once. The first message recorded for a field wins.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::catalog::Catalog;
use crate::types::*;

/// Which mutation path a candidate is being validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Create,
    Update,
}

/// Field-level violations, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error)]
#[serde(transparent)]
#[error("deployment failed validation: {}", describe(.errors))]
pub struct ValidationErrors {
    errors: BTreeMap<String, String>,
}

fn describe(errors: &BTreeMap<String, String>) -> String {
    errors
        .iter()
        .map(|(field, msg)| format!("{field} {msg}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `message` for `field` unless the field already has one.
    pub fn add(&mut self, field: &str, message: &str) {
        self.errors
            .entry(field.to_string())
            .or_insert_with(|| message.to_string());
    }

    /// Record `message` for `field` when `ok` is false.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add(field, message);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.errors.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.errors.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

/// Validate a candidate deployment against the catalog and numeric bounds.
///
/// Create and Update share every check; Update additionally bounds a
/// non-zero `assigned_port` to the NodePort range.
pub fn validate(
    catalog: &Catalog,
    candidate: &LogicalDeployment,
    mutation: Mutation,
) -> Result<(), ValidationErrors> {
    let mut v = ValidationErrors::new();
    let entry = catalog.lookup(&candidate.image);

    v.check(!candidate.image.is_empty(), "image", "must be provided");
    v.check(entry.is_some(), "image", "needs to be available");

    v.check(candidate.volume_gib >= 0, "volume", "cannot have a negative value");
    v.check(
        candidate.volume_gib <= MAX_VOLUME_GIB,
        "volume",
        "cannot have a value over 5",
    );
    // Storage-capable images must request storage; storage-less images must not.
    v.check(
        entry.is_some_and(|e| e.supports_volume) && candidate.volume_gib != 0,
        "volume",
        "not available for this image",
    );

    v.check(
        candidate.replicas >= MIN_REPLICAS,
        "replicas",
        "needs to have a value of at least 1",
    );
    v.check(
        candidate.replicas <= MAX_REPLICAS,
        "replicas",
        "cannot have a value over 4",
    );

    let required = entry.map(|e| &e.required_env);
    v.check(
        env_vars_match(&candidate.env_vars, required),
        "env_vars",
        "not available or valid",
    );

    if mutation == Mutation::Update && candidate.assigned_port != 0 {
        v.check(
            candidate.assigned_port >= NODE_PORT_MIN,
            "port",
            "cannot have a value under 30000",
        );
        v.check(
            candidate.assigned_port <= NODE_PORT_MAX,
            "port",
            "cannot have a value over 32767",
        );
    }

    v.into_result()
}

/// True when the provided keys are exactly the required set.
pub fn env_vars_match(
    provided: &BTreeMap<String, String>,
    required: Option<&BTreeSet<String>>,
) -> bool {
    let empty = BTreeSet::new();
    let required = required.unwrap_or(&empty);
    provided.len() == required.len() && required.iter().all(|k| provided.contains_key(k))
}
