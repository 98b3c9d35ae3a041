//! berth.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{Catalog, CatalogEntry};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BerthConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    /// Image catalog; empty means the built-in catalog.
    #[serde(default)]
    pub catalog: BTreeMap<String, CatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Explicit kubeconfig path; absent means default discovery.
    pub kubeconfig: Option<PathBuf>,
    /// Deadline for a single control-plane call, in milliseconds.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    10
}

fn default_max_backoff_ms() -> u64 {
    1_000
}

fn default_factor() -> f64 {
    2.0
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            kubeconfig: None,
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            factor: default_factor(),
        }
    }
}

impl ClusterConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl BerthConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BerthConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Build the process-wide catalog from this config.
    pub fn build_catalog(&self) -> Catalog {
        if self.catalog.is_empty() {
            Catalog::default()
        } else {
            Catalog::new(self.catalog.clone())
        }
    }
}
