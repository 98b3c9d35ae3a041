//! Static image catalog.
//!
//! Maps an image name to whether it can carry persistent storage and which
//! environment variables it requires. Built once at start-up (from
//! `berth.toml` or the built-in defaults) and never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What the platform knows about one deployable image.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Whether deployments of this image may request a persistent volume.
    pub supports_volume: bool,
    /// Exact set of environment variable names a deployment must provide.
    #[serde(default)]
    pub required_env: BTreeSet<String>,
}

impl CatalogEntry {
    pub fn new<I, S>(supports_volume: bool, required_env: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            supports_volume,
            required_env: required_env.into_iter().map(Into::into).collect(),
        }
    }
}

/// Immutable registry of deployable images, keyed by image name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Catalog {
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: BTreeMap<String, CatalogEntry>) -> Self {
        Self { entries }
    }

    /// Look up an image by name.
    pub fn lookup(&self, image: &str) -> Option<&CatalogEntry> {
        self.entries.get(image)
    }

    /// All entries in image-name order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &CatalogEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for Catalog {
    /// The images Berth ships with.
    fn default() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(
            "postgres".to_string(),
            CatalogEntry::new(true, ["POSTGRES_DB", "POSTGRES_PASSWORD", "POSTGRES_USER"]),
        );
        entries.insert(
            "redis".to_string(),
            CatalogEntry::new(true, Vec::<String>::new()),
        );
        entries.insert(
            "mysql".to_string(),
            CatalogEntry::new(true, ["MYSQL_DATABASE", "MYSQLPASSWORD", "MYSQLUSER"]),
        );
        entries.insert(
            "mongo".to_string(),
            CatalogEntry::new(true, ["MONGO_DB_NAME", "MONGOPASSWORD", "MONGOUSER"]),
        );
        Self { entries }
    }
}
