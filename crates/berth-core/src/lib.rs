//! berth-core — shared types for Berth.
//!
//! Holds the logical deployment record, the static image catalog, the
//! deployment validator, and the `berth.toml` configuration parser. The
//! catalog is built once at start-up and handed explicitly to every
//! component that needs it.

pub mod catalog;
pub mod config;
pub mod types;
pub mod validator;

pub use catalog::{Catalog, CatalogEntry};
pub use config::BerthConfig;
pub use types::*;
pub use validator::{Mutation, ValidationErrors, validate};
