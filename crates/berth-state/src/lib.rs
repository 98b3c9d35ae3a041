//! berth-state — durable record store for logical deployments.
//!
//! Backed by [redb](https://docs.rs/redb). Rows are JSON-serialized
//! `LogicalDeployment`s keyed by `{owner_id}/{id}` (both zero-padded), so
//! every lookup is scoped to an owner and listing an owner's deployments
//! is a prefix scan.
//!
//! The `DeploymentStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::DeploymentStore;
