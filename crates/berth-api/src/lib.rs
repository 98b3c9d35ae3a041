//! berth-api — REST API for Berth.
//!
//! Thin axum layer over the record store and the orchestrator. Handlers
//! own the caller side of every protocol: validate, keep the record,
//! drive the cluster, and reconcile the record with the outcome.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/catalog` | List available images |
//! | GET | `/api/v1/deployments` | List the caller's deployments |
//! | POST | `/api/v1/deployments` | Create a deployment |
//! | GET | `/api/v1/deployments/{id}` | Get one deployment |
//! | PATCH | `/api/v1/deployments/{id}` | Resize, rescale, pause or resume |
//! | DELETE | `/api/v1/deployments/{id}` | Delete a deployment |
//!
//! Every request carries the caller's identity in the `x-owner-id`
//! header, set by the identity layer in front of this service.

pub mod handlers;
pub mod owner;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use berth_core::Catalog;
use berth_orchestrator::{ControlPlane, Orchestrator};
use berth_state::DeploymentStore;

pub use owner::{OWNER_HEADER, Owner};

/// Shared state for API handlers.
pub struct ApiState<C> {
    pub store: DeploymentStore,
    pub orchestrator: Arc<Orchestrator<C>>,
    pub catalog: Arc<Catalog>,
}

impl<C> Clone for ApiState<C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            orchestrator: Arc::clone(&self.orchestrator),
            catalog: Arc::clone(&self.catalog),
        }
    }
}

impl<C: ControlPlane> ApiState<C> {
    pub fn new(store: DeploymentStore, orchestrator: Orchestrator<C>, catalog: Catalog) -> Self {
        Self {
            store,
            orchestrator: Arc::new(orchestrator),
            catalog: Arc::new(catalog),
        }
    }
}

/// Build the complete API router.
pub fn build_router<C: ControlPlane>(state: ApiState<C>) -> Router {
    let api_routes = Router::new()
        .route("/catalog", get(handlers::list_catalog::<C>))
        .route(
            "/deployments",
            get(handlers::list_deployments::<C>).post(handlers::create_deployment::<C>),
        )
        .route(
            "/deployments/{id}",
            get(handlers::get_deployment::<C>)
                .patch(handlers::update_deployment::<C>)
                .delete(handlers::delete_deployment::<C>),
        )
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
