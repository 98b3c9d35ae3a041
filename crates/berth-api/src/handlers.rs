//! REST API handlers.
//!
//! Create, update and delete keep the record store and the cluster in
//! step: the record is written around the orchestrator call, and when the
//! two can no longer be reconciled the condition is logged at `error`
//! level with the failed step. Clients only ever see opaque messages.
//!
//! Each of those handlers holds the deployment lock from its record read
//! until its record write, so two requests on one deployment never work
//! from the same stale record.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use berth_core::{DeploymentId, LogicalDeployment, Mutation, ValidationErrors, validate};
use berth_orchestrator::ControlPlane;
use berth_state::StateError;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{ApiState, Owner};

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<ValidationErrors>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            errors: None,
        })
    }
}

pub(crate) fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
            errors: None,
        }),
    )
}

fn validation_response(errors: ValidationErrors) -> impl IntoResponse {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some("validation failed".to_string()),
            errors: Some(errors),
        }),
    )
}

fn record_error(e: &StateError) -> axum::response::Response {
    if e.is_not_found() {
        error_response("deployment not found", StatusCode::NOT_FOUND).into_response()
    } else {
        error!(error = %e, "record store failure");
        error_response("internal error", StatusCode::INTERNAL_SERVER_ERROR).into_response()
    }
}

// ── Catalog ────────────────────────────────────────────────────

/// GET /api/v1/catalog
pub async fn list_catalog<C: ControlPlane>(State(state): State<ApiState<C>>) -> impl IntoResponse {
    ApiResponse::ok(serde_json::json!({
        "number": state.catalog.len(),
        "entries": state.catalog.as_ref(),
    }))
}

// ── Deployments ────────────────────────────────────────────────

/// Create request body.
#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub image: String,
    #[serde(default)]
    pub volume: i32,
    pub replicas: i32,
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
}

/// Update request body. Absent fields keep their stored value; a port of
/// 0 keeps the current port.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateRequest {
    pub port: Option<i32>,
    pub volume: Option<i32>,
    pub replicas: Option<i32>,
    pub env_vars: Option<BTreeMap<String, String>>,
    pub running: Option<bool>,
}

impl UpdateRequest {
    /// The edited deployment. The image always comes from the stored record.
    fn apply(self, stored: &LogicalDeployment) -> LogicalDeployment {
        let mut next = stored.clone();
        if let Some(port) = self.port.filter(|p| *p != 0) {
            next.assigned_port = port;
        }
        if let Some(volume) = self.volume {
            next.volume_gib = volume;
        }
        if let Some(replicas) = self.replicas {
            next.replicas = replicas;
        }
        if let Some(env_vars) = self.env_vars {
            next.env_vars = env_vars;
        }
        if let Some(running) = self.running {
            next.running = running;
        }
        next
    }
}

/// GET /api/v1/deployments
pub async fn list_deployments<C: ControlPlane>(
    State(state): State<ApiState<C>>,
    Owner(owner): Owner,
) -> impl IntoResponse {
    match state.store.list_by_owner(owner) {
        Ok(deployments) => ApiResponse::ok(deployments).into_response(),
        Err(e) => record_error(&e),
    }
}

/// GET /api/v1/deployments/{id}
pub async fn get_deployment<C: ControlPlane>(
    State(state): State<ApiState<C>>,
    Owner(owner): Owner,
    Path(id): Path<DeploymentId>,
) -> impl IntoResponse {
    match state.store.get_by_owner(id, owner) {
        Ok(deployment) => ApiResponse::ok(deployment).into_response(),
        Err(e) => record_error(&e),
    }
}

/// POST /api/v1/deployments
pub async fn create_deployment<C: ControlPlane>(
    State(state): State<ApiState<C>>,
    Owner(owner): Owner,
    Json(req): Json<CreateRequest>,
) -> impl IntoResponse {
    let mut deployment =
        LogicalDeployment::provisional(owner, req.image, req.volume, req.replicas, req.env_vars);
    if let Err(errors) = validate(&state.catalog, &deployment, Mutation::Create) {
        return validation_response(errors).into_response();
    }

    if let Err(e) = state.store.insert(&mut deployment) {
        return record_error(&e);
    }
    let id = deployment.id;
    let guard = state.orchestrator.lock(id, owner).await;

    let port = match state.orchestrator.create_locked(&guard, &deployment).await {
        Ok(port) => port,
        Err(e) => {
            warn!(id, owner, step = %e.step(), error = %e, "cluster create failed, rolling back record");
            if let Err(rollback) = state.store.delete_by_owner(id, owner) {
                error!(
                    id,
                    owner,
                    step = %e.step(),
                    error = %rollback,
                    "record rollback failed; record and cluster are inconsistent"
                );
            }
            return error_response("failed to create deployment", StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    deployment.assigned_port = port;
    match state.store.update_by_owner(id, owner, &deployment) {
        Ok(stored) => {
            info!(id, owner, image = %stored.image, port, "deployment created");
            (StatusCode::CREATED, ApiResponse::ok(stored)).into_response()
        }
        Err(e) => {
            error!(id, owner, port, error = %e, "cluster created but port not recorded; record and cluster are inconsistent");
            error_response("failed to create deployment", StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// PATCH /api/v1/deployments/{id}
pub async fn update_deployment<C: ControlPlane>(
    State(state): State<ApiState<C>>,
    Owner(owner): Owner,
    Path(id): Path<DeploymentId>,
    Json(req): Json<UpdateRequest>,
) -> impl IntoResponse {
    let guard = state.orchestrator.lock(id, owner).await;
    let stored = match state.store.get_by_owner(id, owner) {
        Ok(d) => d,
        Err(e) => return record_error(&e),
    };

    let next = req.apply(&stored);
    if let Err(errors) = validate(&state.catalog, &next, Mutation::Update) {
        return validation_response(errors).into_response();
    }

    if let Err(e) = state.orchestrator.update_locked(&guard, &stored, &next).await {
        error!(
            id,
            owner,
            step = %e.step(),
            error = %e,
            "cluster update failed; record left unchanged, cluster may be partially updated"
        );
        return error_response("failed to update deployment", StatusCode::INTERNAL_SERVER_ERROR)
            .into_response();
    }

    match state.store.update_by_owner(id, owner, &next) {
        Ok(updated) => {
            info!(id, owner, replicas = updated.replicas, running = updated.running, "deployment updated");
            (StatusCode::ACCEPTED, ApiResponse::ok(updated)).into_response()
        }
        Err(e) => {
            error!(id, owner, error = %e, "cluster updated but record not; record and cluster are inconsistent");
            error_response("failed to update deployment", StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// DELETE /api/v1/deployments/{id}
pub async fn delete_deployment<C: ControlPlane>(
    State(state): State<ApiState<C>>,
    Owner(owner): Owner,
    Path(id): Path<DeploymentId>,
) -> impl IntoResponse {
    let guard = state.orchestrator.lock(id, owner).await;
    if let Err(e) = state.store.get_by_owner(id, owner) {
        return record_error(&e);
    }

    if let Err(e) = state.orchestrator.delete_locked(&guard).await {
        error!(
            id,
            owner,
            step = %e.step(),
            error = %e,
            "cluster delete failed; record kept, cluster may be partially deleted"
        );
        return error_response("failed to delete deployment", StatusCode::INTERNAL_SERVER_ERROR)
            .into_response();
    }

    match state.store.delete_by_owner(id, owner) {
        Ok(()) => {
            info!(id, owner, "deployment deleted");
            ApiResponse::ok("deleted").into_response()
        }
        Err(e) => {
            error!(id, owner, error = %e, "cluster resources deleted but record remains");
            record_error(&e)
        }
    }
}
