//! Caller identity.

use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use berth_core::OwnerId;

use crate::handlers::error_response;

/// Header carrying the authenticated owner id.
pub const OWNER_HEADER: &str = "x-owner-id";

/// The authenticated owner of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner(pub OwnerId);

impl Owner {
    fn from_parts(parts: &Parts) -> Option<Self> {
        parts
            .headers
            .get(OWNER_HEADER)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()
            .map(Owner)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Owner::from_parts(parts).ok_or_else(|| {
            error_response("missing or invalid owner identity", StatusCode::UNAUTHORIZED).into_response()
        })
    }
}
