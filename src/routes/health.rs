// src/routes/health.rs
//! Service health check endpoint.
//!
//! This module defines the `/health` route used by container orchestrators
//! and CI pipelines to verify that the service is running. It is a sibling
//! module in the `routes` directory:
//! - Internal to this file: endpoint handler(s) and related types
//! - Exports to the gateway (`mod.rs`): a subrouter containing the `/health` route
//!
//! Besides liveness it reports which forecast parameters the loaded model
//! configuration could not enable.

use std::collections::BTreeMap;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use super::AppState;
use crate::models::Parameter;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    /// `"ok"`, or `"degraded"` when some parameter is unusable.
    status: &'static str,
    invalid_parameters: BTreeMap<Parameter, String>,
}

/// Handle `GET /health`.
///
/// Never touches the upstream provider or the caches.
async fn health(State(engine): State<AppState>) -> Json<HealthResponse> {
    // ---
    let invalid_parameters = engine.model_config().invalid_parameters().clone();
    let status = if invalid_parameters.is_empty() {
        "ok"
    } else {
        "degraded"
    };
    Json(HealthResponse {
        status,
        invalid_parameters,
    })
}

/// Create a subrouter containing the `/health` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}
