//! Cache inspection and maintenance endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use tracing::info;

use super::AppState;
use crate::cache::CacheStatistics;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/cache/stats", get(stats))
        .route("/cache", delete(clear))
}

/// Handle `GET /cache/stats`.
async fn stats(State(engine): State<AppState>) -> Json<CacheStatistics> {
    Json(engine.cache_statistics())
}

/// Handle `DELETE /cache`: drop both tiers.
async fn clear(State(engine): State<AppState>) -> StatusCode {
    // ---
    info!("DELETE /cache");
    engine.clear_cache();
    StatusCode::NO_CONTENT
}
