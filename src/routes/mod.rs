//! HTTP gateway.
//!
//! Each sibling module owns its handlers and exports a subrouter; this
//! gateway merges them and attaches the shared engine as state, so `main.rs`
//! never needs to know about individual endpoints.

use std::sync::Arc;

use axum::Router;

use crate::engine::ForecastEngine;
use crate::upstream::OpenMeteoClient;

mod cache;
mod forecast;
mod health;

/// State shared by every route.
pub type AppState = Arc<ForecastEngine<OpenMeteoClient>>;

// ---

pub fn router(engine: AppState) -> Router {
    // ---
    Router::new()
        .merge(forecast::router())
        .merge(cache::router())
        .merge(health::router())
        .with_state(engine)
}
