use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::error::ForecastError;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/forecast", get(handler))
}

/// Query parameters of `GET /forecast`.
#[derive(Debug, Deserialize)]
pub struct ForecastQuery {
    lat: f64,
    lon: f64,
    /// Bypass both cache tiers.
    #[serde(default)]
    refresh: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

/// Map an engine failure to its HTTP status.
fn status_of(err: &ForecastError) -> StatusCode {
    match err {
        ForecastError::InvalidCoordinate(_) => StatusCode::BAD_REQUEST,
        e if e.is_upstream() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn handler(
    query: Result<Query<ForecastQuery>, QueryRejection>,
    State(engine): State<AppState>,
) -> Response {
    // ---
    let Query(params) = match query {
        Ok(query) => query,
        Err(rejection) => {
            warn!("GET /forecast - bad query: {}", rejection.body_text());
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };
    info!(
        "GET /forecast - lat={} lon={} refresh={}",
        params.lat, params.lon, params.refresh
    );

    match engine
        .get_forecast(params.lat, params.lon, params.refresh)
        .await
    {
        Ok(forecast) => {
            debug!(
                "GET /forecast - Returning {} hours for {}",
                forecast.hourly.len(),
                forecast.coordinate
            );
            (StatusCode::OK, Json(&*forecast)).into_response()
        }
        Err(e) => {
            let status = status_of(&e);
            if status == StatusCode::BAD_REQUEST {
                warn!("GET /forecast - {}", e);
            } else {
                error!("GET /forecast - {}", e);
            }
            error_response(status, e.to_string())
        }
    }
}
