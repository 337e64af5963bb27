//! Multi-model weather forecast aggregation.
//!
//! Fetches hourly forecasts from several numerical weather prediction models
//! for a coordinate, reconciles them per parameter into one consensus value
//! per hour, and rolls the hours up into time slots and days. Results are
//! held in a two-tier in-memory cache.
//!
//! Module layout:
//! - `config`: service settings from the environment
//! - `model_config`: per-parameter algorithm and model settings (JSON)
//! - `upstream`: the forecast provider seam and its Open-Meteo client
//! - `ensemble`: model selection, consensus algorithms, alignment and rollup
//! - `cache` and `engine`: the request pipeline
//! - `routes`: the axum HTTP surface

pub mod cache;
pub mod config;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod model_config;
pub mod models;
pub mod routes;
pub mod upstream;

#[cfg(test)]
mod fixtures;

pub use cache::{CacheService, CacheStatistics, TierStatistics};
pub use config::Config;
pub use engine::ForecastEngine;
pub use error::ForecastError;
pub use model_config::ModelConfig;
pub use models::{Coordinate, DailyAggregate, HourlyRecord, ProcessedForecast};
pub use upstream::{ForecastSource, OpenMeteoClient};
