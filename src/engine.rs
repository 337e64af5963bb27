//! Forecast aggregation engine.
//!
//! A request resolves in this order: processed cache, raw cache, upstream.
//! On a processed miss every parameter's consensus runs as its own task over
//! the shared raw bundle; the results are joined into hourly records and
//! rolled up into daily aggregates before being cached.
//!
//! A parameter whose task fails, or whose configuration is unusable, is
//! reported as degraded and left empty. It never fails the request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::task::{JoinError, JoinHandle};

use crate::cache::{CacheService, CacheStatistics};
use crate::config::Config;
use crate::ensemble::rollup::{rollup, RollupContext};
use crate::ensemble::{run_parameter, ParameterSeries};
use crate::error::ForecastError;
use crate::model_config::{Algorithm, ModelConfig};
use crate::models::{
    CategoricalConsensus, Coordinate, HourlyRecord, Parameter, ParameterConsensus,
    ParameterStatus, ProcessedForecast, RawForecastBundle,
};
use crate::upstream::ForecastSource;

// ---

/// Owns the cache tiers and the upstream source for one service instance.
#[derive(Debug)]
pub struct ForecastEngine<S> {
    // ---
    source: S,
    models: Arc<ModelConfig>,
    cache: CacheService,
}

/// Scalar slot of `record` that holds `parameter`.
fn scalar_field(
    record: &mut HourlyRecord,
    parameter: Parameter,
) -> Option<&mut Option<ParameterConsensus>> {
    // ---
    match parameter {
        Parameter::Temperature => Some(&mut record.temperature),
        Parameter::ApparentTemperature => Some(&mut record.apparent_temperature),
        Parameter::RelativeHumidity => Some(&mut record.relative_humidity),
        Parameter::WindSpeed => Some(&mut record.wind_speed),
        Parameter::WindGusts => Some(&mut record.wind_gusts),
        Parameter::WindDirection => Some(&mut record.wind_direction),
        Parameter::WeatherCode | Parameter::Precipitation => None,
    }
}

/// Series of a finished consensus task, or the status explaining its absence.
///
/// A task that panicked or was cancelled degrades its parameter only.
fn task_outcome(
    parameter: Parameter,
    coordinate: Coordinate,
    joined: Result<Result<ParameterSeries, String>, JoinError>,
) -> Result<ParameterSeries, ParameterStatus> {
    // ---
    match joined {
        Ok(Ok(series)) => Ok(series),
        Ok(Err(reason)) => {
            tracing::warn!("{} degraded for {}: {}", parameter, coordinate, reason);
            Err(ParameterStatus::Degraded { reason })
        }
        Err(e) => {
            tracing::error!("{} consensus task failed for {}: {}", parameter, coordinate, e);
            Err(ParameterStatus::Degraded {
                reason: format!("consensus task failed: {e}"),
            })
        }
    }
}

impl<S: ForecastSource> ForecastEngine<S> {
    pub fn new(source: S, models: ModelConfig, cache: CacheService) -> Self {
        Self {
            source,
            models: Arc::new(models),
            cache,
        }
    }

    /// Engine with cache tiers sized from `config`.
    pub fn from_config(source: S, models: ModelConfig, config: &Config) -> Self {
        let cache = CacheService::new(config.raw_cache_ttl(), config.processed_cache_ttl());
        Self::new(source, models, cache)
    }

    pub fn model_config(&self) -> &ModelConfig {
        &self.models
    }

    /// Processed forecast for a coordinate.
    ///
    /// `refresh` bypasses both cache tiers. Coordinates are validated before
    /// any cache or network access.
    pub async fn get_forecast(
        &self,
        latitude: f64,
        longitude: f64,
        refresh: bool,
    ) -> Result<Arc<ProcessedForecast>, ForecastError> {
        // ---
        let coordinate = Coordinate::new(latitude, longitude)?;
        let key = coordinate.cache_key();
        let key = key.as_str();

        self.cache
            .processed
            .get_or_fetch(key, refresh, move || async move {
                let raw = self
                    .cache
                    .raw
                    .get_or_fetch(key, refresh, move || self.source.fetch(coordinate))
                    .await?;
                Ok::<_, ForecastError>(self.process(raw).await)
            })
            .await
    }

    pub fn cache_statistics(&self) -> CacheStatistics {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Run every parameter's consensus and assemble the forecast.
    async fn process(&self, raw: Arc<RawForecastBundle>) -> ProcessedForecast {
        // ---
        let started = Instant::now();

        let tasks: Vec<(Parameter, JoinHandle<Result<ParameterSeries, String>>)> = Parameter::ALL
            .into_iter()
            .map(|parameter| {
                let raw = Arc::clone(&raw);
                let models = Arc::clone(&self.models);
                let handle = tokio::spawn(async move { run_parameter(&raw, &models, parameter) });
                (parameter, handle)
            })
            .collect();

        let mut hourly: Vec<HourlyRecord> = raw
            .time
            .iter()
            .enumerate()
            .map(|(h, &time)| HourlyRecord {
                uv_index: raw.uv_index.get(h).copied().flatten(),
                european_aqi: raw.european_aqi.get(h).copied().flatten(),
                ..HourlyRecord::empty(time)
            })
            .collect();
        let mut slot_codes: Vec<Option<CategoricalConsensus>> = Vec::new();
        let mut parameters = BTreeMap::new();

        for (parameter, handle) in tasks {
            let series = match task_outcome(parameter, raw.coordinate, handle.await) {
                Ok(series) => series,
                Err(status) => {
                    parameters.insert(parameter, status);
                    continue;
                }
            };

            let hours = series.resolved_hours();
            let fallback_hours = series.fallback_hours();
            if hours == 0 && !hourly.is_empty() {
                tracing::warn!("{} has no model data for {}", parameter, raw.coordinate);
                parameters.insert(
                    parameter,
                    ParameterStatus::Degraded {
                        reason: "no model data".to_string(),
                    },
                );
                continue;
            }
            if fallback_hours > 0 {
                tracing::warn!(
                    "{} used a fallback for {} of {} hours",
                    parameter,
                    fallback_hours,
                    hours
                );
            }
            parameters.insert(
                parameter,
                ParameterStatus::Ok {
                    hours,
                    fallback_hours,
                },
            );

            match series {
                ParameterSeries::Scalar(values) => {
                    for (record, value) in hourly.iter_mut().zip(values) {
                        if let Some(field) = scalar_field(record, parameter) {
                            *field = value;
                        }
                    }
                }
                ParameterSeries::Categorical { hourly: values, unshifted } => {
                    for (record, value) in hourly.iter_mut().zip(values) {
                        record.weather_code = value;
                    }
                    slot_codes = unshifted;
                }
                ParameterSeries::Precipitation(values) => {
                    for (record, value) in hourly.iter_mut().zip(values) {
                        record.precipitation = value;
                    }
                }
            }
        }

        let categorical = match self.models.parameter(Parameter::WeatherCode) {
            Ok(cfg) if !slot_codes.is_empty() => match &cfg.algorithm {
                Algorithm::SmartBarycentric(params) => Some(params),
                _ => None,
            },
            _ => None,
        };
        let precipitation_alignment = self
            .models
            .parameter(Parameter::Precipitation)
            .map(|cfg| cfg.alignment_for(Parameter::Precipitation))
            .unwrap_or_else(|_| Parameter::Precipitation.default_alignment());

        let daily = rollup(
            &hourly,
            &RollupContext {
                slot_codes: &slot_codes,
                categorical,
                precipitation_alignment,
                solar: &raw.daily,
            },
        );

        tracing::info!(
            "Processed forecast for {} ({} hours, {} days) in {:?}",
            raw.coordinate,
            hourly.len(),
            daily.len(),
            started.elapsed()
        );

        ProcessedForecast {
            coordinate: raw.coordinate,
            generated_at: Utc::now(),
            hourly,
            daily,
            parameters,
        }
    }
}
