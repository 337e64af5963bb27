//! Builders shared by unit tests.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::ensemble::Sample;
use crate::model_config::{Algorithm, CategoricalParams, ModelConfig, DEFAULT_MODEL_CONFIG};
use crate::models::{Coordinate, Model, Parameter, RawForecastBundle, SolarDay};

// ---

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
}

pub fn at(d: u32, hour: u32) -> NaiveDateTime {
    day(d).and_hms_opt(hour, 0, 0).unwrap()
}

/// `len` consecutive hours starting at midnight of `start`.
pub fn hourly_axis(start: NaiveDate, len: usize) -> Vec<NaiveDateTime> {
    let midnight = start.and_hms_opt(0, 0, 0).unwrap();
    (0..len)
        .map(|h| midnight + Duration::hours(h as i64))
        .collect()
}

pub fn samples(values: &[(Model, f64)]) -> Vec<Sample> {
    values
        .iter()
        .map(|&(model, value)| Sample {
            model,
            value,
            weight: 1.0,
        })
        .collect()
}

/// Bundle with a `hours`-long axis starting on `day(1)` and no series.
pub fn empty_bundle(hours: usize) -> RawForecastBundle {
    RawForecastBundle {
        coordinate: Coordinate::new(52.37, 4.89).unwrap(),
        fetched_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
        time: hourly_axis(day(1), hours),
        series: BTreeMap::new(),
        uv_index: vec![None; hours],
        european_aqi: vec![None; hours],
        daily: (0..hours.div_ceil(24))
            .map(|d| SolarDay {
                date: day(1 + d as u32),
                sunrise: Some(at(1 + d as u32, 5)),
                sunset: Some(at(1 + d as u32, 21)),
            })
            .collect(),
    }
}

pub fn with_series(
    mut bundle: RawForecastBundle,
    parameter: Parameter,
    model: Model,
    values: Vec<Option<f64>>,
) -> RawForecastBundle {
    bundle
        .series
        .entry(parameter)
        .or_default()
        .insert(model, values);
    bundle
}

/// Same constant value for every hour.
pub fn constant(value: f64, hours: usize) -> Vec<Option<f64>> {
    vec![Some(value); hours]
}

pub fn default_config() -> ModelConfig {
    ModelConfig::from_json(DEFAULT_MODEL_CONFIG).unwrap()
}

/// Weather-code parameters of the shipped configuration.
pub fn categorical_params() -> CategoricalParams {
    match &default_config()
        .parameter(Parameter::WeatherCode)
        .unwrap()
        .algorithm
    {
        Algorithm::SmartBarycentric(params) => params.clone(),
        other => panic!("unexpected weather code algorithm {other:?}"),
    }
}
