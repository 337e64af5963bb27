//! Data models for the forecast aggregation pipeline.
//!
//! Raw upstream data lives in [`RawForecastBundle`]; everything the engine
//! produces from it (hourly records, time slots, daily aggregates) is defined
//! here as well so that routes and tests share a single vocabulary.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ensemble::Alignment;
use crate::error::ForecastError;

// ---

/// Geographic point rounded to 4 decimal places (~11m).
///
/// The rounded pair is the cache identity, so two requests a few metres apart
/// share one entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    // ---
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    // ---
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, ForecastError> {
        // ---
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(ForecastError::InvalidCoordinate(format!(
                "latitude {latitude} out of range"
            )));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(ForecastError::InvalidCoordinate(format!(
                "longitude {longitude} out of range"
            )));
        }

        // Adding 0.0 turns -0.0 into 0.0 so both sides of zero share a key.
        Ok(Self {
            latitude: round_to(latitude, 4) + 0.0,
            longitude: round_to(longitude, 4) + 0.0,
        })
    }

    /// Cache key, e.g. `"48.8566,2.3522"`.
    pub fn cache_key(&self) -> String {
        format!("{:.4},{:.4}", self.latitude, self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cache_key())
    }
}

/// Round `value` to `decimals` decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// ---

/// How a parameter's consensus is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusKind {
    Scalar,
    Circular,
    Categorical,
    Precipitation,
}

/// Forecast parameters served by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    Temperature,
    ApparentTemperature,
    RelativeHumidity,
    WindSpeed,
    WindGusts,
    WindDirection,
    WeatherCode,
    Precipitation,
}

impl Parameter {
    pub const ALL: [Parameter; 8] = [
        Parameter::Temperature,
        Parameter::ApparentTemperature,
        Parameter::RelativeHumidity,
        Parameter::WindSpeed,
        Parameter::WindGusts,
        Parameter::WindDirection,
        Parameter::WeatherCode,
        Parameter::Precipitation,
    ];

    /// Upstream variable name; per-model series are keyed `<api_key>_<model>`.
    pub fn api_key(self) -> &'static str {
        match self {
            Self::Temperature => "temperature_2m",
            Self::ApparentTemperature => "apparent_temperature",
            Self::RelativeHumidity => "relative_humidity_2m",
            Self::WindSpeed => "wind_speed_10m",
            Self::WindGusts => "wind_gusts_10m",
            Self::WindDirection => "wind_direction_10m",
            Self::WeatherCode => "weather_code",
            Self::Precipitation => "precipitation",
        }
    }

    pub fn kind(self) -> ConsensusKind {
        match self {
            Self::WindDirection => ConsensusKind::Circular,
            Self::WeatherCode => ConsensusKind::Categorical,
            Self::Precipitation => ConsensusKind::Precipitation,
            _ => ConsensusKind::Scalar,
        }
    }

    pub fn default_alignment(self) -> Alignment {
        match self {
            Self::Precipitation => Alignment::PrecedingHour,
            _ => Alignment::Instant,
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_key())
    }
}

/// Upstream numerical weather prediction models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Model {
    EcmwfIfs025,
    EcmwfAifs025,
    GfsSeamless,
    IconSeamless,
    IconD2,
    MeteofranceSeamless,
    UkmoSeamless,
    GemSeamless,
    JmaSeamless,
    KnmiSeamless,
    MetnoSeamless,
}

impl Model {
    pub fn api_id(self) -> &'static str {
        match self {
            Self::EcmwfIfs025 => "ecmwf_ifs025",
            Self::EcmwfAifs025 => "ecmwf_aifs025",
            Self::GfsSeamless => "gfs_seamless",
            Self::IconSeamless => "icon_seamless",
            Self::IconD2 => "icon_d2",
            Self::MeteofranceSeamless => "meteofrance_seamless",
            Self::UkmoSeamless => "ukmo_seamless",
            Self::GemSeamless => "gem_seamless",
            Self::JmaSeamless => "jma_seamless",
            Self::KnmiSeamless => "knmi_seamless",
            Self::MetnoSeamless => "metno_seamless",
        }
    }

    /// Upstream key of this model's series for `parameter`.
    pub fn series_key(self, parameter: Parameter) -> String {
        format!("{}_{}", parameter.api_key(), self.api_id())
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_id())
    }
}

// ---

/// Sunrise/sunset for one local calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarDay {
    // ---
    pub date: NaiveDate,
    pub sunrise: Option<NaiveDateTime>,
    pub sunset: Option<NaiveDateTime>,
}

/// Immutable snapshot of upstream data for one coordinate.
///
/// Every series is index-aligned with `time`. Replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawForecastBundle {
    // ---
    pub coordinate: Coordinate,
    pub fetched_at: DateTime<Utc>,
    pub time: Vec<NaiveDateTime>,
    pub series: BTreeMap<Parameter, BTreeMap<Model, Vec<Option<f64>>>>,
    pub uv_index: Vec<Option<f64>>,
    pub european_aqi: Vec<Option<f64>>,
    pub daily: Vec<SolarDay>,
}

impl RawForecastBundle {
    /// Value of `model`'s `parameter` series at `hour`, if defined.
    pub fn value(&self, parameter: Parameter, model: Model, hour: usize) -> Option<f64> {
        self.series
            .get(&parameter)
            .and_then(|models| models.get(&model))
            .and_then(|values| values.get(hour).copied().flatten())
            .filter(|v| v.is_finite())
    }

    pub fn hours(&self) -> usize {
        self.time.len()
    }
}

// ---

/// How a consensus value was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    Primary,
    Fallback { level: FallbackLevel, reason: String },
    Degraded { reason: String },
}

impl Resolution {
    pub fn is_fallback(&self) -> bool {
        matches!(self, Resolution::Fallback { .. })
    }
}

/// Rung of a fallback ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackLevel {
    /// Scalar: unweighted arithmetic mean.
    UnweightedMean,
    /// Circular: permissive σ, effectively an unweighted circular mean.
    WideSigma,
    /// Categorical: most frequent recognised code.
    Plain,
    /// Categorical: most frequent integral code, counted by hand.
    Emergency,
}

/// Weight one model contributed to a consensus value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelWeight {
    // ---
    pub model: Model,
    pub value: f64,
    pub weight: f64,
}

/// Debug payload of scalar and circular consensus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarDebug {
    // ---
    /// Median (scalar) or initial circular mean (circular).
    pub center: f64,
    pub sigma: f64,
    pub weights: Vec<ModelWeight>,
    pub resolution: Resolution,
}

/// Consensus of a continuous or directional parameter for one hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterConsensus {
    // ---
    pub time: NaiveDateTime,
    pub value: f64,
    pub model_count: usize,
    pub debug: ScalarDebug,
}

/// Hazard flags attached to a categorical consensus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskVector {
    // ---
    pub thunderstorm: bool,
    pub hail: bool,
    pub ice: bool,
    pub fog: bool,
}

/// Hazard kinds, declared in reporting priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskKind {
    Thunderstorm,
    Hail,
    Ice,
    Fog,
}

impl RiskVector {
    pub fn is_empty(&self) -> bool {
        !(self.thunderstorm || self.hail || self.ice || self.fog)
    }

    pub fn union(self, other: RiskVector) -> RiskVector {
        RiskVector {
            thunderstorm: self.thunderstorm || other.thunderstorm,
            hail: self.hail || other.hail,
            ice: self.ice || other.ice,
            fog: self.fog || other.fog,
        }
    }

    pub fn set(&mut self, kind: RiskKind) {
        match kind {
            RiskKind::Thunderstorm => self.thunderstorm = true,
            RiskKind::Hail => self.hail = true,
            RiskKind::Ice => self.ice = true,
            RiskKind::Fog => self.fog = true,
        }
    }

    /// Raised flags, most hazardous first.
    pub fn events(&self) -> Vec<RiskKind> {
        // ---
        let flags = [
            (self.thunderstorm, RiskKind::Thunderstorm),
            (self.hail, RiskKind::Hail),
            (self.ice, RiskKind::Ice),
            (self.fog, RiskKind::Fog),
        ];
        flags
            .into_iter()
            .filter_map(|(raised, kind)| raised.then_some(kind))
            .collect()
    }
}

/// Debug payload of categorical consensus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalDebug {
    // ---
    /// Winning severity group, absent on fallback.
    pub group: Option<String>,
    /// Weighted share of the winning group (or code on fallback).
    pub confidence: f64,
    pub codes: Vec<ModelWeight>,
    pub resolution: Resolution,
    /// Votes came from the broad-coverage fallback models.
    pub used_fallback_models: bool,
    /// True when the value was taken from the following raw hour.
    pub shifted: bool,
}

/// Weather-condition consensus for one hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalConsensus {
    // ---
    pub time: NaiveDateTime,
    pub code: u8,
    pub risk: RiskVector,
    pub model_count: usize,
    pub debug: CategoricalDebug,
}

/// Closed interval `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    // ---
    pub low: f64,
    pub high: f64,
}

/// Inter-quartile range of the contributing models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quartiles {
    // ---
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
}

/// Precipitation consensus for the hour ending at `time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecipitationConsensus {
    // ---
    pub time: NaiveDateTime,
    pub mm: f64,
    /// Probability of precipitation, 0-100.
    pub probability: f64,
    pub wet_models: Vec<Model>,
    pub confidence_interval: Interval,
    pub quartiles: Quartiles,
    pub model_count: usize,
    pub resolution: Resolution,
}

// ---

/// One forecast hour with every parameter's consensus.
///
/// `time` is copied from the raw bundle at the same index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyRecord {
    // ---
    pub time: NaiveDateTime,
    pub temperature: Option<ParameterConsensus>,
    pub apparent_temperature: Option<ParameterConsensus>,
    pub relative_humidity: Option<ParameterConsensus>,
    pub wind_speed: Option<ParameterConsensus>,
    pub wind_gusts: Option<ParameterConsensus>,
    pub wind_direction: Option<ParameterConsensus>,
    pub weather_code: Option<CategoricalConsensus>,
    pub precipitation: Option<PrecipitationConsensus>,
    pub uv_index: Option<f64>,
    pub european_aqi: Option<f64>,
}

impl HourlyRecord {
    pub fn empty(time: NaiveDateTime) -> Self {
        Self {
            time,
            temperature: None,
            apparent_temperature: None,
            relative_humidity: None,
            wind_speed: None,
            wind_gusts: None,
            wind_direction: None,
            weather_code: None,
            precipitation: None,
            uv_index: None,
            european_aqi: None,
        }
    }

    pub fn temperature_value(&self) -> Option<f64> {
        self.temperature.as_ref().map(|c| c.value)
    }

    pub fn precipitation_mm(&self) -> Option<f64> {
        self.precipitation.as_ref().map(|p| p.mm)
    }
}

/// One of the four fixed 6-hour buckets of a day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSlot {
    // ---
    pub start_hour: u32,
    pub end_hour: u32,
    pub weather_code: Option<u8>,
    pub risks: Vec<RiskKind>,
    pub precipitation_mm: f64,
}

/// Summary of one local calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    // ---
    pub date: NaiveDate,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub uv_max: Option<f64>,
    pub precipitation_total: f64,
    pub slots: Vec<TimeSlot>,
    pub sunrise: Option<NaiveDateTime>,
    pub sunset: Option<NaiveDateTime>,
}

/// Outcome of one parameter's consensus run for a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParameterStatus {
    Ok { hours: usize, fallback_hours: usize },
    Degraded { reason: String },
}

/// Fully processed forecast for one coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedForecast {
    // ---
    pub coordinate: Coordinate,
    pub generated_at: DateTime<Utc>,
    pub hourly: Vec<HourlyRecord>,
    pub daily: Vec<DailyAggregate>,
    pub parameters: BTreeMap<Parameter, ParameterStatus>,
}
