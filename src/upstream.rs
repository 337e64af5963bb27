//! Upstream forecast provider.
//!
//! [`ForecastSource`] is the seam between the engine and the network. The
//! production implementation, [`OpenMeteoClient`], issues one multi-model
//! forecast request and one air-quality request per coordinate and turns the
//! responses into a [`RawForecastBundle`]. Missing series stay missing; they
//! are never zero-filled.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::config::Config;
use crate::error::ForecastError;
use crate::model_config::ModelConfig;
use crate::models::{Coordinate, Model, Parameter, RawForecastBundle, SolarDay};

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// The air-quality endpoint serves at most this many days.
const MAX_AIR_QUALITY_DAYS: u32 = 7;

/// Longest upstream error body kept in an error message.
const MAX_ERROR_BODY: usize = 200;

// ---

/// Anything that can produce raw multi-model data for a coordinate.
pub trait ForecastSource: Send + Sync + 'static {
    fn fetch(
        &self,
        coordinate: Coordinate,
    ) -> impl Future<Output = Result<RawForecastBundle, ForecastError>> + Send;
}

#[derive(Debug, Deserialize)]
struct HourlyBlock {
    time: Vec<String>,
    #[serde(flatten)]
    data: HashMap<String, Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    time: Vec<String>,
    #[serde(flatten)]
    data: HashMap<String, Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    hourly: HourlyBlock,
    #[serde(default)]
    daily: Option<DailyBlock>,
}

#[derive(Debug, Deserialize)]
struct AirQualityResponse {
    hourly: HourlyBlock,
}

/// Open-Meteo client for the forecast and air-quality APIs.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    // ---
    http: reqwest::Client,
    forecast_url: String,
    air_quality_url: String,
    api_key: Option<String>,
    forecast_days: u32,
    models: Vec<Model>,
    parameters: Vec<Parameter>,
}

impl OpenMeteoClient {
    pub fn new(config: &Config, model_config: &ModelConfig) -> Result<Self, ForecastError> {
        // ---
        let http = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .user_agent(concat!("forecast-consensus/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let models: Vec<Model> = model_config.requested_models().into_iter().collect();
        if models.is_empty() {
            return Err(ForecastError::Config(
                "model configuration enables no model".to_string(),
            ));
        }

        Ok(Self {
            http,
            forecast_url: config.forecast_url.clone(),
            air_quality_url: config.air_quality_url.clone(),
            api_key: config.api_key.clone(),
            forecast_days: config.forecast_days,
            models,
            parameters: model_config.configured_parameters().collect(),
        })
    }

    /// GET `url` and decode the JSON body, mapping non-2xx to a typed error.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ForecastError> {
        // ---
        let mut request = self.http.get(url).query(query);
        if let Some(key) = &self.api_key {
            request = request.query(&[("apikey", key)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ForecastError::UpstreamStatus {
                status: status.as_u16(),
                message: error_reason(&body),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ForecastError::Parse(format!("{url}: {e}")))
    }

    async fn fetch_forecast(&self, coordinate: Coordinate) -> Result<ForecastResponse, ForecastError> {
        // ---
        let hourly = self
            .parameters
            .iter()
            .map(|p| p.api_key())
            .collect::<Vec<_>>()
            .join(",");
        let models = self
            .models
            .iter()
            .map(|m| m.api_id())
            .collect::<Vec<_>>()
            .join(",");

        let query = [
            ("latitude", coordinate.latitude.to_string()),
            ("longitude", coordinate.longitude.to_string()),
            ("hourly", hourly),
            ("daily", "sunrise,sunset".to_string()),
            ("models", models),
            ("forecast_days", self.forecast_days.to_string()),
            ("timezone", "auto".to_string()),
        ];
        self.get_json(&format!("{}/v1/forecast", self.forecast_url), &query)
            .await
    }

    async fn fetch_air_quality(
        &self,
        coordinate: Coordinate,
    ) -> Result<AirQualityResponse, ForecastError> {
        // ---
        let query = [
            ("latitude", coordinate.latitude.to_string()),
            ("longitude", coordinate.longitude.to_string()),
            ("hourly", "uv_index,european_aqi".to_string()),
            (
                "forecast_days",
                self.forecast_days.min(MAX_AIR_QUALITY_DAYS).to_string(),
            ),
            ("timezone", "auto".to_string()),
        ];
        self.get_json(&format!("{}/v1/air-quality", self.air_quality_url), &query)
            .await
    }
}

impl ForecastSource for OpenMeteoClient {
    async fn fetch(&self, coordinate: Coordinate) -> Result<RawForecastBundle, ForecastError> {
        // ---
        tracing::info!(
            "Fetching {} models for {} from upstream",
            self.models.len(),
            coordinate
        );
        let (forecast, air_quality) = tokio::join!(
            self.fetch_forecast(coordinate),
            self.fetch_air_quality(coordinate)
        );

        let air_quality = match air_quality {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::warn!("Air-quality data unavailable for {}: {}", coordinate, e);
                None
            }
        };

        build_bundle(
            coordinate,
            forecast?,
            air_quality,
            &self.models,
            &self.parameters,
        )
    }
}

// ---

/// Extract Open-Meteo's `reason` from an error body, else a truncated body.
fn error_reason(body: &str) -> String {
    // ---
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("reason").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY).collect())
}

fn parse_time(raw: &str) -> Result<NaiveDateTime, ForecastError> {
    NaiveDateTime::parse_from_str(raw, TIME_FORMAT)
        .map_err(|e| ForecastError::Parse(format!("invalid timestamp '{raw}': {e}")))
}

fn numbers(values: &[Value]) -> Vec<Option<f64>> {
    values.iter().map(Value::as_f64).collect()
}

/// First daily field named `name`, or suffixed with a model id.
fn daily_field<'a>(daily: &'a DailyBlock, name: &str) -> Option<&'a Vec<Value>> {
    // ---
    if let Some(values) = daily.data.get(name) {
        return Some(values);
    }
    let prefix = format!("{name}_");
    let mut keys: Vec<&String> = daily.data.keys().filter(|k| k.starts_with(&prefix)).collect();
    keys.sort();
    keys.first().and_then(|k| daily.data.get(*k))
}

fn solar_days(daily: Option<&DailyBlock>) -> Result<Vec<SolarDay>, ForecastError> {
    // ---
    let Some(daily) = daily else {
        return Ok(Vec::new());
    };
    let empty = Vec::new();
    let sunrise = daily_field(daily, "sunrise").unwrap_or(&empty);
    let sunset = daily_field(daily, "sunset").unwrap_or(&empty);
    let instant = |values: &Vec<Value>, i: usize| {
        values
            .get(i)
            .and_then(Value::as_str)
            .and_then(|s| NaiveDateTime::parse_from_str(s, TIME_FORMAT).ok())
    };

    daily
        .time
        .iter()
        .enumerate()
        .map(|(i, raw)| {
            let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|e| ForecastError::Parse(format!("invalid date '{raw}': {e}")))?;
            Ok(SolarDay {
                date,
                sunrise: instant(sunrise, i),
                sunset: instant(sunset, i),
            })
        })
        .collect()
}

/// Series of `key` re-indexed onto `time`, matched by timestamp.
fn align_by_time(block: &HourlyBlock, key: &str, time: &[NaiveDateTime]) -> Vec<Option<f64>> {
    // ---
    let Some(values) = block.data.get(key) else {
        tracing::debug!("Air-quality response has no '{}' series", key);
        return vec![None; time.len()];
    };

    let by_time: HashMap<NaiveDateTime, Option<f64>> = block
        .time
        .iter()
        .zip(numbers(values))
        .filter_map(|(raw, v)| parse_time(raw).ok().map(|t| (t, v)))
        .collect();

    time.iter()
        .map(|t| by_time.get(t).copied().flatten())
        .collect()
}

/// Assemble a bundle from decoded upstream responses.
///
/// With a single requested model the upstream omits the model suffix from
/// series keys, so the bare parameter key is used instead.
fn build_bundle(
    coordinate: Coordinate,
    forecast: ForecastResponse,
    air_quality: Option<AirQualityResponse>,
    models: &[Model],
    parameters: &[Parameter],
) -> Result<RawForecastBundle, ForecastError> {
    // ---
    let time = forecast
        .hourly
        .time
        .iter()
        .map(|raw| parse_time(raw))
        .collect::<Result<Vec<_>, _>>()?;

    let mut series: BTreeMap<Parameter, BTreeMap<Model, Vec<Option<f64>>>> = BTreeMap::new();
    for &parameter in parameters {
        for &model in models {
            let key = if models.len() == 1 {
                parameter.api_key().to_string()
            } else {
                model.series_key(parameter)
            };
            let Some(values) = forecast.hourly.data.get(&key) else {
                tracing::debug!("Upstream response has no '{}' series", key);
                continue;
            };
            if values.len() != time.len() {
                tracing::warn!(
                    "Dropping '{}': {} values for {} timestamps",
                    key,
                    values.len(),
                    time.len()
                );
                continue;
            }
            series
                .entry(parameter)
                .or_default()
                .insert(model, numbers(values));
        }
    }

    let (uv_index, european_aqi) = match &air_quality {
        Some(aq) => (
            align_by_time(&aq.hourly, "uv_index", &time),
            align_by_time(&aq.hourly, "european_aqi", &time),
        ),
        None => (vec![None; time.len()], vec![None; time.len()]),
    };

    Ok(RawForecastBundle {
        coordinate,
        fetched_at: Utc::now(),
        daily: solar_days(forecast.daily.as_ref())?,
        time,
        series,
        uv_index,
        european_aqi,
    })
}
