//! Per-parameter model configuration.
//!
//! Each forecast parameter declares its consensus algorithm, its temporal
//! alignment and, per model, whether it is enabled, its weight and the
//! forecast-hour window in which it is trusted. The document is JSON; a
//! default ships in `config/models.json` and is compiled into the binary.
//!
//! Parameters are parsed independently so that one malformed entry only
//! disables that parameter. A document without a single usable parameter is
//! rejected outright.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ensemble::Alignment;
use crate::error::ForecastError;
use crate::models::{ConsensusKind, Model, Parameter};

/// Configuration compiled into the binary.
pub const DEFAULT_MODEL_CONFIG: &str = include_str!("../config/models.json");

// ---

fn default_true() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

fn default_max_hour() -> usize {
    384
}

/// Per-model settings for one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    // ---
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_weight")]
    pub weight: f64,

    /// First forecast hour (inclusive) in which the model is used.
    #[serde(default)]
    pub min_hour: usize,

    /// Last forecast hour (inclusive) in which the model is used.
    #[serde(default = "default_max_hour")]
    pub max_hour: usize,
}

impl ModelSettings {
    pub fn covers(&self, hour: usize) -> bool {
        self.enabled && self.min_hour <= hour && hour <= self.max_hour
    }
}

/// Ordered bucket of weather codes sharing a hazard level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeverityGroup {
    // ---
    pub name: String,
    /// Codes in ascending intensity.
    pub codes: Vec<u8>,
}

fn default_risk_min_count() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalParams {
    // ---
    /// Most hazardous group first; the order is the tie-break priority.
    pub severity_groups: Vec<SeverityGroup>,

    /// Contributing models needed before a hazard is reported.
    #[serde(default = "default_risk_min_count")]
    pub risk_min_count: usize,

    /// Broad-coverage models tried when no configured model has data.
    #[serde(default)]
    pub fallback_models: Vec<Model>,
}

impl CategoricalParams {
    /// Index of the severity group containing `code`.
    pub fn group_of(&self, code: u8) -> Option<usize> {
        self.severity_groups
            .iter()
            .position(|g| g.codes.contains(&code))
    }
}

fn default_wet_threshold() -> f64 {
    0.1
}

fn default_saturation_mm() -> f64 {
    2.0
}

fn default_magnitude_base() -> f64 {
    0.7
}

fn default_decay_per_hour() -> f64 {
    0.002
}

fn default_min_horizon_factor() -> f64 {
    0.6
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecipitationParams {
    // ---
    #[serde(default = "default_wet_threshold")]
    pub wet_threshold_mm: f64,

    /// Average in `ln(1 + mm)` space and transform back.
    #[serde(default = "default_true")]
    pub log_compression: bool,

    /// Aggregate amount at which the magnitude factor saturates.
    #[serde(default = "default_saturation_mm")]
    pub saturation_mm: f64,

    /// Share of PoP carried by coverage alone, before magnitude.
    #[serde(default = "default_magnitude_base")]
    pub magnitude_base: f64,

    #[serde(default = "default_decay_per_hour")]
    pub decay_per_hour: f64,

    #[serde(default = "default_min_horizon_factor")]
    pub min_horizon_factor: f64,
}

impl Default for PrecipitationParams {
    fn default() -> Self {
        Self {
            wet_threshold_mm: default_wet_threshold(),
            log_compression: true,
            saturation_mm: default_saturation_mm(),
            magnitude_base: default_magnitude_base(),
            decay_per_hour: default_decay_per_hour(),
            min_horizon_factor: default_min_horizon_factor(),
        }
    }
}

fn default_min_sigma() -> f64 {
    0.1
}

/// Consensus algorithm, selected by `name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Algorithm {
    GaussianFixed {
        sigma: f64,
    },
    GaussianAdaptive {
        sigma_multiplier: f64,
        #[serde(default = "default_min_sigma")]
        min_sigma: f64,
    },
    CircularGaussian {
        sigma_deg: f64,
    },
    SmartBarycentric(CategoricalParams),
    WeightedAccumulation(PrecipitationParams),
}

impl Algorithm {
    pub fn kind(&self) -> ConsensusKind {
        match self {
            Algorithm::GaussianFixed { .. } | Algorithm::GaussianAdaptive { .. } => {
                ConsensusKind::Scalar
            }
            Algorithm::CircularGaussian { .. } => ConsensusKind::Circular,
            Algorithm::SmartBarycentric(_) => ConsensusKind::Categorical,
            Algorithm::WeightedAccumulation(_) => ConsensusKind::Precipitation,
        }
    }
}

/// Everything needed to run consensus for one parameter.
fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterConfig {
    // ---
    pub algorithm: Algorithm,

    #[serde(default)]
    pub alignment: Option<Alignment>,

    pub models: BTreeMap<Model, ModelSettings>,
}

impl ParameterConfig {
    pub fn alignment_for(&self, parameter: Parameter) -> Alignment {
        self.alignment
            .unwrap_or_else(|| parameter.default_alignment())
    }

    fn validate(&self, parameter: Parameter) -> Result<(), String> {
        // ---
        if self.algorithm.kind() != parameter.kind() {
            return Err(format!(
                "algorithm {:?} does not apply to {parameter}",
                self.algorithm.kind()
            ));
        }

        for (model, settings) in &self.models {
            if !settings.weight.is_finite() || settings.weight < 0.0 {
                return Err(format!("{model}: weight must be a non-negative number"));
            }
            if settings.min_hour > settings.max_hour {
                return Err(format!("{model}: min_hour exceeds max_hour"));
            }
        }

        match &self.algorithm {
            Algorithm::GaussianFixed { sigma } if !positive(*sigma) => {
                Err("sigma must be positive".to_string())
            }
            Algorithm::GaussianAdaptive {
                sigma_multiplier,
                min_sigma,
            } if !(positive(*sigma_multiplier) && positive(*min_sigma)) => {
                Err("sigma_multiplier and min_sigma must be positive".to_string())
            }
            Algorithm::CircularGaussian { sigma_deg } if !positive(*sigma_deg) => {
                Err("sigma_deg must be positive".to_string())
            }
            Algorithm::SmartBarycentric(params) if params.severity_groups.is_empty() => {
                Err("at least one severity group is required".to_string())
            }
            Algorithm::WeightedAccumulation(params)
                if !(params.wet_threshold_mm.is_finite() && params.wet_threshold_mm >= 0.0) =>
            {
                Err("wet_threshold_mm must be non-negative".to_string())
            }
            _ => Ok(()),
        }
    }
}

/// Validated configuration for all parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelConfig {
    // ---
    parameters: BTreeMap<Parameter, ParameterConfig>,
    invalid: BTreeMap<Parameter, String>,
}

impl ModelConfig {
    /// Parse a configuration document.
    ///
    /// Returns an error if the document is not a JSON object or if no
    /// parameter is usable.
    pub fn from_json(json: &str) -> Result<Self, ForecastError> {
        // ---
        let document: BTreeMap<String, Value> = serde_json::from_str(json)
            .map_err(|e| ForecastError::Config(format!("invalid model configuration: {e}")))?;

        let mut config = ModelConfig::default();

        for (key, value) in document {
            let parameter = match serde_json::from_value::<Parameter>(Value::String(key.clone()))
            {
                Ok(parameter) => parameter,
                Err(_) => {
                    tracing::warn!("Ignoring configuration for unknown parameter '{}'", key);
                    continue;
                }
            };

            let parsed = serde_json::from_value::<ParameterConfig>(value)
                .map_err(|e| e.to_string())
                .and_then(|cfg| cfg.validate(parameter).map(|_| cfg));

            match parsed {
                Ok(cfg) => {
                    config.parameters.insert(parameter, cfg);
                }
                Err(reason) => {
                    tracing::warn!("Configuration for {} is invalid: {}", parameter, reason);
                    config.invalid.insert(parameter, reason);
                }
            }
        }

        for parameter in Parameter::ALL {
            if !config.parameters.contains_key(&parameter) && !config.invalid.contains_key(&parameter)
            {
                config
                    .invalid
                    .insert(parameter, "no configuration".to_string());
            }
        }

        if config.parameters.is_empty() {
            return Err(ForecastError::Config(
                "model configuration contains no usable parameter".to_string(),
            ));
        }

        Ok(config)
    }

    /// Load from `path`, or the compiled-in default when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, ForecastError> {
        // ---
        match path {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|e| {
                    ForecastError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_json(&json)
            }
            None => Self::from_json(DEFAULT_MODEL_CONFIG),
        }
    }

    /// Configuration of `parameter`, or the reason it is unusable.
    pub fn parameter(&self, parameter: Parameter) -> Result<&ParameterConfig, String> {
        match self.parameters.get(&parameter) {
            Some(cfg) => Ok(cfg),
            None => Err(self
                .invalid
                .get(&parameter)
                .cloned()
                .unwrap_or_else(|| "no configuration".to_string())),
        }
    }

    pub fn invalid_parameters(&self) -> &BTreeMap<Parameter, String> {
        &self.invalid
    }

    /// Models the upstream request must include.
    pub fn requested_models(&self) -> BTreeSet<Model> {
        // ---
        let mut models = BTreeSet::new();
        for cfg in self.parameters.values() {
            models.extend(
                cfg.models
                    .iter()
                    .filter(|(_, s)| s.enabled)
                    .map(|(m, _)| *m),
            );
            if let Algorithm::SmartBarycentric(params) = &cfg.algorithm {
                models.extend(params.fallback_models.iter().copied());
            }
        }
        models
    }

    /// Parameters with a usable configuration.
    pub fn configured_parameters(&self) -> impl Iterator<Item = Parameter> + '_ {
        self.parameters.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_default_config_is_complete() {
        // ---
        let config = ModelConfig::from_json(DEFAULT_MODEL_CONFIG).unwrap();

        assert!(config.invalid_parameters().is_empty());
        for parameter in Parameter::ALL {
            let cfg = config.parameter(parameter).unwrap();
            assert_eq!(cfg.algorithm.kind(), parameter.kind());
        }
        assert!(config.requested_models().contains(&Model::EcmwfIfs025));
    }

    #[test]
    fn test_mismatched_algorithm_invalidates_only_that_parameter() {
        // ---
        let json = r#"{
            "temperature": {
                "algorithm": { "name": "gaussian_fixed", "sigma": 1.5 },
                "models": { "gfs_seamless": { "weight": 1.0 } }
            },
            "wind_direction": {
                "algorithm": { "name": "gaussian_fixed", "sigma": 1.5 },
                "models": { "gfs_seamless": {} }
            }
        }"#;
        let config = ModelConfig::from_json(json).unwrap();

        assert!(config.parameter(Parameter::Temperature).is_ok());
        let reason = config.parameter(Parameter::WindDirection).unwrap_err();
        assert!(reason.contains("does not apply"));
        assert_eq!(
            config.parameter(Parameter::Precipitation).unwrap_err(),
            "no configuration"
        );
    }

    #[test]
    fn test_non_positive_sigma_invalidates_parameter() {
        // ---
        let json = r#"{
            "temperature": {
                "algorithm": { "name": "gaussian_fixed", "sigma": 0.0 },
                "models": { "gfs_seamless": {} }
            },
            "wind_direction": {
                "algorithm": { "name": "circular_gaussian", "sigma_deg": -10.0 },
                "models": { "gfs_seamless": {} }
            },
            "relative_humidity": {
                "algorithm": { "name": "gaussian_fixed", "sigma": 2.0 },
                "models": { "gfs_seamless": {} }
            }
        }"#;
        let config = ModelConfig::from_json(json).unwrap();

        assert!(config.parameter(Parameter::Temperature).unwrap_err().contains("sigma"));
        assert!(config.parameter(Parameter::WindDirection).unwrap_err().contains("sigma_deg"));
        assert!(config.parameter(Parameter::RelativeHumidity).is_ok());
    }

    #[test]
    fn test_unknown_model_invalidates_parameter() {
        // ---
        let json = r#"{
            "temperature": {
                "algorithm": { "name": "gaussian_fixed", "sigma": 1.5 },
                "models": { "gfs_seamless": {} }
            },
            "relative_humidity": {
                "algorithm": { "name": "gaussian_fixed", "sigma": 5.0 },
                "models": { "not_a_model": {} }
            }
        }"#;
        let config = ModelConfig::from_json(json).unwrap();

        assert!(config.parameter(Parameter::RelativeHumidity).is_err());
        assert!(config.parameter(Parameter::Temperature).is_ok());
    }

    #[test]
    fn test_model_settings_defaults_and_window() {
        // ---
        let settings: ModelSettings = serde_json::from_str(r#"{ "max_hour": 48 }"#).unwrap();

        assert!(settings.enabled);
        assert_eq!(settings.weight, 1.0);
        assert!(settings.covers(0));
        assert!(settings.covers(48));
        assert!(!settings.covers(49));
    }

    #[test]
    fn test_empty_document_is_rejected() {
        // ---
        assert!(matches!(
            ModelConfig::from_json("{}"),
            Err(ForecastError::Config(_))
        ));
        assert!(ModelConfig::from_json("[1, 2]").is_err());
    }
}
