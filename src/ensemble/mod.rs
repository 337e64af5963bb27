//! Ensemble consensus over multi-model forecast series.
//!
//! [`run_parameter`] turns one parameter of a [`RawForecastBundle`] into an
//! hourly consensus series using the algorithm its configuration names.
//! Parameters never read each other's results, so the engine runs them as
//! independent tasks.

pub mod alignment;
pub mod categorical;
pub mod circular;
pub mod precipitation;
pub mod rollup;
pub mod scalar;
pub mod selector;

pub use alignment::Alignment;

use crate::model_config::{Algorithm, ModelConfig};
use crate::models::{
    CategoricalConsensus, CategoricalDebug, Model, ModelWeight, Parameter, ParameterConsensus,
    PrecipitationConsensus, RawForecastBundle,
};

use categorical::{categorical_consensus, Vote};
use circular::circular_consensus;
use precipitation::precipitation_consensus;
use scalar::{scalar_consensus, SigmaMode};
use selector::{select, select_with_fallback};

// ---

/// One model's value for one hour, with its configured weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub model: Model,
    pub value: f64,
    pub weight: f64,
}

/// Hourly consensus of one parameter, index-aligned with the raw time axis.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterSeries {
    Scalar(Vec<Option<ParameterConsensus>>),
    Categorical {
        /// Display series, realigned to the preceding hour.
        hourly: Vec<Option<CategoricalConsensus>>,
        /// One consensus per raw timestamp, as computed.
        unshifted: Vec<Option<CategoricalConsensus>>,
    },
    Precipitation(Vec<Option<PrecipitationConsensus>>),
}

impl ParameterSeries {
    /// Hours with a consensus value.
    pub fn resolved_hours(&self) -> usize {
        match self {
            ParameterSeries::Scalar(s) => s.iter().flatten().count(),
            ParameterSeries::Categorical { hourly, .. } => hourly.iter().flatten().count(),
            ParameterSeries::Precipitation(s) => s.iter().flatten().count(),
        }
    }

    /// Hours resolved by a fallback rung.
    pub fn fallback_hours(&self) -> usize {
        match self {
            ParameterSeries::Scalar(s) => s
                .iter()
                .flatten()
                .filter(|c| c.debug.resolution.is_fallback())
                .count(),
            ParameterSeries::Categorical { unshifted, .. } => unshifted
                .iter()
                .flatten()
                .filter(|c| c.debug.resolution.is_fallback())
                .count(),
            ParameterSeries::Precipitation(s) => s
                .iter()
                .flatten()
                .filter(|c| c.resolution.is_fallback())
                .count(),
        }
    }
}

/// Compute the hourly consensus of `parameter`.
///
/// Returns the configuration problem as `Err` when the parameter cannot be
/// computed at all. Hours without data are `None`, never zero-filled.
pub fn run_parameter(
    bundle: &RawForecastBundle,
    config: &ModelConfig,
    parameter: Parameter,
) -> Result<ParameterSeries, String> {
    // ---
    let cfg = config.parameter(parameter)?;
    let hours = 0..bundle.hours();

    let series = match &cfg.algorithm {
        Algorithm::GaussianFixed { .. } | Algorithm::GaussianAdaptive { .. } => {
            let mode = match cfg.algorithm {
                Algorithm::GaussianFixed { sigma } => SigmaMode::Fixed(sigma),
                Algorithm::GaussianAdaptive {
                    sigma_multiplier,
                    min_sigma,
                } => SigmaMode::Adaptive {
                    multiplier: sigma_multiplier,
                    min_sigma,
                },
                _ => unreachable!("matched by the outer arm"),
            };
            ParameterSeries::Scalar(
                hours
                    .map(|h| {
                        let samples = select(bundle, parameter, cfg, h);
                        scalar_consensus(&samples, mode).map(|(value, debug)| ParameterConsensus {
                            time: bundle.time[h],
                            value,
                            model_count: samples.len(),
                            debug,
                        })
                    })
                    .collect(),
            )
        }

        Algorithm::CircularGaussian { sigma_deg } => ParameterSeries::Scalar(
            hours
                .map(|h| {
                    let samples = select(bundle, parameter, cfg, h);
                    match circular_consensus(&samples, *sigma_deg)? {
                        Ok((value, debug)) => Some(ParameterConsensus {
                            time: bundle.time[h],
                            value,
                            model_count: samples.len(),
                            debug,
                        }),
                        Err(reason) => {
                            tracing::debug!("{} hour {} has no consensus: {}", parameter, h, reason);
                            None
                        }
                    }
                })
                .collect(),
        ),

        Algorithm::SmartBarycentric(params) => {
            let unshifted: Vec<Option<CategoricalConsensus>> = hours
                .map(|h| {
                    let (samples, used_fallback_models) =
                        select_with_fallback(bundle, parameter, cfg, &params.fallback_models, h);
                    let votes: Vec<Vote> = samples
                        .iter()
                        .map(|s| Vote {
                            code: s.value,
                            weight: s.weight,
                        })
                        .collect();

                    categorical_consensus(&votes, params).map(|verdict| CategoricalConsensus {
                        time: bundle.time[h],
                        code: verdict.code,
                        risk: verdict.risk,
                        model_count: samples.len(),
                        debug: CategoricalDebug {
                            group: verdict.group,
                            confidence: verdict.confidence,
                            codes: samples
                                .iter()
                                .map(|s| ModelWeight {
                                    model: s.model,
                                    value: s.value,
                                    weight: s.weight,
                                })
                                .collect(),
                            resolution: verdict.resolution,
                            used_fallback_models,
                            shifted: false,
                        },
                    })
                })
                .collect();

            let hourly = alignment::realign_preceding(&unshifted)
                .into_iter()
                .enumerate()
                .map(|(h, (source, consensus))| {
                    consensus.map(|mut c| {
                        c.time = bundle.time[h];
                        c.debug.shifted = source != h;
                        c
                    })
                })
                .collect();

            ParameterSeries::Categorical { hourly, unshifted }
        }

        Algorithm::WeightedAccumulation(params) => ParameterSeries::Precipitation(
            hours
                .map(|h| {
                    let samples = select(bundle, parameter, cfg, h);
                    match precipitation_consensus(&samples, params, h)? {
                        Ok(p) => Some(PrecipitationConsensus {
                            time: bundle.time[h],
                            mm: p.mm,
                            probability: p.probability,
                            wet_models: p.wet_models,
                            confidence_interval: p.confidence_interval,
                            quartiles: p.quartiles,
                            model_count: samples.len(),
                            resolution: p.resolution,
                        }),
                        Err(e) => {
                            tracing::debug!("{} hour {} has no consensus: {}", parameter, h, e);
                            None
                        }
                    }
                })
                .collect(),
        ),
    };

    Ok(series)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::fixtures::{at, constant, default_config, empty_bundle, with_series};
    use crate::models::Resolution;

    #[test]
    fn test_scalar_series_keeps_raw_timestamps_and_gaps() {
        // ---
        let bundle = with_series(
            empty_bundle(3),
            Parameter::Temperature,
            Model::GfsSeamless,
            vec![Some(10.0), None, Some(12.0)],
        );
        let bundle = with_series(
            bundle,
            Parameter::Temperature,
            Model::EcmwfIfs025,
            vec![Some(10.0), None, Some(12.0)],
        );

        let series = run_parameter(&bundle, &default_config(), Parameter::Temperature).unwrap();
        let ParameterSeries::Scalar(hours) = series else {
            panic!("expected scalar series");
        };

        assert_eq!(hours.len(), 3);
        assert_eq!(hours[0].as_ref().unwrap().time, at(1, 0));
        assert_eq!(hours[0].as_ref().unwrap().model_count, 2);
        assert!(hours[1].is_none());
        assert_eq!(hours[2].as_ref().unwrap().value, 12.0);
    }

    #[test]
    fn test_wind_direction_uses_circular_mean() {
        // ---
        let bundle = with_series(
            empty_bundle(1),
            Parameter::WindDirection,
            Model::GfsSeamless,
            vec![Some(350.0)],
        );
        let bundle = with_series(
            bundle,
            Parameter::WindDirection,
            Model::IconSeamless,
            vec![Some(10.0)],
        );

        let series = run_parameter(&bundle, &default_config(), Parameter::WindDirection).unwrap();
        let ParameterSeries::Scalar(hours) = series else {
            panic!("expected scalar series");
        };
        let value = hours[0].as_ref().unwrap().value;

        // GFS carries less weight than ICON, pulling the mean slightly past north.
        assert!(circular::angular_distance(value, 0.0) < 5.0, "got {value}");
    }

    #[test]
    fn test_weather_codes_shift_to_preceding_hour() {
        // ---
        let codes = vec![Some(0.0), Some(61.0), Some(95.0)];
        let mut bundle = empty_bundle(3);
        for model in [Model::EcmwfIfs025, Model::GfsSeamless, Model::IconSeamless] {
            bundle = with_series(bundle, Parameter::WeatherCode, model, codes.clone());
        }

        let series = run_parameter(&bundle, &default_config(), Parameter::WeatherCode).unwrap();
        let ParameterSeries::Categorical { hourly, unshifted } = series else {
            panic!("expected categorical series");
        };

        let raw: Vec<u8> = unshifted.iter().flatten().map(|c| c.code).collect();
        let shown: Vec<u8> = hourly.iter().flatten().map(|c| c.code).collect();
        assert_eq!(raw, vec![0, 61, 95]);
        assert_eq!(shown, vec![61, 95, 95]);

        let first = hourly[0].as_ref().unwrap();
        assert_eq!(first.time, at(1, 0));
        assert!(first.debug.shifted);
        assert!(!hourly[2].as_ref().unwrap().debug.shifted);
        assert!(hourly[1].as_ref().unwrap().risk.thunderstorm);
    }

    #[test]
    fn test_weather_code_rescued_by_fallback_models() {
        // ---
        let json = r#"{
            "weather_code": {
                "algorithm": {
                    "name": "smart_barycentric",
                    "severity_groups": [
                        { "name": "rain", "codes": [61, 63] },
                        { "name": "cloudy", "codes": [1, 2, 3] }
                    ],
                    "fallback_models": ["ecmwf_ifs025"]
                },
                "models": { "icon_d2": { "max_hour": 0 } }
            }
        }"#;
        let config = ModelConfig::from_json(json).unwrap();
        let bundle = with_series(
            empty_bundle(2),
            Parameter::WeatherCode,
            Model::IconD2,
            constant(3.0, 2),
        );
        let bundle = with_series(
            bundle,
            Parameter::WeatherCode,
            Model::EcmwfIfs025,
            constant(61.0, 2),
        );

        let series = run_parameter(&bundle, &config, Parameter::WeatherCode).unwrap();
        let ParameterSeries::Categorical { unshifted, .. } = series else {
            panic!("expected categorical series");
        };

        // ICON-D2 only covers hour 0; hour 1 is rescued by ECMWF IFS.
        let h0 = unshifted[0].as_ref().unwrap();
        let h1 = unshifted[1].as_ref().unwrap();
        assert_eq!(h0.code, 3);
        assert!(!h0.debug.used_fallback_models);
        assert_eq!(h1.code, 61);
        assert!(h1.debug.used_fallback_models);
        assert_eq!(h1.debug.codes[0].model, Model::EcmwfIfs025);
    }

    #[test]
    fn test_precipitation_series_and_fallback_count() {
        // ---
        let bundle = with_series(
            empty_bundle(2),
            Parameter::Precipitation,
            Model::GfsSeamless,
            vec![Some(0.0), Some(1.0)],
        );

        let series = run_parameter(&bundle, &default_config(), Parameter::Precipitation).unwrap();
        let ParameterSeries::Precipitation(hours) = &series else {
            panic!("expected precipitation series");
        };

        assert_eq!(hours[0].as_ref().unwrap().mm, 0.0);
        assert_eq!(hours[1].as_ref().unwrap().wet_models, vec![Model::GfsSeamless]);
        assert_eq!(hours[1].as_ref().unwrap().resolution, Resolution::Primary);
        assert_eq!(series.fallback_hours(), 0);
        assert_eq!(series.resolved_hours(), 2);
    }

    #[test]
    fn test_unconfigured_parameter_is_an_error() {
        // ---
        let json = r#"{
            "temperature": {
                "algorithm": { "name": "gaussian_fixed", "sigma": 1.0 },
                "models": { "gfs_seamless": {} }
            }
        }"#;
        let config = ModelConfig::from_json(json).unwrap();

        assert_eq!(
            run_parameter(&empty_bundle(1), &config, Parameter::WindSpeed),
            Err("no configuration".to_string())
        );
    }
}
