//! Per-hour model selection.
//!
//! A model contributes to hour `h` only if it is enabled, `h` lies inside
//! its validity window and the raw series actually has a value there.

use crate::model_config::ParameterConfig;
use crate::models::{Model, Parameter, RawForecastBundle};

use super::Sample;

// ---

/// Samples of `parameter` at `hour` from the configured models.
///
/// Iterates models in identifier order so the result is deterministic.
pub fn select(
    bundle: &RawForecastBundle,
    parameter: Parameter,
    config: &ParameterConfig,
    hour: usize,
) -> Vec<Sample> {
    // ---
    config
        .models
        .iter()
        .filter(|(_, settings)| settings.covers(hour))
        .filter_map(|(&model, settings)| {
            bundle.value(parameter, model, hour).map(|value| Sample {
                model,
                value,
                weight: settings.weight,
            })
        })
        .collect()
}

/// Like [`select`], falling back to `fallback` models (unit weight, no
/// window) when no configured model has data.
///
/// The flag is true when the fallback list supplied the samples.
pub fn select_with_fallback(
    bundle: &RawForecastBundle,
    parameter: Parameter,
    config: &ParameterConfig,
    fallback: &[Model],
    hour: usize,
) -> (Vec<Sample>, bool) {
    // ---
    let selected = select(bundle, parameter, config, hour);
    if !selected.is_empty() || fallback.is_empty() {
        return (selected, false);
    }

    let rescued: Vec<Sample> = fallback
        .iter()
        .filter_map(|&model| {
            bundle.value(parameter, model, hour).map(|value| Sample {
                model,
                value,
                weight: 1.0,
            })
        })
        .collect();

    let used = !rescued.is_empty();
    (rescued, used)
}

#[cfg(test)]
mod tests {
    // ---
    use std::collections::BTreeMap;

    use super::*;
    use crate::fixtures::{empty_bundle, with_series};
    use crate::model_config::{Algorithm, ModelSettings};

    fn config(models: &[(Model, ModelSettings)]) -> ParameterConfig {
        // ---
        ParameterConfig {
            algorithm: Algorithm::GaussianFixed { sigma: 1.0 },
            alignment: None,
            models: models.iter().cloned().collect::<BTreeMap<_, _>>(),
        }
    }

    fn settings(enabled: bool, weight: f64, min_hour: usize, max_hour: usize) -> ModelSettings {
        ModelSettings {
            enabled,
            weight,
            min_hour,
            max_hour,
        }
    }

    #[test]
    fn test_select_respects_enable_window_and_missing_values() {
        // ---
        let bundle = empty_bundle(4);
        let bundle = with_series(
            bundle,
            Parameter::Temperature,
            Model::GfsSeamless,
            vec![Some(10.0), Some(11.0), None, Some(13.0)],
        );
        let bundle = with_series(
            bundle,
            Parameter::Temperature,
            Model::IconD2,
            vec![Some(9.0); 4],
        );
        let bundle = with_series(
            bundle,
            Parameter::Temperature,
            Model::JmaSeamless,
            vec![Some(30.0); 4],
        );
        let cfg = config(&[
            (Model::GfsSeamless, settings(true, 0.8, 0, 384)),
            (Model::IconD2, settings(true, 1.2, 0, 1)),
            (Model::JmaSeamless, settings(false, 1.0, 0, 384)),
        ]);

        let h0 = select(&bundle, Parameter::Temperature, &cfg, 0);
        assert_eq!(h0.len(), 2);
        assert_eq!(h0[0].model, Model::GfsSeamless);
        assert_eq!(h0[0].weight, 0.8);
        assert_eq!(h0[1].model, Model::IconD2);

        // ICON-D2 is outside its window and GFS has a gap.
        assert!(select(&bundle, Parameter::Temperature, &cfg, 2).is_empty());

        let h3 = select(&bundle, Parameter::Temperature, &cfg, 3);
        assert_eq!(h3.len(), 1);
        assert_eq!(h3[0].value, 13.0);
    }

    #[test]
    fn test_fallback_models_used_only_when_nothing_selected() {
        // ---
        let bundle = with_series(
            empty_bundle(2),
            Parameter::WeatherCode,
            Model::EcmwfIfs025,
            vec![Some(3.0), Some(61.0)],
        );
        let bundle = with_series(
            bundle,
            Parameter::WeatherCode,
            Model::IconD2,
            vec![Some(2.0), None],
        );
        let cfg = config(&[(Model::IconD2, settings(true, 1.0, 0, 384))]);
        let fallback = [Model::EcmwfIfs025, Model::GfsSeamless];

        let (h0, rescued) =
            select_with_fallback(&bundle, Parameter::WeatherCode, &cfg, &fallback, 0);
        assert!(!rescued);
        assert_eq!(h0[0].model, Model::IconD2);

        let (h1, rescued) =
            select_with_fallback(&bundle, Parameter::WeatherCode, &cfg, &fallback, 1);
        assert!(rescued);
        assert_eq!(h1.len(), 1);
        assert_eq!(h1[0].model, Model::EcmwfIfs025);
        assert_eq!(h1[0].value, 61.0);
    }
}
