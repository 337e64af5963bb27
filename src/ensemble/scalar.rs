//! Gaussian-weighted consensus for continuous parameters.
//!
//! Each model's weight is scaled by a Gaussian kernel of its distance to the
//! ensemble median. Outliers are damped rather than dropped, which behaves
//! better than trimming when only a handful of models report.

use crate::error::ConsensusError;
use crate::models::{round_to, FallbackLevel, ModelWeight, Resolution, ScalarDebug};

use super::Sample;

// ---

/// Kernel width selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SigmaMode {
    Fixed(f64),
    /// `σ = max(multiplier × stddev(values), min_sigma)`.
    Adaptive { multiplier: f64, min_sigma: f64 },
}

/// Unrounded result of a weighted consensus.
#[derive(Debug, Clone, PartialEq)]
pub struct Weighted {
    // ---
    pub value: f64,
    pub center: f64,
    pub sigma: f64,
    pub weights: Vec<ModelWeight>,
}

pub(crate) fn median(values: &[f64]) -> f64 {
    // ---
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

fn std_dev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

pub(crate) fn check_finite(samples: &[Sample]) -> Result<(), ConsensusError> {
    match samples
        .iter()
        .find(|s| !s.value.is_finite() || !s.weight.is_finite())
    {
        Some(s) => Err(ConsensusError::NonFinite(format!(
            "{}: value {} weight {}",
            s.model, s.value, s.weight
        ))),
        None => Ok(()),
    }
}

/// Gaussian-kernel weighted mean around the median.
pub fn gaussian_weighted(samples: &[Sample], mode: SigmaMode) -> Result<Weighted, ConsensusError> {
    // ---
    if samples.is_empty() {
        return Err(ConsensusError::Empty);
    }
    check_finite(samples)?;

    let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
    let center = median(&values);
    let sigma = match mode {
        SigmaMode::Fixed(sigma) => sigma,
        SigmaMode::Adaptive {
            multiplier,
            min_sigma,
        } => (multiplier * std_dev(&values)).max(min_sigma),
    };
    if !(sigma.is_finite() && sigma > 0.0) {
        return Err(ConsensusError::Degenerate(format!("sigma {sigma}")));
    }

    let weights: Vec<ModelWeight> = samples
        .iter()
        .map(|s| {
            let z = (s.value - center) / sigma;
            ModelWeight {
                model: s.model,
                value: s.value,
                weight: s.weight * (-0.5 * z * z).exp(),
            }
        })
        .collect();

    let total: f64 = weights.iter().map(|w| w.weight).sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(ConsensusError::Degenerate(format!(
            "total kernel weight {total}"
        )));
    }
    let value = weights.iter().map(|w| w.weight * w.value).sum::<f64>() / total;

    Ok(Weighted {
        value,
        center,
        sigma,
        weights,
    })
}

/// Consensus value rounded to 0.1, with its debug payload.
///
/// Falls back to the unweighted mean of the finite samples if the weighted
/// computation fails. `None` only when there is nothing to average.
pub fn scalar_consensus(samples: &[Sample], mode: SigmaMode) -> Option<(f64, ScalarDebug)> {
    // ---
    if samples.is_empty() {
        return None;
    }

    match gaussian_weighted(samples, mode) {
        Ok(w) => Some((
            round_to(w.value, 1),
            ScalarDebug {
                center: w.center,
                sigma: w.sigma,
                weights: w.weights,
                resolution: Resolution::Primary,
            },
        )),
        Err(e) => {
            let finite: Vec<&Sample> = samples.iter().filter(|s| s.value.is_finite()).collect();
            if finite.is_empty() {
                return None;
            }
            let mean = finite.iter().map(|s| s.value).sum::<f64>() / finite.len() as f64;

            Some((
                round_to(mean, 1),
                ScalarDebug {
                    center: mean,
                    sigma: 0.0,
                    weights: finite
                        .iter()
                        .map(|s| ModelWeight {
                            model: s.model,
                            value: s.value,
                            weight: 1.0,
                        })
                        .collect(),
                    resolution: Resolution::Fallback {
                        level: FallbackLevel::UnweightedMean,
                        reason: e.to_string(),
                    },
                },
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::fixtures::samples;
    use crate::models::Model;

    #[test]
    fn test_agreeing_models() {
        // ---
        let s = samples(&[(Model::GfsSeamless, 12.0), (Model::IconSeamless, 12.0)]);
        let (value, debug) = scalar_consensus(&s, SigmaMode::Fixed(1.0)).unwrap();

        assert_eq!(value, 12.0);
        assert_eq!(debug.resolution, Resolution::Primary);
        assert_eq!(debug.center, 12.0);
    }

    #[test]
    fn test_outlier_is_downweighted() {
        // ---
        let s = samples(&[
            (Model::EcmwfIfs025, 10.0),
            (Model::GfsSeamless, 10.2),
            (Model::IconSeamless, 9.8),
            (Model::UkmoSeamless, 10.1),
            (Model::JmaSeamless, 25.0),
        ]);
        let (value, debug) = scalar_consensus(&s, SigmaMode::Fixed(1.0)).unwrap();

        // The plain mean would be 13.0.
        assert!((9.9..=10.2).contains(&value), "got {value}");
        let outlier = debug
            .weights
            .iter()
            .find(|w| w.model == Model::JmaSeamless)
            .unwrap();
        assert!(outlier.weight < 1e-6);
    }

    #[test]
    fn test_adaptive_sigma_uses_dispersion() {
        // ---
        let s = samples(&[(Model::GfsSeamless, 10.0), (Model::IconSeamless, 12.0)]);
        let w = gaussian_weighted(
            &s,
            SigmaMode::Adaptive {
                multiplier: 2.0,
                min_sigma: 0.5,
            },
        )
        .unwrap();

        assert_eq!(w.sigma, 2.0);
        assert_eq!(w.center, 11.0);
        assert!((w.value - 11.0).abs() < 1e-9);

        let single = samples(&[(Model::GfsSeamless, 4.0)]);
        let w = gaussian_weighted(
            &single,
            SigmaMode::Adaptive {
                multiplier: 2.0,
                min_sigma: 0.5,
            },
        )
        .unwrap();
        assert_eq!(w.sigma, 0.5);
        assert_eq!(w.value, 4.0);
    }

    #[test]
    fn test_model_weights_shift_result() {
        // ---
        let mut s = samples(&[(Model::GfsSeamless, 10.0), (Model::IconSeamless, 11.0)]);
        s[1].weight = 4.0;
        let (value, _) = scalar_consensus(&s, SigmaMode::Fixed(5.0)).unwrap();

        assert_eq!(value, 10.8);
    }

    #[test]
    fn test_zero_weights_fall_back_to_mean() {
        // ---
        let mut s = samples(&[(Model::GfsSeamless, 10.0), (Model::IconSeamless, 20.0)]);
        for sample in &mut s {
            sample.weight = 0.0;
        }
        let (value, debug) = scalar_consensus(&s, SigmaMode::Fixed(1.0)).unwrap();

        assert_eq!(value, 15.0);
        assert!(matches!(
            debug.resolution,
            Resolution::Fallback {
                level: FallbackLevel::UnweightedMean,
                ..
            }
        ));
    }

    #[test]
    fn test_non_finite_value_falls_back_without_it() {
        // ---
        let s = samples(&[
            (Model::GfsSeamless, 8.0),
            (Model::IconSeamless, f64::INFINITY),
            (Model::UkmoSeamless, 9.0),
        ]);
        let (value, debug) = scalar_consensus(&s, SigmaMode::Fixed(1.0)).unwrap();

        assert_eq!(value, 8.5);
        assert!(debug.resolution.is_fallback());
    }

    #[test]
    fn test_empty_input_has_no_consensus() {
        // ---
        assert!(scalar_consensus(&[], SigmaMode::Fixed(1.0)).is_none());
        assert_eq!(
            gaussian_weighted(&[], SigmaMode::Fixed(1.0)),
            Err(ConsensusError::Empty)
        );
    }

    #[test]
    fn test_median() {
        // ---
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }
}
