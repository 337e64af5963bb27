//! Precipitation consensus.
//!
//! Every model value is the accumulation of the hour ending at its
//! timestamp. Per hour this produces the aggregate amount, the models above
//! the wet threshold, a probability of precipitation, and two spread
//! measures (confidence interval and inter-quartile range).

use crate::error::ConsensusError;
use crate::model_config::PrecipitationParams;
use crate::models::{round_to, FallbackLevel, Interval, Model, Quartiles, Resolution};

use super::scalar::check_finite;
use super::Sample;

/// Two-sided 95% normal quantile.
const Z_95: f64 = 1.96;

// ---

/// Per-hour precipitation summary, before the timestamp is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct PrecipitationHour {
    // ---
    pub mm: f64,
    pub probability: f64,
    pub wet_models: Vec<Model>,
    pub confidence_interval: Interval,
    pub quartiles: Quartiles,
    pub resolution: Resolution,
}

/// Weighted mean, optionally in `ln(1 + x)` space.
fn accumulate(samples: &[Sample], log_compression: bool) -> Result<f64, ConsensusError> {
    // ---
    let total: f64 = samples.iter().map(|s| s.weight).sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(ConsensusError::Degenerate(format!("total weight {total}")));
    }

    let mean = if log_compression {
        let t = samples.iter().map(|s| s.weight * s.value.ln_1p()).sum::<f64>() / total;
        t.exp_m1()
    } else {
        samples.iter().map(|s| s.weight * s.value).sum::<f64>() / total
    };
    Ok(mean.max(0.0))
}

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f64], p: f64) -> f64 {
    // ---
    let position = p * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

fn spread(values: &[f64]) -> (Interval, Quartiles) {
    // ---
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let half_width = if values.len() > 1 {
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Z_95 * variance.sqrt() / n.sqrt()
    } else {
        0.0
    };

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);

    (
        Interval {
            low: round_to((mean - half_width).max(0.0), 2),
            high: round_to(mean + half_width, 2),
        },
        Quartiles {
            q1: round_to(q1, 2),
            q3: round_to(q3, 2),
            iqr: round_to(q3 - q1, 2),
        },
    )
}

/// Probability of precipitation in percent.
///
/// Coverage of wet models, boosted by the aggregate amount and decayed
/// with the forecast hour.
fn probability(coverage: f64, mm: f64, hour: usize, params: &PrecipitationParams) -> f64 {
    // ---
    let magnitude = if params.saturation_mm > 0.0 {
        (mm / params.saturation_mm).min(1.0)
    } else {
        1.0
    };
    let base = params.magnitude_base.clamp(0.0, 1.0);
    let horizon = (1.0 - params.decay_per_hour * hour as f64).max(params.min_horizon_factor);

    (100.0 * coverage * (base + (1.0 - base) * magnitude) * horizon)
        .round()
        .clamp(0.0, 100.0)
}

/// Precipitation consensus at forecast hour `hour`.
///
/// Negative amounts are clamped to zero. If all model weights are zero the
/// models are weighted equally and the hour is marked as a fallback.
pub fn precipitation_consensus(
    samples: &[Sample],
    params: &PrecipitationParams,
    hour: usize,
) -> Option<Result<PrecipitationHour, ConsensusError>> {
    // ---
    if samples.is_empty() {
        return None;
    }
    if let Err(e) = check_finite(samples) {
        return Some(Err(e));
    }

    let clamped: Vec<Sample> = samples
        .iter()
        .map(|s| Sample {
            value: s.value.max(0.0),
            ..*s
        })
        .collect();

    let (weighted, resolution) = match accumulate(&clamped, params.log_compression) {
        Ok(_) => (clamped, Resolution::Primary),
        Err(e) => {
            let equal: Vec<Sample> = clamped
                .iter()
                .map(|s| Sample { weight: 1.0, ..*s })
                .collect();
            (
                equal,
                Resolution::Fallback {
                    level: FallbackLevel::UnweightedMean,
                    reason: e.to_string(),
                },
            )
        }
    };
    let mm = match accumulate(&weighted, params.log_compression) {
        Ok(mm) => round_to(mm, 1),
        Err(e) => return Some(Err(e)),
    };

    let is_wet = |s: &Sample| s.value > 0.0 && s.value >= params.wet_threshold_mm;
    let wet_models: Vec<Model> = weighted.iter().filter(|s| is_wet(s)).map(|s| s.model).collect();
    let total_weight: f64 = weighted.iter().map(|s| s.weight).sum();
    let wet_weight: f64 = weighted.iter().filter(|s| is_wet(s)).map(|s| s.weight).sum();
    let coverage = wet_weight / total_weight;

    let values: Vec<f64> = weighted.iter().map(|s| s.value).collect();
    let (confidence_interval, quartiles) = spread(&values);

    Some(Ok(PrecipitationHour {
        mm,
        probability: probability(coverage, mm, hour, params),
        wet_models,
        confidence_interval,
        quartiles,
        resolution,
    }))
}
