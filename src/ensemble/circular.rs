//! Circular consensus for wind direction.
//!
//! Bearings are averaged as unit vectors so that 350° and 10° meet at 0°
//! rather than 180°. Samples are then reweighted by a Gaussian kernel of
//! their angular distance to that first mean.

use crate::error::ConsensusError;
use crate::models::{round_to, FallbackLevel, ModelWeight, Resolution, ScalarDebug};

use super::scalar::{check_finite, Weighted};
use super::Sample;

/// σ used by the fallback; wide enough to make the kernel flat.
pub const WIDE_SIGMA_DEG: f64 = 1.0e6;

/// Below this mean resultant length the directions cancel out.
const MIN_RESULTANT: f64 = 1.0e-9;

// ---

/// Smallest angle between two bearings, in `[0, 180]`.
pub fn angular_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(360.0);
    d.min(360.0 - d)
}

/// Bearing in `[0, 360)`.
pub fn normalize_bearing(deg: f64) -> f64 {
    let d = deg.rem_euclid(360.0);
    if d >= 360.0 {
        0.0
    } else {
        d
    }
}

/// Weighted circular mean of `(bearing, weight)` pairs.
fn weighted_mean<'a>(pairs: impl Iterator<Item = (f64, f64)> + 'a) -> Result<f64, ConsensusError> {
    // ---
    let (mut sin, mut cos, mut total) = (0.0, 0.0, 0.0);
    for (deg, weight) in pairs {
        let rad = deg.to_radians();
        sin += weight * rad.sin();
        cos += weight * rad.cos();
        total += weight;
    }

    if !(total.is_finite() && total > 0.0) {
        return Err(ConsensusError::Degenerate(format!("total weight {total}")));
    }
    let resultant = sin.hypot(cos) / total;
    if resultant < MIN_RESULTANT {
        return Err(ConsensusError::Degenerate("directions cancel out".to_string()));
    }

    Ok(normalize_bearing(sin.atan2(cos).to_degrees()))
}

/// Gaussian-weighted circular mean with kernel width `sigma_deg`.
pub fn circular_gaussian(samples: &[Sample], sigma_deg: f64) -> Result<Weighted, ConsensusError> {
    // ---
    if samples.is_empty() {
        return Err(ConsensusError::Empty);
    }
    check_finite(samples)?;
    if !(sigma_deg.is_finite() && sigma_deg > 0.0) {
        return Err(ConsensusError::Degenerate(format!("sigma {sigma_deg}")));
    }

    let center = weighted_mean(samples.iter().map(|s| (s.value, s.weight)))?;

    let weights: Vec<ModelWeight> = samples
        .iter()
        .map(|s| {
            let z = angular_distance(s.value, center) / sigma_deg;
            ModelWeight {
                model: s.model,
                value: s.value,
                weight: s.weight * (-0.5 * z * z).exp(),
            }
        })
        .collect();

    let value = weighted_mean(weights.iter().map(|w| (w.value, w.weight)))?;

    Ok(Weighted {
        value,
        center,
        sigma: sigma_deg,
        weights,
    })
}

fn into_consensus(weighted: Weighted, resolution: Resolution) -> (f64, ScalarDebug) {
    (
        normalize_bearing(round_to(weighted.value, 1)),
        ScalarDebug {
            center: weighted.center,
            sigma: weighted.sigma,
            weights: weighted.weights,
            resolution,
        },
    )
}

/// Direction consensus rounded to 0.1°.
///
/// On failure the computation is repeated with [`WIDE_SIGMA_DEG`]. If that
/// fails too (the directions cancel exactly) the reason is returned and the
/// hour has no direction.
pub fn circular_consensus(
    samples: &[Sample],
    sigma_deg: f64,
) -> Option<Result<(f64, ScalarDebug), String>> {
    // ---
    if samples.is_empty() {
        return None;
    }

    let result = match circular_gaussian(samples, sigma_deg) {
        Ok(w) => Ok(into_consensus(w, Resolution::Primary)),
        Err(primary) => match circular_gaussian(samples, WIDE_SIGMA_DEG) {
            Ok(w) => Ok(into_consensus(
                w,
                Resolution::Fallback {
                    level: FallbackLevel::WideSigma,
                    reason: primary.to_string(),
                },
            )),
            Err(wide) => Err(format!("{primary}; wide sigma: {wide}")),
        },
    };
    Some(result)
}
