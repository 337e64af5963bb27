//! Weather-code consensus ("smart barycentric").
//!
//! Codes are bucketed into configured severity groups. The group with the
//! largest weighted vote wins (earlier, more hazardous groups win ties);
//! inside it a code holding a weighted majority is taken as-is, otherwise
//! the weighted barycentre of the group's ordered codes is used.
//!
//! Hazards are evaluated over every vote, not just the winner, so a lone
//! thunderstorm among calm models is still reported.
//!
//! Failure ladder: smart barycentric, then plain mode (most frequent
//! recognised code), then emergency mode (most frequent integral code).
//! Both fallbacks carry an empty risk vector.

use std::collections::BTreeMap;

use crate::error::ConsensusError;
use crate::model_config::CategoricalParams;
use crate::models::{FallbackLevel, Resolution, RiskKind, RiskVector};

// ---

/// One categorical vote.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vote {
    pub code: f64,
    pub weight: f64,
}

/// Outcome of the full fallback ladder.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    // ---
    pub code: u8,
    pub risk: RiskVector,
    pub group: Option<String>,
    pub confidence: f64,
    pub resolution: Resolution,
}

/// Hazards implied by a single WMO code.
pub fn hazards_of(code: u8) -> RiskVector {
    // ---
    let mut risk = RiskVector::default();
    match code {
        95 => risk.set(RiskKind::Thunderstorm),
        96 | 99 => {
            risk.set(RiskKind::Thunderstorm);
            risk.set(RiskKind::Hail);
        }
        56 | 57 | 66 | 67 => risk.set(RiskKind::Ice),
        45 | 48 => risk.set(RiskKind::Fog),
        _ => {}
    }
    risk
}

fn parse_code(value: f64) -> Option<u8> {
    if value.is_finite() && value.fract() == 0.0 && (0.0..=255.0).contains(&value) {
        Some(value as u8)
    } else {
        None
    }
}

/// Hazards reached by at least `min_count` votes.
fn counted_hazards(codes: impl Iterator<Item = u8>, min_count: usize) -> RiskVector {
    // ---
    let mut counts: BTreeMap<RiskKind, usize> = BTreeMap::new();
    for code in codes {
        for kind in hazards_of(code).events() {
            *counts.entry(kind).or_default() += 1;
        }
    }

    let mut risk = RiskVector::default();
    for (kind, count) in counts {
        if count >= min_count.max(1) {
            risk.set(kind);
        }
    }
    risk
}

#[derive(Debug, Clone, PartialEq)]
pub struct Barycentric {
    // ---
    pub code: u8,
    pub group: String,
    pub confidence: f64,
    pub risk: RiskVector,
}

/// Primary algorithm.
///
/// Codes outside every group are ignored as long as at least one vote is
/// recognised. Non-finite or non-integral votes are an error.
pub fn smart_barycentric(
    votes: &[Vote],
    params: &CategoricalParams,
) -> Result<Barycentric, ConsensusError> {
    // ---
    if votes.is_empty() {
        return Err(ConsensusError::Empty);
    }

    let mut codes = Vec::with_capacity(votes.len());
    for vote in votes {
        if !vote.code.is_finite() || !vote.weight.is_finite() {
            return Err(ConsensusError::NonFinite(format!(
                "code {} weight {}",
                vote.code, vote.weight
            )));
        }
        let code = parse_code(vote.code).ok_or_else(|| {
            ConsensusError::Degenerate(format!("non-integral code {}", vote.code))
        })?;
        codes.push((code, vote.weight));
    }

    let recognised: Vec<(u8, usize, f64)> = codes
        .iter()
        .filter_map(|&(code, weight)| params.group_of(code).map(|g| (code, g, weight)))
        .collect();
    if recognised.is_empty() {
        return Err(ConsensusError::UnknownCode(votes[0].code));
    }

    let mut group_weights = vec![0.0; params.severity_groups.len()];
    for &(_, group, weight) in &recognised {
        group_weights[group] += weight;
    }
    let total: f64 = group_weights.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return Err(ConsensusError::Degenerate(format!("total weight {total}")));
    }

    // Strictly greater: on a tie the earlier (more hazardous) group stays.
    let mut winner = 0;
    for (g, &w) in group_weights.iter().enumerate() {
        if w > group_weights[winner] + f64::EPSILON {
            winner = g;
        }
    }
    let group = &params.severity_groups[winner];
    let group_weight = group_weights[winner];

    let mut code_weights: BTreeMap<u8, f64> = BTreeMap::new();
    for &(code, g, weight) in &recognised {
        if g == winner {
            *code_weights.entry(code).or_default() += weight;
        }
    }

    let majority = code_weights
        .iter()
        .find(|(_, &w)| w > 0.5 * group_weight)
        .map(|(&code, _)| code);

    let code = match majority {
        Some(code) => code,
        None => {
            let position = code_weights
                .iter()
                .map(|(code, w)| {
                    let index = group.codes.iter().position(|c| c == code).unwrap_or(0);
                    index as f64 * w
                })
                .sum::<f64>()
                / group_weight;
            let index = (position.round() as usize).min(group.codes.len() - 1);
            group.codes[index]
        }
    };

    let risk = hazards_of(code).union(counted_hazards(
        codes.iter().map(|&(c, _)| c),
        params.risk_min_count,
    ));

    Ok(Barycentric {
        code,
        group: group.name.clone(),
        confidence: group_weight / total,
        risk,
    })
}

/// Most frequent recognised code and its share of recognised votes.
///
/// Ties prefer the more hazardous group, then the higher code.
pub fn plain_mode(votes: &[Vote], params: &CategoricalParams) -> Result<(u8, f64), ConsensusError> {
    // ---
    let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
    for code in votes.iter().filter_map(|v| parse_code(v.code)) {
        if params.group_of(code).is_some() {
            *counts.entry(code).or_default() += 1;
        }
    }

    let total: usize = counts.values().sum();
    counts
        .into_iter()
        .max_by(|(a, ca), (b, cb)| {
            ca.cmp(cb)
                .then_with(|| params.group_of(*b).cmp(&params.group_of(*a)))
                .then_with(|| a.cmp(b))
        })
        .map(|(code, count)| (code, count as f64 / total as f64))
        .ok_or_else(|| {
            ConsensusError::Degenerate("no recognised weather code".to_string())
        })
}

/// Most frequent integral code, counted by hand. Ties prefer the higher code.
pub fn emergency_mode(votes: &[Vote]) -> Option<(u8, f64)> {
    // ---
    let mut counts = [0usize; 256];
    let mut total = 0usize;
    for vote in votes {
        if let Some(code) = parse_code(vote.code) {
            counts[code as usize] += 1;
            total += 1;
        }
    }
    if total == 0 {
        return None;
    }

    let mut best = 0usize;
    for code in 0..counts.len() {
        if counts[code] >= counts[best] && counts[code] > 0 {
            best = code;
        }
    }
    Some((best as u8, counts[best] as f64 / total as f64))
}

/// Run the fallback ladder. `None` when no rung produces a code.
pub fn categorical_consensus(votes: &[Vote], params: &CategoricalParams) -> Option<Verdict> {
    // ---
    if votes.is_empty() {
        return None;
    }

    let primary = match smart_barycentric(votes, params) {
        Ok(b) => {
            return Some(Verdict {
                code: b.code,
                risk: b.risk,
                group: Some(b.group),
                confidence: b.confidence,
                resolution: Resolution::Primary,
            })
        }
        Err(e) => e,
    };
    tracing::debug!("Smart barycentric failed ({}), trying plain mode", primary);

    let plain = match plain_mode(votes, params) {
        Ok((code, share)) => {
            return Some(Verdict {
                code,
                risk: RiskVector::default(),
                group: None,
                confidence: share,
                resolution: Resolution::Fallback {
                    level: FallbackLevel::Plain,
                    reason: primary.to_string(),
                },
            })
        }
        Err(e) => e,
    };
    tracing::debug!("Plain mode failed ({}), using emergency count", plain);

    emergency_mode(votes).map(|(code, share)| Verdict {
        code,
        risk: RiskVector::default(),
        group: None,
        confidence: share,
        resolution: Resolution::Fallback {
            level: FallbackLevel::Emergency,
            reason: format!("{primary}; plain mode: {plain}"),
        },
    })
}

/// Fresh consensus over the hourly codes of a time slot, one vote per hour.
pub fn slot_consensus(codes: &[u8], params: &CategoricalParams) -> Option<(u8, RiskVector)> {
    // ---
    let votes: Vec<Vote> = codes
        .iter()
        .map(|&code| Vote {
            code: f64::from(code),
            weight: 1.0,
        })
        .collect();
    categorical_consensus(&votes, params).map(|v| (v.code, v.risk))
}
