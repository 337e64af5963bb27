//! Temporal alignment of hourly series to time windows.
//!
//! A value timestamped `t` either describes the instant `t` (temperature,
//! weather code) or the hour ending at `t` (precipitation). Every window
//! evaluation in the rollup goes through [`window_indices`] so that daily
//! totals and time slots share one formula.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

// ---

/// Interpretation of the timestamp attached to a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    /// Value at `t` describes conditions at `t`.
    Instant,
    /// Value at `t` describes the interval `(t - 1h, t]`.
    PrecedingHour,
}

/// Indices of `times` that contribute to the local window `[start_hour, end_hour)` of `date`.
///
/// For [`Alignment::PrecedingHour`] every instant index `i` maps to `i + 1`,
/// dropping indices past the end of the horizon.
pub fn window_indices(
    times: &[NaiveDateTime],
    date: NaiveDate,
    start_hour: u32,
    end_hour: u32,
    alignment: Alignment,
) -> Vec<usize> {
    // ---
    let instant = times
        .iter()
        .enumerate()
        .filter(|(_, t)| t.date() == date && (start_hour..end_hour).contains(&t.hour()))
        .map(|(i, _)| i);

    match alignment {
        Alignment::Instant => instant.collect(),
        Alignment::PrecedingHour => instant
            .map(|i| i + 1)
            .filter(|&i| i < times.len())
            .collect(),
    }
}

/// Reassign the value at `h + 1` to `h`; the last element keeps its own value.
///
/// Returns `(source_index, value)` pairs so callers can record the shift.
pub fn realign_preceding<T: Clone>(values: &[T]) -> Vec<(usize, T)> {
    // ---
    let last = values.len().saturating_sub(1);
    (0..values.len())
        .map(|h| {
            let source = if h < last { h + 1 } else { h };
            (source, values[source].clone())
        })
        .collect()
}
