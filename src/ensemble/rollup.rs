//! Hourly → time-slot → daily rollup.
//!
//! Daily extremes read instant-aligned hours; precipitation totals read the
//! precipitation series through its configured alignment. Each time slot
//! runs a fresh categorical consensus over the unshifted hourly codes that
//! fall inside it, independent of the display-shifted hourly series.

use chrono::{NaiveDate, NaiveDateTime};

use crate::model_config::CategoricalParams;
use crate::models::{
    round_to, CategoricalConsensus, DailyAggregate, HourlyRecord, RiskVector, SolarDay, TimeSlot,
};

use super::alignment::{window_indices, Alignment};
use super::categorical::slot_consensus;

/// Local-hour bounds `[start, end)` of the four daily slots.
pub const SLOT_BOUNDS: [(u32, u32); 4] = [(0, 6), (6, 12), (12, 18), (18, 24)];

// ---

/// Inputs of the rollup besides the hourly records.
#[derive(Debug, Clone, Copy)]
pub struct RollupContext<'a> {
    /// Unshifted weather-code consensus, index-aligned with the hourly records.
    pub slot_codes: &'a [Option<CategoricalConsensus>],
    /// Absent when the weather-code parameter is unusable.
    pub categorical: Option<&'a CategoricalParams>,
    pub precipitation_alignment: Alignment,
    pub solar: &'a [SolarDay],
}

fn dates(times: &[NaiveDateTime]) -> Vec<NaiveDate> {
    // ---
    let mut dates: Vec<NaiveDate> = Vec::new();
    for t in times {
        let date = t.date();
        if dates.last() != Some(&date) {
            dates.push(date);
        }
    }
    dates
}

fn precipitation_sum(hourly: &[HourlyRecord], indices: &[usize]) -> f64 {
    let total: f64 = indices
        .iter()
        .filter_map(|&i| hourly[i].precipitation_mm())
        .sum();
    round_to(total, 1)
}

fn time_slot(
    hourly: &[HourlyRecord],
    times: &[NaiveDateTime],
    date: NaiveDate,
    (start_hour, end_hour): (u32, u32),
    ctx: &RollupContext<'_>,
) -> TimeSlot {
    // ---
    let instant = window_indices(times, date, start_hour, end_hour, Alignment::Instant);
    if instant.is_empty() {
        return TimeSlot {
            start_hour,
            end_hour,
            weather_code: None,
            risks: Vec::new(),
            precipitation_mm: 0.0,
        };
    }

    let hours: Vec<&CategoricalConsensus> = instant
        .iter()
        .filter_map(|&i| ctx.slot_codes.get(i).and_then(Option::as_ref))
        .collect();
    let codes: Vec<u8> = hours.iter().map(|c| c.code).collect();

    let (weather_code, slot_risk) = match ctx.categorical.and_then(|p| slot_consensus(&codes, p)) {
        Some((code, risk)) => (Some(code), risk),
        None => (None, RiskVector::default()),
    };
    let risk = hours
        .iter()
        .fold(slot_risk, |acc, c| acc.union(c.risk));

    let precipitation = window_indices(
        times,
        date,
        start_hour,
        end_hour,
        ctx.precipitation_alignment,
    );

    TimeSlot {
        start_hour,
        end_hour,
        weather_code,
        risks: risk.events(),
        precipitation_mm: precipitation_sum(hourly, &precipitation),
    }
}

/// Daily aggregates, one per local calendar day present in `hourly`.
pub fn rollup(hourly: &[HourlyRecord], ctx: &RollupContext<'_>) -> Vec<DailyAggregate> {
    // ---
    let times: Vec<NaiveDateTime> = hourly.iter().map(|h| h.time).collect();

    dates(&times)
        .into_iter()
        .map(|date| {
            let instant = window_indices(&times, date, 0, 24, Alignment::Instant);
            let temps: Vec<f64> = instant
                .iter()
                .filter_map(|&i| hourly[i].temperature_value())
                .collect();
            let uv_max = instant
                .iter()
                .filter_map(|&i| hourly[i].uv_index)
                .reduce(f64::max);

            let precipitation =
                window_indices(&times, date, 0, 24, ctx.precipitation_alignment);
            let solar = ctx.solar.iter().find(|s| s.date == date);

            DailyAggregate {
                date,
                temp_min: temps.iter().copied().reduce(f64::min),
                temp_max: temps.iter().copied().reduce(f64::max),
                uv_max,
                precipitation_total: precipitation_sum(hourly, &precipitation),
                slots: SLOT_BOUNDS
                    .iter()
                    .map(|&bounds| time_slot(hourly, &times, date, bounds, ctx))
                    .collect(),
                sunrise: solar.and_then(|s| s.sunrise),
                sunset: solar.and_then(|s| s.sunset),
            }
        })
        .collect()
}
