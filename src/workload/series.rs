//! Dense daily series for one athlete.
//!
//! EWMA and rolling statistics assume one row per calendar day, so days
//! without a record are filled as rest days with zero load.

use chrono::{Days, NaiveDate};
use std::collections::BTreeMap;

use crate::workload::types::{DailyRecord, DateRange, Metrics};

/// Metrics map keys of the bilateral counters.
pub const DIVE_LEFT: &str = "dive_left_count";
pub const DIVE_RIGHT: &str = "dive_right_count";
pub const TURN_LEFT: &str = "ima_band2_left_count";
pub const TURN_RIGHT: &str = "ima_band2_right_count";

/// One calendar day of the dense series.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DenseDay {
    pub date: NaiveDate,
    pub total_distance: f64,
    pub total_player_load: f64,
    pub hsr_distance: f64,
    pub dive_load: f64,
    pub jump_count: f64,
    pub high_decel_count: f64,
    pub mean_heart_rate: Option<f64>,
    pub avg_time_to_feet: Option<f64>,
    pub dive_left: f64,
    pub dive_right: f64,
    pub turn_left: f64,
    pub turn_right: f64,
    /// True when no record existed for this day.
    pub is_rest_day: bool,
    pub metrics: Metrics,
}

impl DenseDay {
    fn from_record(record: &DailyRecord) -> Self {
        Self {
            date: record.date,
            total_distance: record.total_distance,
            total_player_load: record.total_player_load,
            hsr_distance: record.hsr_distance,
            dive_load: record.dive_load,
            jump_count: record.jump_count,
            high_decel_count: record.high_decel_count,
            mean_heart_rate: record.mean_heart_rate,
            avg_time_to_feet: record.avg_time_to_feet,
            dive_left: record.metric_or_zero(DIVE_LEFT),
            dive_right: record.metric_or_zero(DIVE_RIGHT),
            turn_left: record.metric_or_zero(TURN_LEFT),
            turn_right: record.metric_or_zero(TURN_RIGHT),
            is_rest_day: false,
            metrics: record.metrics.clone(),
        }
    }

    fn rest_day(date: NaiveDate) -> Self {
        Self {
            date,
            is_rest_day: true,
            ..Default::default()
        }
    }
}

/// Builds a gap-free series from the first to the last recorded day.
///
/// `records` must belong to a single athlete; order does not matter. When
/// `range` is given, only records inside it are used, and the grid spans the
/// first to last of those records.
pub fn build_dense_series(records: &[DailyRecord], range: Option<DateRange>) -> Vec<DenseDay> {
    let by_date: BTreeMap<NaiveDate, &DailyRecord> = records
        .iter()
        .filter(|r| range.is_none_or(|rg| rg.contains(r.date)))
        .map(|r| (r.date, r))
        .collect();

    let (Some(first), Some(last)) = (
        by_date.keys().next().copied(),
        by_date.keys().next_back().copied(),
    ) else {
        return Vec::new();
    };

    let mut series = Vec::with_capacity((last - first).num_days() as usize + 1);
    let mut date = first;
    loop {
        series.push(match by_date.get(&date) {
            Some(record) => DenseDay::from_record(record),
            None => DenseDay::rest_day(date),
        });
        if date >= last {
            break;
        }
        match date.checked_add_days(Days::new(1)) {
            Some(next) => date = next,
            None => break,
        }
    }

    series
}
