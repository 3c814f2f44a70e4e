//! Reduces raw session rows into one [`DailyRecord`] per athlete and day.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::parser::{ATHLETE_ID_COLUMNS, DATE_COLUMNS, parse_date};
use crate::workload::types::{AthleteScope, DailyRecord, MetricValue, Metrics, RawSessionRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reducer {
    Sum,
    Max,
    Min,
    Mean,
}

/// Well-known columns: canonical name, accepted column names (first present
/// wins per row) and how rows of the same day are combined.
static COLUMNS: &[(&str, &[&str], Reducer)] = &[
    ("total_distance", &["total_distance", "distance"], Reducer::Sum),
    ("total_duration", &["total_duration", "duration"], Reducer::Sum),
    ("total_player_load", &["total_player_load", "player_load"], Reducer::Sum),
    ("total_jumps", &["total_jumps", "jump_count"], Reducer::Sum),
    ("total_dives", &["total_dives", "dive_count"], Reducer::Sum),
    ("dive_left_count", &["dive_left_count", "total_dives_left"], Reducer::Sum),
    ("dive_right_count", &["dive_right_count", "total_dives_right"], Reducer::Sum),
    ("dive_centre_count", &["dive_centre_count", "total_dives_centre"], Reducer::Sum),
    ("total_dive_load", &["total_dive_load", "dive_load"], Reducer::Sum),
    ("total_dive_load_left", &["total_dive_load_left"], Reducer::Sum),
    ("total_dive_load_right", &["total_dive_load_right"], Reducer::Sum),
    ("total_dive_load_centre", &["total_dive_load_centre"], Reducer::Sum),
    ("total_time_to_feet", &["total_time_to_feet"], Reducer::Sum),
    ("total_time_to_feet_left", &["total_time_to_feet_left"], Reducer::Sum),
    ("total_time_to_feet_right", &["total_time_to_feet_right"], Reducer::Sum),
    ("total_time_to_feet_centre", &["total_time_to_feet_centre"], Reducer::Sum),
    ("high_decel_count", &["high_decel_count", "high_intensity_decel_count"], Reducer::Sum),
    ("ima_band2_decel_count", &["ima_band2_decel_count"], Reducer::Sum),
    ("ima_band3_decel_count", &["ima_band3_decel_count"], Reducer::Sum),
    ("ima_band2_left_count", &["ima_band2_left_count"], Reducer::Sum),
    ("ima_band2_right_count", &["ima_band2_right_count"], Reducer::Sum),
    ("max_vel", &["max_vel", "max_velocity"], Reducer::Max),
    ("max_heart_rate", &["max_heart_rate"], Reducer::Max),
    ("min_heart_rate", &["min_heart_rate"], Reducer::Min),
    ("mean_heart_rate", &["mean_heart_rate", "avg_heart_rate"], Reducer::Mean),
];

/// Columns promoted to fixed daily fields rather than kept in the metrics map.
const FIXED_COLUMNS: &[&str] = &[
    "total_distance",
    "total_duration",
    "total_player_load",
    "total_jumps",
    "total_dives",
    "total_dive_load",
    "total_time_to_feet",
    "high_decel_count",
    "max_vel",
    "mean_heart_rate",
];

/// Descriptive columns that may look numeric but are never aggregated.
const METADATA_COLUMNS: &[&str] = &[
    "athlete_name",
    "session_name",
    "SessionName",
    "activity_name",
    "period_name",
    "date_name",
    "day_code",
    "is_injected",
];

const METADATA_SUFFIXES: &[&str] = &["_id", "_time", "_dt"];

const MATCH_NAME_COLUMNS: &[&str] = &["activity_name", "period_name", "date_name"];

const MATCH_KEYWORDS: &[&str] = &["match", "game", "試合"];

/// Result of one aggregation pass.
#[derive(Debug, Default)]
pub struct Aggregation {
    /// One record per (athlete, date), sorted by athlete then date.
    pub records: Vec<DailyRecord>,
    pub rows_read: usize,
    pub skipped_no_athlete: usize,
    pub skipped_no_date: usize,
}

#[derive(Debug, Default)]
struct DayAccumulator {
    sums: BTreeMap<&'static str, f64>,
    maxes: BTreeMap<&'static str, f64>,
    mins: BTreeMap<&'static str, f64>,
    means: BTreeMap<&'static str, (f64, usize)>,
    extras: BTreeMap<String, f64>,
    activity_names: BTreeSet<String>,
    period_names: BTreeSet<String>,
    is_match: bool,
}

impl DayAccumulator {
    fn push(&mut self, row: &RawSessionRow) {
        for &(name, columns, reducer) in COLUMNS {
            let Some(value) = row.first_number(columns) else {
                continue;
            };
            match reducer {
                Reducer::Sum => *self.sums.entry(name).or_default() += value,
                Reducer::Max => {
                    let slot = self.maxes.entry(name).or_insert(value);
                    *slot = slot.max(value);
                }
                Reducer::Min => {
                    let slot = self.mins.entry(name).or_insert(value);
                    *slot = slot.min(value);
                }
                Reducer::Mean => {
                    let slot = self.means.entry(name).or_default();
                    slot.0 += value;
                    slot.1 += 1;
                }
            }
        }

        for key in row.fields.keys() {
            if is_reserved_column(key) {
                continue;
            }
            if let Some(value) = row.number(key) {
                *self.extras.entry(key.clone()).or_default() += value;
            }
        }

        if let Some(name) = row.text("activity_name") {
            self.activity_names.insert(name.to_string());
        }
        if let Some(name) = row.text("period_name") {
            self.period_names.insert(name.to_string());
        }
        if is_match_row(row) {
            self.is_match = true;
        }
    }

    fn sum(&self, name: &str) -> f64 {
        self.sums.get(name).copied().unwrap_or(0.0)
    }

    /// Direct column when any row supplied it, otherwise the sum of the parts.
    fn total_or_parts(&self, total: &str, parts: &[&str]) -> f64 {
        if self.sums.contains_key(total) {
            self.sum(total)
        } else {
            parts.iter().map(|p| self.sum(p)).sum()
        }
    }

    fn into_record(self, athlete_id: String, date: NaiveDate, config: &EngineConfig) -> DailyRecord {
        let hsr_distance = config
            .hsr_columns()
            .iter()
            .map(|c| self.extras.get(c).copied().unwrap_or(0.0))
            .sum();

        let dive_count = self.total_or_parts(
            "total_dives",
            &["dive_left_count", "dive_right_count", "dive_centre_count"],
        );
        let dive_load = self.total_or_parts(
            "total_dive_load",
            &[
                "total_dive_load_left",
                "total_dive_load_right",
                "total_dive_load_centre",
            ],
        );
        let high_decel_count = self.total_or_parts(
            "high_decel_count",
            &["ima_band2_decel_count", "ima_band3_decel_count"],
        );
        let time_to_feet = self.total_or_parts(
            "total_time_to_feet",
            &[
                "total_time_to_feet_left",
                "total_time_to_feet_right",
                "total_time_to_feet_centre",
            ],
        );
        let avg_time_to_feet = (dive_count > 0.0).then(|| time_to_feet / dive_count);

        let mean_heart_rate = self
            .means
            .get("mean_heart_rate")
            .filter(|(_, n)| *n > 0)
            .map(|(total, n)| total / *n as f64);

        let mut metrics = Metrics::new();
        let reduced = self
            .sums
            .iter()
            .chain(self.maxes.iter())
            .chain(self.mins.iter());
        for (name, value) in reduced {
            if !FIXED_COLUMNS.contains(name) {
                metrics.insert(name.to_string(), MetricValue::Number(*value));
            }
        }
        for (name, value) in &self.extras {
            metrics.insert(name.clone(), MetricValue::Number(*value));
        }
        if !self.activity_names.is_empty() {
            metrics.insert(
                "activity_name_set".to_string(),
                MetricValue::TextList(self.activity_names.iter().cloned().collect()),
            );
        }
        if !self.period_names.is_empty() {
            metrics.insert(
                "period_name_set".to_string(),
                MetricValue::TextList(self.period_names.iter().cloned().collect()),
            );
        }

        DailyRecord {
            athlete_id,
            date,
            total_duration: self.sum("total_duration"),
            total_distance: self.sum("total_distance"),
            total_player_load: self.sum("total_player_load"),
            max_velocity: self.maxes.get("max_vel").copied(),
            mean_heart_rate,
            hsr_distance,
            high_decel_count,
            dive_count,
            dive_load,
            avg_time_to_feet,
            jump_count: self.sum("total_jumps"),
            is_match_day: self.is_match,
            md_offset: None,
            md_phase: String::new(),
            metrics,
        }
    }
}

fn is_reserved_column(key: &str) -> bool {
    COLUMNS.iter().any(|(_, columns, _)| columns.contains(&key))
        || ATHLETE_ID_COLUMNS.contains(&key)
        || DATE_COLUMNS.contains(&key)
        || METADATA_COLUMNS.contains(&key)
        || METADATA_SUFFIXES.iter().any(|s| key.ends_with(s))
}

fn is_match_row(row: &RawSessionRow) -> bool {
    MATCH_NAME_COLUMNS.iter().filter_map(|c| row.text(c)).any(|name| {
        let name = name.to_lowercase();
        MATCH_KEYWORDS.iter().any(|k| name.contains(k))
    })
}

fn resolve_athlete(row: &RawSessionRow) -> Option<&str> {
    row.athlete_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .or_else(|| row.first_text(ATHLETE_ID_COLUMNS))
}

fn resolve_date(row: &RawSessionRow) -> Option<NaiveDate> {
    row.date.or_else(|| {
        DATE_COLUMNS
            .iter()
            .filter_map(|c| row.text(c))
            .find_map(parse_date)
    })
}

/// Signed day offset to the nearest match day; ties go to the earlier match.
pub fn nearest_match_offset(match_dates: &[NaiveDate], date: NaiveDate) -> Option<i64> {
    let mut best: Option<i64> = None;
    for match_date in match_dates {
        let offset = (date - *match_date).num_days();
        if best.is_none_or(|b| offset.abs() < b.abs()) {
            best = Some(offset);
        }
    }
    best
}

/// Match-day phase label: `MD`, `MD+n`, `MD-n`, or empty without matches.
pub fn md_phase(md_offset: Option<i64>) -> String {
    match md_offset {
        None => String::new(),
        Some(0) => "MD".to_string(),
        Some(n) if n > 0 => format!("MD+{n}"),
        Some(n) => format!("MD{n}"),
    }
}

/// Groups rows by (athlete, day) and reduces each group to a [`DailyRecord`].
///
/// Rows without an athlete id or without a resolvable date are skipped and
/// counted. Rows of athletes outside `scope` are ignored.
pub fn aggregate_rows(
    rows: &[RawSessionRow],
    scope: &AthleteScope,
    config: &EngineConfig,
) -> Aggregation {
    let mut groups: BTreeMap<(String, NaiveDate), DayAccumulator> = BTreeMap::new();
    let mut skipped_no_athlete = 0;
    let mut skipped_no_date = 0;

    for row in rows {
        let Some(athlete_id) = resolve_athlete(row) else {
            skipped_no_athlete += 1;
            continue;
        };
        if !scope.contains(athlete_id) {
            continue;
        }
        let Some(date) = resolve_date(row) else {
            skipped_no_date += 1;
            continue;
        };
        groups
            .entry((athlete_id.to_string(), date))
            .or_default()
            .push(row);
    }

    let mut match_dates: BTreeMap<String, Vec<NaiveDate>> = BTreeMap::new();
    for ((athlete_id, date), acc) in &groups {
        if acc.is_match {
            match_dates.entry(athlete_id.clone()).or_default().push(*date);
        }
    }
    debug!(
        groups = groups.len(),
        athletes_with_matches = match_dates.len(),
        "Rows grouped by athlete and day"
    );

    let records: Vec<DailyRecord> = groups
        .into_iter()
        .map(|((athlete_id, date), acc)| {
            let md_offset = match_dates
                .get(&athlete_id)
                .and_then(|dates| nearest_match_offset(dates, date));
            let mut record = acc.into_record(athlete_id, date, config);
            record.md_offset = md_offset;
            record.md_phase = md_phase(md_offset);
            record
        })
        .collect();

    info!(
        rows_read = rows.len(),
        daily_records = records.len(),
        skipped_no_athlete,
        skipped_no_date,
        "Raw rows aggregated"
    );

    Aggregation {
        records,
        rows_read: rows.len(),
        skipped_no_athlete,
        skipped_no_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn row(athlete: &str, date: Option<NaiveDate>, cells: &[(&str, &str)]) -> RawSessionRow {
        RawSessionRow {
            athlete_id: (!athlete.is_empty()).then(|| athlete.to_string()),
            date,
            fields: cells
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    fn aggregate(rows: &[RawSessionRow]) -> Aggregation {
        aggregate_rows(rows, &AthleteScope::All, &EngineConfig::default())
    }

    #[test]
    fn test_two_sessions_same_day_are_summed() {
        let rows = vec![
            row("A1", Some(day(1)), &[("total_distance", "10"), ("total_player_load", "5")]),
            row("A1", Some(day(1)), &[("total_distance", "5"), ("total_player_load", "2")]),
        ];
        let agg = aggregate(&rows);

        assert_eq!(agg.records.len(), 1);
        let rec = &agg.records[0];
        assert_eq!(rec.athlete_id, "A1");
        assert_eq!(rec.date, day(1));
        assert_eq!(rec.total_distance, 15.0);
        assert_eq!(rec.total_player_load, 7.0);
    }

    #[test]
    fn test_missing_and_unparseable_sum_values_count_as_zero() {
        let rows = vec![
            row("A1", Some(day(1)), &[("total_distance", "abc")]),
            row("A1", Some(day(1)), &[("total_distance", "")]),
            row("A1", Some(day(1)), &[("total_player_load", "3")]),
        ];
        let rec = &aggregate(&rows).records[0];
        assert_eq!(rec.total_distance, 0.0);
        assert_eq!(rec.total_player_load, 3.0);
    }

    #[test]
    fn test_max_and_mean_columns() {
        let rows = vec![
            row("A1", Some(day(1)), &[("max_vel", "7.5"), ("mean_heart_rate", "140")]),
            row("A1", Some(day(1)), &[("max_velocity", "8.25"), ("mean_heart_rate", "160")]),
            row("A1", Some(day(1)), &[("max_vel", "")]),
        ];
        let rec = &aggregate(&rows).records[0];
        assert_eq!(rec.max_velocity, Some(8.25));
        assert_eq!(rec.mean_heart_rate, Some(150.0));
    }

    #[test]
    fn test_mean_of_nothing_is_none() {
        let rows = vec![row("A1", Some(day(1)), &[("total_distance", "100")])];
        let rec = &aggregate(&rows).records[0];
        assert_eq!(rec.mean_heart_rate, None);
        assert_eq!(rec.max_velocity, None);
    }

    #[test]
    fn test_min_heart_rate_kept_in_metrics() {
        let rows = vec![
            row("A1", Some(day(1)), &[("min_heart_rate", "62")]),
            row("A1", Some(day(1)), &[("min_heart_rate", "58")]),
        ];
        let rec = &aggregate(&rows).records[0];
        assert_eq!(rec.metric_or_zero("min_heart_rate"), 58.0);
    }

    #[test]
    fn test_hsr_from_top_velocity_bands() {
        let rows = vec![
            row(
                "A1",
                Some(day(1)),
                &[
                    ("velocity_band4_total_distance", "900"),
                    ("velocity_band5_total_distance", "120"),
                    ("velocity_band6_total_distance", "30"),
                ],
            ),
            row("A1", Some(day(1)), &[("velocity_band5_total_distance", "50")]),
        ];
        let rec = &aggregate(&rows).records[0];
        assert_eq!(rec.hsr_distance, 200.0);
        assert_eq!(rec.metric_or_zero("velocity_band4_total_distance"), 900.0);
    }

    #[test]
    fn test_dive_total_falls_back_to_sides() {
        let rows = vec![row(
            "G1",
            Some(day(1)),
            &[
                ("dive_left_count", "3"),
                ("dive_right_count", "2"),
                ("dive_centre_count", "1"),
                ("total_time_to_feet_left", "4.5"),
                ("total_time_to_feet_right", "3.0"),
                ("total_time_to_feet_centre", "1.5"),
                ("total_dive_load_left", "20"),
                ("total_dive_load_right", "10"),
            ],
        )];
        let rec = &aggregate(&rows).records[0];
        assert_eq!(rec.dive_count, 6.0);
        assert_eq!(rec.dive_load, 30.0);
        assert_eq!(rec.avg_time_to_feet, Some(1.5));
        assert_eq!(rec.metric_or_zero("dive_left_count"), 3.0);
    }

    #[test]
    fn test_direct_dive_total_wins_over_sides() {
        let rows = vec![row(
            "G1",
            Some(day(1)),
            &[("total_dives", "10"), ("dive_left_count", "3")],
        )];
        let rec = &aggregate(&rows).records[0];
        assert_eq!(rec.dive_count, 10.0);
    }

    #[test]
    fn test_time_to_feet_null_without_dives() {
        let rows = vec![row("A1", Some(day(1)), &[("total_time_to_feet_left", "2.0")])];
        let rec = &aggregate(&rows).records[0];
        assert_eq!(rec.dive_count, 0.0);
        assert_eq!(rec.avg_time_to_feet, None);
    }

    #[test]
    fn test_high_decel_from_bands() {
        let rows = vec![row(
            "A1",
            Some(day(1)),
            &[("ima_band2_decel_count", "7"), ("ima_band3_decel_count", "2")],
        )];
        assert_eq!(aggregate(&rows).records[0].high_decel_count, 9.0);
    }

    #[test]
    fn test_skipped_rows_are_counted() {
        let rows = vec![
            row("", Some(day(1)), &[("total_distance", "1")]),
            row("  ", Some(day(1)), &[]),
            row("A1", None, &[("total_distance", "1")]),
            row("A1", None, &[("date_", "2024-01-03"), ("total_distance", "4")]),
        ];
        let agg = aggregate(&rows);

        assert_eq!(agg.rows_read, 4);
        assert_eq!(agg.skipped_no_athlete, 2);
        assert_eq!(agg.skipped_no_date, 1);
        assert_eq!(agg.records.len(), 1);
        assert_eq!(agg.records[0].date, day(3));
        assert_eq!(agg.records[0].total_distance, 4.0);
    }

    #[test]
    fn test_scope_filters_athletes() {
        let rows = vec![
            row("A1", Some(day(1)), &[("total_distance", "1")]),
            row("B2", Some(day(1)), &[("total_distance", "2")]),
        ];
        let scope = AthleteScope::Only(vec!["B2".to_string()]);
        let agg = aggregate_rows(&rows, &scope, &EngineConfig::default());
        assert_eq!(agg.records.len(), 1);
        assert_eq!(agg.records[0].athlete_id, "B2");
    }

    #[test]
    fn test_unknown_numeric_columns_go_to_metrics() {
        let rows = vec![
            row(
                "A1",
                Some(day(1)),
                &[
                    ("ima_band3_jump_count", "2"),
                    ("activity_id", "991"),
                    ("athlete_name", "Kai"),
                    ("activity_name", "Training AM"),
                ],
            ),
            row(
                "A1",
                Some(day(1)),
                &[("ima_band3_jump_count", "1"), ("activity_name", "Training PM")],
            ),
        ];
        let rec = &aggregate(&rows).records[0];
        assert_eq!(rec.metric_or_zero("ima_band3_jump_count"), 3.0);
        assert!(!rec.metrics.contains_key("activity_id"));
        assert!(!rec.metrics.contains_key("total_distance"));
        assert_eq!(
            rec.metrics.get("activity_name_set"),
            Some(&MetricValue::TextList(vec![
                "Training AM".to_string(),
                "Training PM".to_string()
            ]))
        );
    }

    #[test]
    fn test_match_day_phases() {
        let rows = vec![
            row("A1", Some(day(1)), &[("activity_name", "Training")]),
            row("A1", Some(day(3)), &[("activity_name", "League MATCH")]),
            row("A1", Some(day(4)), &[("activity_name", "Recovery")]),
            row("B2", Some(day(4)), &[("activity_name", "Training")]),
        ];
        let agg = aggregate(&rows);

        let a1: Vec<_> = agg.records.iter().filter(|r| r.athlete_id == "A1").collect();
        assert_eq!(a1[0].md_phase, "MD-2");
        assert_eq!(a1[1].md_phase, "MD");
        assert!(a1[1].is_match_day);
        assert_eq!(a1[2].md_offset, Some(1));
        assert_eq!(a1[2].md_phase, "MD+1");

        let b2 = agg.records.iter().find(|r| r.athlete_id == "B2").unwrap();
        assert_eq!(b2.md_offset, None);
        assert_eq!(b2.md_phase, "");
    }

    #[test]
    fn test_nearest_match_tie_prefers_earlier_match() {
        assert_eq!(nearest_match_offset(&[day(1), day(5)], day(3)), Some(2));
        assert_eq!(nearest_match_offset(&[], day(3)), None);
    }

    #[test]
    fn test_records_sorted_by_athlete_then_date() {
        let rows = vec![
            row("B2", Some(day(2)), &[]),
            row("A1", Some(day(5)), &[]),
            row("A1", Some(day(1)), &[]),
        ];
        let keys: Vec<_> = aggregate(&rows)
            .records
            .iter()
            .map(|r| (r.athlete_id.clone(), r.date))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("A1".to_string(), day(1)),
                ("A1".to_string(), day(5)),
                ("B2".to_string(), day(2))
            ]
        );
    }
}
