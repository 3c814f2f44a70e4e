//! Engine operations over the workload store.
//!
//! Each operation reads what it needs from [`Database`], runs the pure
//! aggregation / detection / feature code, and writes the results back in a
//! single transaction.

use serde::Serialize;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::storage::Database;
use crate::workload::aggregate::aggregate_rows;
use crate::workload::features::compute_features;
use crate::workload::position::{PositionReport, detect, dive_activity};
use crate::workload::series::build_dense_series;
use crate::workload::types::{AthleteScope, DailyRecord, DateRange, RawSessionRow};

/// Outcome of storing one raw export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub batch_id: i64,
    pub rows_stored: usize,
    pub skipped_no_athlete: usize,
    /// Athletes with at least one stored row, sorted.
    pub athletes: Vec<String>,
}

/// Counts reported by a daily build.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DailyBuildReport {
    pub rows_read: usize,
    pub rows_written: usize,
    pub skipped_no_athlete: usize,
    pub skipped_no_date: usize,
}

/// Daily records produced by [`aggregate_raw_to_daily`] and its counts.
#[derive(Debug, Clone, Default)]
pub struct DailyBuild {
    pub records: Vec<DailyRecord>,
    pub report: DailyBuildReport,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DailyRebuildOptions {
    /// Delete the scope's daily rows before upserting.
    pub delete_existing: bool,
    /// Required when `delete_existing` applies to every athlete.
    pub confirm_delete_all: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureRebuildOptions {
    /// Required when the rebuild replaces every athlete's features.
    pub confirm_delete_all: bool,
    /// Restricts the rebuild to these days. `None` rebuilds full history.
    pub range: Option<DateRange>,
}

/// Stores raw rows as a new ingest batch.
#[tracing::instrument(skip(db, rows), fields(rows = rows.len()))]
pub fn ingest_raw_rows(
    db: &mut Database,
    source_name: &str,
    rows: &[RawSessionRow],
) -> EngineResult<IngestReport> {
    let stored = db.store_raw_batch(source_name, rows)?;
    let report = IngestReport {
        batch_id: stored.batch_id,
        rows_stored: stored.rows_stored,
        skipped_no_athlete: rows.len() - stored.rows_stored,
        athletes: stored.athletes,
    };

    info!(
        batch_id = report.batch_id,
        rows_stored = report.rows_stored,
        skipped_no_athlete = report.skipped_no_athlete,
        athletes = report.athletes.len(),
        "Ingested raw batch"
    );
    Ok(report)
}

/// Scope covering exactly the athletes of one ingest batch.
///
/// An unknown or empty batch yields a scope that matches nobody.
pub fn scope_for_batch(db: &Database, batch_id: i64) -> EngineResult<AthleteScope> {
    Ok(AthleteScope::Only(db.athlete_ids_for_batch(batch_id)?))
}

/// Aggregates `rows` into daily records and upserts them.
///
/// Match-day offsets only see the match days present in `rows`. Use
/// [`rebuild_daily_series`] when earlier batches may hold the nearest match.
#[tracing::instrument(skip(db, rows, config), fields(rows = rows.len()))]
pub fn aggregate_raw_to_daily(
    db: &mut Database,
    rows: &[RawSessionRow],
    scope: &AthleteScope,
    config: &EngineConfig,
) -> EngineResult<DailyBuild> {
    let aggregation = aggregate_rows(rows, scope, config);
    let rows_written = db.upsert_daily(&aggregation.records, None)?;

    let report = DailyBuildReport {
        rows_read: aggregation.rows_read,
        rows_written,
        skipped_no_athlete: aggregation.skipped_no_athlete,
        skipped_no_date: aggregation.skipped_no_date,
    };
    info!(
        rows_read = report.rows_read,
        rows_written = report.rows_written,
        skipped_no_athlete = report.skipped_no_athlete,
        skipped_no_date = report.skipped_no_date,
        "Aggregated raw rows to daily records"
    );

    Ok(DailyBuild {
        records: aggregation.records,
        report,
    })
}

/// Recomputes daily records from the stored raw sessions of `scope`.
#[tracing::instrument(skip(db, config))]
pub fn rebuild_daily_series(
    db: &mut Database,
    scope: &AthleteScope,
    config: &EngineConfig,
    options: DailyRebuildOptions,
) -> EngineResult<DailyBuildReport> {
    if options.delete_existing && scope.is_all() && !options.confirm_delete_all {
        return Err(EngineError::Config(
            "deleting every athlete's daily records requires confirm_delete_all".to_string(),
        ));
    }

    let rows = db.raw_rows(scope)?;
    let aggregation = aggregate_rows(&rows, scope, config);
    let clear = options.delete_existing.then_some(scope);
    let rows_written = db.upsert_daily(&aggregation.records, clear)?;

    let report = DailyBuildReport {
        rows_read: aggregation.rows_read,
        rows_written,
        skipped_no_athlete: aggregation.skipped_no_athlete,
        skipped_no_date: aggregation.skipped_no_date,
    };
    info!(
        rows_read = report.rows_read,
        rows_written = report.rows_written,
        skipped_no_date = report.skipped_no_date,
        "Rebuilt daily series"
    );
    Ok(report)
}

/// Re-detects goalkeepers from dive history and stores changed positions.
#[tracing::instrument(skip(db, config))]
pub fn classify_positions(
    db: &mut Database,
    scope: &AthleteScope,
    threshold: f64,
    config: &EngineConfig,
) -> EngineResult<PositionReport> {
    let athletes = db.athletes(scope)?;
    let history = db.daily_records(scope, None)?;
    let activity = dive_activity(&history, config.position_measure);

    let report = detect(&athletes, &activity, threshold);
    db.apply_transitions(&report.transitions)?;

    for t in &report.transitions {
        info!(
            athlete_id = %t.athlete_id,
            athlete_name = %t.athlete_name,
            from = t.from.map(|p| p.as_str()).unwrap_or("none"),
            to = t.to.as_str(),
            "Position changed"
        );
    }
    info!(
        athletes = athletes.len(),
        goalkeepers = report.detected_gk_ids.len(),
        transitions = report.transitions.len(),
        "Classified positions"
    );
    Ok(report)
}

/// Builds dense series, computes features and risk, and replaces the feature
/// rows of `scope`. Returns the number of feature records written.
#[tracing::instrument(skip(db, config))]
pub fn rebuild_workload_features(
    db: &mut Database,
    scope: &AthleteScope,
    config: &EngineConfig,
    options: FeatureRebuildOptions,
) -> EngineResult<usize> {
    config.validate()?;
    if scope.is_all() && !options.confirm_delete_all {
        return Err(EngineError::Config(
            "rebuilding every athlete's features requires confirm_delete_all".to_string(),
        ));
    }

    let positions = db.positions(scope)?;
    let daily = db.daily_records(scope, options.range)?;

    let mut features = Vec::with_capacity(daily.len());
    let mut athletes = 0;
    for records in daily.chunk_by(|a, b| a.athlete_id == b.athlete_id) {
        let athlete_id = &records[0].athlete_id;
        let position = positions.get(athlete_id).copied().unwrap_or_default();
        let series = build_dense_series(records, options.range);
        features.extend(compute_features(athlete_id, &series, position, config));
        athletes += 1;
    }

    if athletes == 0 {
        warn!("No daily records in scope");
    }
    let written = db.replace_features(scope, options.range, &features)?;
    info!(athletes, written, "Rebuilt workload features");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn row(athlete_id: &str, date: &str, load: &str) -> RawSessionRow {
        let mut row = RawSessionRow {
            athlete_id: Some(athlete_id.to_string()),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").ok(),
            ..Default::default()
        };
        row.fields.insert("total_player_load".into(), load.into());
        row.fields.insert("total_distance".into(), "1000".into());
        row
    }

    #[test]
    fn test_ingest_counts_rows_without_athlete() {
        let mut db = Database::open_in_memory().unwrap();
        let mut orphan = row("A1", "2024-01-01", "5");
        orphan.athlete_id = None;

        let report =
            ingest_raw_rows(&mut db, "a.csv", &[row("A1", "2024-01-01", "5"), orphan]).unwrap();

        assert_eq!(report.rows_stored, 1);
        assert_eq!(report.skipped_no_athlete, 1);
        assert_eq!(report.athletes, vec!["A1"]);
    }

    #[test]
    fn test_scope_for_unknown_batch_matches_nobody() {
        let db = Database::open_in_memory().unwrap();
        let scope = scope_for_batch(&db, 42).unwrap();
        assert!(!scope.is_all());
        assert!(!scope.contains("A1"));
    }

    #[test]
    fn test_delete_all_daily_requires_confirmation() {
        let mut db = Database::open_in_memory().unwrap();
        let options = DailyRebuildOptions {
            delete_existing: true,
            confirm_delete_all: false,
        };
        let err = rebuild_daily_series(&mut db, &AthleteScope::All, &EngineConfig::default(), options)
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_feature_rebuild_rejects_invalid_config() {
        let mut db = Database::open_in_memory().unwrap();
        let config = EngineConfig {
            epsilon: -1.0,
            ..Default::default()
        };
        let options = FeatureRebuildOptions {
            confirm_delete_all: true,
            range: None,
        };
        let err = rebuild_workload_features(&mut db, &AthleteScope::All, &config, options)
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_rebuild_daily_sees_match_days_from_earlier_batches() {
        let mut db = Database::open_in_memory().unwrap();
        let mut game = row("A1", "2024-01-05", "9");
        game.fields.insert("activity_name".into(), "League Match".into());
        ingest_raw_rows(&mut db, "match.csv", &[game]).unwrap();
        let later = ingest_raw_rows(&mut db, "training.csv", &[row("A1", "2024-01-03", "4")])
            .unwrap();

        let scope = scope_for_batch(&db, later.batch_id).unwrap();
        rebuild_daily_series(&mut db, &scope, &EngineConfig::default(), DailyRebuildOptions::default())
            .unwrap();

        let records = db.daily_records(&AthleteScope::All, None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].md_offset, Some(-2));
        assert_eq!(records[0].md_phase, "MD-2");
        assert!(records[1].is_match_day);
        assert_eq!(records[1].md_phase, "MD");
    }

    #[test]
    fn test_aggregate_raw_to_daily_writes_records() {
        let mut db = Database::open_in_memory().unwrap();
        let rows = vec![
            row("A1", "2024-01-01", "5"),
            row("A1", "2024-01-01", "2"),
            row("A1", "not a date", "1"),
        ];

        let build =
            aggregate_raw_to_daily(&mut db, &rows, &AthleteScope::All, &EngineConfig::default())
                .unwrap();

        assert_eq!(build.records.len(), 1);
        assert_eq!(build.records[0].total_player_load, 7.0);
        assert_eq!(build.report.rows_written, 1);
        assert_eq!(build.report.skipped_no_date, 1);
        assert_eq!(db.daily_records(&AthleteScope::All, None).unwrap(), build.records);
    }
}
