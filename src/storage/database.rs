//! Database operations using rusqlite.
//!
//! Every write that replaces derived rows runs in a single transaction, so a
//! failed rebuild leaves the previous rows in place.

use chrono::{NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction, params, params_from_iter};
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::parser::ATHLETE_ID_COLUMNS;
use crate::storage::schema::{CURRENT_VERSION, SCHEMA, SCHEMA_VERSION_TABLE};
use crate::workload::position::PositionTransition;
use crate::workload::types::{
    Athlete, AthleteScope, DailyRecord, DateRange, FeatureRecord, Position, RawSessionRow,
};

/// Calendar days are stored as ISO text so they sort lexically.
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Column holding an athlete's display name in raw exports.
const ATHLETE_NAME_COLUMN: &str = "athlete_name";

/// Database wrapper for SQLite operations.
pub struct Database {
    conn: Connection,
}

/// What [`Database::store_raw_batch`] persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBatch {
    pub batch_id: i64,
    pub rows_stored: usize,
    /// Distinct athlete ids present in the batch, sorted.
    pub athletes: Vec<String>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> EngineResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let db = Self {
            conn: Connection::open(path)?,
        };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> EngineResult<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> EngineResult<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(SCHEMA_VERSION_TABLE)?;

        let current_version = self.schema_version()?;
        if current_version < CURRENT_VERSION {
            self.migrate(current_version)?;
        }
        Ok(())
    }

    fn schema_version(&self) -> EngineResult<i32> {
        let version = self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;
        Ok(version)
    }

    fn migrate(&self, from_version: i32) -> EngineResult<()> {
        if from_version < 1 {
            self.conn.execute_batch(SCHEMA)?;
            self.conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)",
                params![CURRENT_VERSION, Utc::now().to_rfc3339()],
            )?;
            info!(version = CURRENT_VERSION, "Database migrated");
        }
        Ok(())
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // ========== Athletes ==========

    /// Athletes in `scope`, ordered by id.
    pub fn athletes(&self, scope: &AthleteScope) -> EngineResult<Vec<Athlete>> {
        let (filter, args) = filter_clause(scope, None);
        let sql = format!(
            "SELECT athlete_id, name, position FROM athletes{filter} ORDER BY athlete_id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let athletes = stmt
            .query_map(params_from_iter(args.iter()), parse_athlete_row)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_error)?;
        Ok(athletes)
    }

    /// Stored positions of the athletes in `scope`. Unclassified athletes are absent.
    pub fn positions(&self, scope: &AthleteScope) -> EngineResult<HashMap<String, Position>> {
        Ok(self
            .athletes(scope)?
            .into_iter()
            .filter_map(|a| a.position.map(|p| (a.athlete_id, p)))
            .collect())
    }

    /// Writes the new position of every transition in one transaction.
    pub fn apply_transitions(&mut self, transitions: &[PositionTransition]) -> EngineResult<usize> {
        let tx = self.conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = tx.prepare("UPDATE athletes SET position = ?1 WHERE athlete_id = ?2")?;
            for t in transitions {
                updated += stmt.execute(params![t.to.as_str(), t.athlete_id])?;
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    // ========== Raw sessions ==========

    /// Stores one ingest batch. Rows without an athlete id are not stored.
    pub fn store_raw_batch(
        &mut self,
        source_name: &str,
        rows: &[RawSessionRow],
    ) -> EngineResult<StoredBatch> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO ingest_batches (source_name, created_at) VALUES (?1, ?2)",
            params![source_name, Utc::now().to_rfc3339()],
        )?;
        let batch_id = tx.last_insert_rowid();

        let mut athletes = BTreeSet::new();
        let mut rows_stored = 0;
        {
            let mut insert = tx.prepare(
                "INSERT INTO raw_sessions (batch_id, row_number, athlete_id, date, session_name, fields_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in rows {
                let Some(athlete_id) = raw_athlete_id(row) else {
                    continue;
                };
                ensure_athlete(&tx, &athlete_id, row.text(ATHLETE_NAME_COLUMN))?;
                insert.execute(params![
                    batch_id,
                    row.row_number as i64,
                    athlete_id,
                    row.date.map(|d| d.format(DATE_FORMAT).to_string()),
                    row.session_name,
                    serde_json::to_string(&row.fields)?,
                ])?;
                athletes.insert(athlete_id);
                rows_stored += 1;
            }
        }
        tx.commit()?;

        debug!(batch_id, rows_stored, "Stored raw batch");
        Ok(StoredBatch {
            batch_id,
            rows_stored,
            athletes: athletes.into_iter().collect(),
        })
    }

    /// Stored raw rows of the athletes in `scope`, in ingestion order.
    pub fn raw_rows(&self, scope: &AthleteScope) -> EngineResult<Vec<RawSessionRow>> {
        let (filter, args) = filter_clause(scope, None);
        let sql = format!(
            "SELECT athlete_id, date, session_name, fields_json, batch_id, row_number
             FROM raw_sessions{filter} ORDER BY id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), parse_raw_row)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_error)?;
        Ok(rows)
    }

    /// Distinct athlete ids with rows in the given ingest batch.
    pub fn athlete_ids_for_batch(&self, batch_id: i64) -> EngineResult<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT athlete_id FROM raw_sessions
             WHERE batch_id = ?1 AND athlete_id IS NOT NULL ORDER BY athlete_id",
        )?;
        let ids = stmt
            .query_map([batch_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    // ========== Daily records ==========

    /// Upserts daily records by (athlete, date).
    ///
    /// With `clear`, the daily rows of that scope are deleted first, inside the
    /// same transaction.
    pub fn upsert_daily(
        &mut self,
        records: &[DailyRecord],
        clear: Option<&AthleteScope>,
    ) -> EngineResult<usize> {
        let tx = self.conn.transaction()?;
        if let Some(scope) = clear {
            let (filter, args) = filter_clause(scope, None);
            let deleted = tx.execute(
                &format!("DELETE FROM daily_records{filter}"),
                params_from_iter(args.iter()),
            )?;
            debug!(deleted, "Cleared daily records");
        }

        let mut written = 0;
        {
            let mut upsert = tx.prepare(
                "INSERT INTO daily_records (
                    athlete_id, date, total_duration, total_distance, total_player_load,
                    max_velocity, mean_heart_rate, hsr_distance, high_decel_count,
                    dive_count, dive_load, avg_time_to_feet, jump_count,
                    is_match_day, md_offset, md_phase, metrics_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
                 ON CONFLICT(athlete_id, date) DO UPDATE SET
                    total_duration = excluded.total_duration,
                    total_distance = excluded.total_distance,
                    total_player_load = excluded.total_player_load,
                    max_velocity = excluded.max_velocity,
                    mean_heart_rate = excluded.mean_heart_rate,
                    hsr_distance = excluded.hsr_distance,
                    high_decel_count = excluded.high_decel_count,
                    dive_count = excluded.dive_count,
                    dive_load = excluded.dive_load,
                    avg_time_to_feet = excluded.avg_time_to_feet,
                    jump_count = excluded.jump_count,
                    is_match_day = excluded.is_match_day,
                    md_offset = excluded.md_offset,
                    md_phase = excluded.md_phase,
                    metrics_json = excluded.metrics_json",
            )?;
            for r in records {
                ensure_athlete(&tx, &r.athlete_id, None)?;
                written += upsert.execute(params![
                    r.athlete_id,
                    r.date.format(DATE_FORMAT).to_string(),
                    r.total_duration,
                    r.total_distance,
                    r.total_player_load,
                    r.max_velocity,
                    r.mean_heart_rate,
                    r.hsr_distance,
                    r.high_decel_count,
                    r.dive_count,
                    r.dive_load,
                    r.avg_time_to_feet,
                    r.jump_count,
                    r.is_match_day,
                    r.md_offset,
                    r.md_phase,
                    serde_json::to_string(&r.metrics)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    /// Daily records in `scope` and `range`, ordered by athlete then date.
    pub fn daily_records(
        &self,
        scope: &AthleteScope,
        range: Option<DateRange>,
    ) -> EngineResult<Vec<DailyRecord>> {
        let (filter, args) = filter_clause(scope, range);
        let sql = format!(
            "SELECT athlete_id, date, total_duration, total_distance, total_player_load,
                    max_velocity, mean_heart_rate, hsr_distance, high_decel_count,
                    dive_count, dive_load, avg_time_to_feet, jump_count,
                    is_match_day, md_offset, md_phase, metrics_json
             FROM daily_records{filter} ORDER BY athlete_id, date"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(args.iter()), parse_daily_row)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_error)?;
        Ok(records)
    }

    // ========== Feature records ==========

    /// Deletes the feature rows of `scope` and `range`, then inserts `records`,
    /// all in one transaction.
    pub fn replace_features(
        &mut self,
        scope: &AthleteScope,
        range: Option<DateRange>,
        records: &[FeatureRecord],
    ) -> EngineResult<usize> {
        let tx = self.conn.transaction()?;
        let (filter, args) = filter_clause(scope, range);
        let deleted = tx.execute(
            &format!("DELETE FROM feature_records{filter}"),
            params_from_iter(args.iter()),
        )?;

        let mut written = 0;
        {
            let mut insert = tx.prepare(
                "INSERT INTO feature_records (
                    athlete_id, date, acwr_load, acwr_hsr, acwr_dive, efficiency_index,
                    load_per_meter, monotony_load, risk_level, risk_reasons_json, params_json
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for r in records {
                written += insert.execute(params![
                    r.athlete_id,
                    r.date.format(DATE_FORMAT).to_string(),
                    r.acwr_load,
                    r.acwr_hsr,
                    r.acwr_dive,
                    r.efficiency_index,
                    r.load_per_meter,
                    r.monotony_load,
                    r.risk_level.as_str(),
                    serde_json::to_string(&r.risk_reasons)?,
                    serde_json::to_string(&r.params)?,
                ])?;
            }
        }
        tx.commit()?;

        debug!(deleted, written, "Replaced feature records");
        Ok(written)
    }

    /// Feature records in `scope` and `range`, ordered by athlete then date.
    pub fn features(
        &self,
        scope: &AthleteScope,
        range: Option<DateRange>,
    ) -> EngineResult<Vec<FeatureRecord>> {
        let (filter, args) = filter_clause(scope, range);
        let sql = format!(
            "SELECT athlete_id, date, acwr_load, acwr_hsr, acwr_dive, efficiency_index,
                    load_per_meter, monotony_load, risk_level, risk_reasons_json, params_json
             FROM feature_records{filter} ORDER BY athlete_id, date"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(args.iter()), parse_feature_row)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(decode_error)?;
        Ok(records)
    }
}

/// Builds the WHERE clause shared by every scoped query.
fn filter_clause(scope: &AthleteScope, range: Option<DateRange>) -> (String, Vec<String>) {
    let mut conditions = Vec::new();
    let mut args = Vec::new();

    if let AthleteScope::Only(ids) = scope {
        let placeholders = vec!["?"; ids.len()].join(", ");
        conditions.push(format!("athlete_id IN ({placeholders})"));
        args.extend(ids.iter().cloned());
    }
    if let Some(range) = range {
        if let Some(start) = range.start {
            conditions.push("date >= ?".to_string());
            args.push(start.format(DATE_FORMAT).to_string());
        }
        if let Some(end) = range.end {
            conditions.push("date <= ?".to_string());
            args.push(end.format(DATE_FORMAT).to_string());
        }
    }

    if conditions.is_empty() {
        (String::new(), args)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), args)
    }
}

/// Inserts the athlete if missing. A non-empty name replaces a blank one.
fn ensure_athlete(tx: &Transaction<'_>, athlete_id: &str, name: Option<&str>) -> EngineResult<()> {
    tx.execute(
        "INSERT INTO athletes (athlete_id, name) VALUES (?1, ?2)
         ON CONFLICT(athlete_id) DO UPDATE SET name = excluded.name
         WHERE athletes.name = '' AND excluded.name <> ''",
        params![athlete_id, name.unwrap_or_default()],
    )?;
    Ok(())
}

fn raw_athlete_id(row: &RawSessionRow) -> Option<String> {
    row.athlete_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .or_else(|| row.first_text(ATHLETE_ID_COLUMNS))
        .map(str::to_string)
}

/// Undecodable stored values are reported as invalid records.
fn decode_error(err: rusqlite::Error) -> EngineError {
    match err {
        e @ rusqlite::Error::FromSqlConversionFailure(..) => EngineError::InvalidRecord(e.to_string()),
        other => EngineError::Storage(other),
    }
}

fn conversion_failure<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn date_at(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, DATE_FORMAT).map_err(|e| conversion_failure(idx, e))
}

fn json_at<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_failure(idx, e))
}

fn parse_athlete_row(row: &Row) -> rusqlite::Result<Athlete> {
    let position: Option<String> = row.get(2)?;
    let position = position
        .map(|p| p.parse::<Position>())
        .transpose()
        .map_err(|e| conversion_failure(2, e))?;

    Ok(Athlete {
        athlete_id: row.get(0)?,
        name: row.get(1)?,
        position,
    })
}

fn parse_raw_row(row: &Row) -> rusqlite::Result<RawSessionRow> {
    let date: Option<String> = row.get(1)?;
    let date = date
        .map(|d| NaiveDate::parse_from_str(&d, DATE_FORMAT))
        .transpose()
        .map_err(|e| conversion_failure(1, e))?;
    let row_number: i64 = row.get(5)?;

    Ok(RawSessionRow {
        athlete_id: row.get(0)?,
        date,
        session_name: row.get(2)?,
        fields: json_at(row, 3)?,
        batch_id: row.get(4)?,
        row_number: usize::try_from(row_number).map_err(|e| conversion_failure(5, e))?,
    })
}

fn parse_daily_row(row: &Row) -> rusqlite::Result<DailyRecord> {
    Ok(DailyRecord {
        athlete_id: row.get(0)?,
        date: date_at(row, 1)?,
        total_duration: row.get(2)?,
        total_distance: row.get(3)?,
        total_player_load: row.get(4)?,
        max_velocity: row.get(5)?,
        mean_heart_rate: row.get(6)?,
        hsr_distance: row.get(7)?,
        high_decel_count: row.get(8)?,
        dive_count: row.get(9)?,
        dive_load: row.get(10)?,
        avg_time_to_feet: row.get(11)?,
        jump_count: row.get(12)?,
        is_match_day: row.get(13)?,
        md_offset: row.get(14)?,
        md_phase: row.get(15)?,
        metrics: json_at(row, 16)?,
    })
}

fn parse_feature_row(row: &Row) -> rusqlite::Result<FeatureRecord> {
    let risk_level: String = row.get(8)?;

    Ok(FeatureRecord {
        athlete_id: row.get(0)?,
        date: date_at(row, 1)?,
        acwr_load: row.get(2)?,
        acwr_hsr: row.get(3)?,
        acwr_dive: row.get(4)?,
        efficiency_index: row.get(5)?,
        load_per_meter: row.get(6)?,
        monotony_load: row.get(7)?,
        risk_level: risk_level.parse().map_err(|e| conversion_failure(8, e))?,
        risk_reasons: json_at(row, 9)?,
        params: json_at(row, 10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::types::{MetricValue, RiskLevel};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn daily(athlete_id: &str, d: u32, load: f64) -> DailyRecord {
        DailyRecord {
            athlete_id: athlete_id.to_string(),
            date: day(d),
            total_player_load: load,
            total_distance: load * 10.0,
            ..Default::default()
        }
    }

    fn raw(athlete_id: Option<&str>, d: u32, name: &str) -> RawSessionRow {
        let mut row = RawSessionRow {
            athlete_id: athlete_id.map(str::to_string),
            date: Some(day(d)),
            row_number: d as usize,
            ..Default::default()
        };
        row.fields.insert("athlete_name".into(), name.into());
        row.fields.insert("total_distance".into(), "1200".into());
        row
    }

    #[test]
    fn test_open_in_memory_creates_schema() {
        let db = Database::open_in_memory().unwrap();
        let version: i32 = db
            .connection()
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[test]
    fn test_open_file_twice_does_not_remigrate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("workload.db");
        drop(Database::open(&path).unwrap());

        let db = Database::open(&path).unwrap();
        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_filter_clause() {
        let (sql, args) = filter_clause(&AthleteScope::All, None);
        assert!(sql.is_empty());
        assert!(args.is_empty());

        let scope = AthleteScope::Only(vec!["A1".into(), "B2".into()]);
        let range = DateRange {
            start: Some(day(2)),
            end: None,
        };
        let (sql, args) = filter_clause(&scope, Some(range));
        assert_eq!(sql, " WHERE athlete_id IN (?, ?) AND date >= ?");
        assert_eq!(args, vec!["A1", "B2", "2024-01-02"]);
    }

    #[test]
    fn test_store_raw_batch_skips_rows_without_athlete() {
        let mut db = Database::open_in_memory().unwrap();
        let rows = vec![
            raw(Some("A1"), 1, "Alice"),
            raw(None, 1, "Nobody"),
            raw(Some("B2"), 2, "Bob"),
        ];

        let stored = db.store_raw_batch("upload.csv", &rows).unwrap();

        assert_eq!(stored.rows_stored, 2);
        assert_eq!(stored.athletes, vec!["A1", "B2"]);
        assert_eq!(
            db.athlete_ids_for_batch(stored.batch_id).unwrap(),
            vec!["A1", "B2"]
        );

        let back = db.raw_rows(&AthleteScope::from_ids(vec!["B2".into()])).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].date, Some(day(2)));
        assert_eq!(back[0].batch_id, Some(stored.batch_id));
        assert_eq!(back[0].text("total_distance"), Some("1200"));

        let athletes = db.athletes(&AthleteScope::All).unwrap();
        assert_eq!(athletes[0].name, "Alice");
        assert_eq!(athletes[0].position, None);
    }

    #[test]
    fn test_upsert_daily_replaces_values() {
        let mut db = Database::open_in_memory().unwrap();
        let mut record = daily("A1", 1, 100.0);
        record
            .metrics
            .insert("activity_name_set".into(), MetricValue::TextList(vec!["AM".into()]));
        db.upsert_daily(&[record.clone()], None).unwrap();

        record.total_player_load = 250.0;
        record.metrics.clear();
        db.upsert_daily(&[record.clone()], None).unwrap();

        let stored = db.daily_records(&AthleteScope::All, None).unwrap();
        assert_eq!(stored, vec![record]);
    }

    #[test]
    fn test_upsert_daily_with_clear_drops_stale_days() {
        let mut db = Database::open_in_memory().unwrap();
        db.upsert_daily(&[daily("A1", 1, 10.0), daily("A1", 2, 20.0)], None)
            .unwrap();
        db.upsert_daily(&[daily("B2", 1, 30.0)], None).unwrap();

        let scope = AthleteScope::from_ids(vec!["A1".into()]);
        db.upsert_daily(&[daily("A1", 2, 25.0)], Some(&scope)).unwrap();

        let stored = db.daily_records(&AthleteScope::All, None).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].date, day(2));
        assert_eq!(stored[0].total_player_load, 25.0);
        assert_eq!(stored[1].athlete_id, "B2");
    }

    #[test]
    fn test_replace_features_is_scoped() {
        let mut db = Database::open_in_memory().unwrap();
        db.upsert_daily(&[daily("A1", 1, 10.0), daily("B2", 1, 10.0)], None)
            .unwrap();

        let feature = |id: &str| FeatureRecord {
            athlete_id: id.to_string(),
            date: day(1),
            acwr_load: Some(1.0),
            risk_level: RiskLevel::Caution,
            risk_reasons: vec!["Load ACWR 1.60 > 1.5".into()],
            ..Default::default()
        };
        db.replace_features(&AthleteScope::All, None, &[feature("A1"), feature("B2")])
            .unwrap();

        let only_a1 = AthleteScope::from_ids(vec!["A1".into()]);
        let mut updated = feature("A1");
        updated.risk_level = RiskLevel::Risky;
        db.replace_features(&only_a1, None, &[updated.clone()]).unwrap();

        let stored = db.features(&AthleteScope::All, None).unwrap();
        assert_eq!(stored, vec![updated, feature("B2")]);
    }

    #[test]
    fn test_failed_feature_replace_rolls_back() {
        let mut db = Database::open_in_memory().unwrap();
        db.upsert_daily(&[daily("A1", 1, 10.0)], None).unwrap();
        let feature = |d: u32| FeatureRecord {
            athlete_id: "A1".into(),
            date: day(d),
            acwr_load: Some(1.0),
            ..Default::default()
        };
        let seeded = vec![feature(1), feature(2)];
        db.replace_features(&AthleteScope::All, None, &seeded).unwrap();

        let err = db
            .replace_features(&AthleteScope::All, None, &[feature(3), feature(3)])
            .unwrap_err();

        assert!(matches!(err, EngineError::Storage(_)));
        assert_eq!(db.features(&AthleteScope::All, None).unwrap(), seeded);
    }

    #[test]
    fn test_failed_daily_upsert_keeps_cleared_rows() {
        let mut db = Database::open_in_memory().unwrap();
        let seeded = vec![daily("A1", 1, 10.0), daily("A1", 2, 20.0)];
        db.upsert_daily(&seeded, None).unwrap();

        // SQLite stores NaN as NULL, which the NOT NULL column rejects.
        let mut broken = daily("A1", 4, 40.0);
        broken.total_distance = f64::NAN;
        let scope = AthleteScope::from_ids(vec!["A1".into()]);
        let err = db
            .upsert_daily(&[daily("A1", 3, 30.0), broken], Some(&scope))
            .unwrap_err();

        assert!(matches!(err, EngineError::Storage(_)));
        assert_eq!(db.daily_records(&AthleteScope::All, None).unwrap(), seeded);
    }

    #[test]
    fn test_apply_transitions_updates_positions() {
        let mut db = Database::open_in_memory().unwrap();
        db.upsert_daily(&[daily("A1", 1, 10.0)], None).unwrap();

        let transition = PositionTransition {
            athlete_id: "A1".into(),
            athlete_name: String::new(),
            from: None,
            to: Position::Goalkeeper,
        };
        assert_eq!(db.apply_transitions(&[transition]).unwrap(), 1);

        let positions = db.positions(&AthleteScope::All).unwrap();
        assert_eq!(positions.get("A1"), Some(&Position::Goalkeeper));
    }

    #[test]
    fn test_corrupt_position_is_invalid_record() {
        let db = Database::open_in_memory().unwrap();
        db.connection()
            .execute(
                "INSERT INTO athletes (athlete_id, name, position) VALUES ('X', '', 'ZZ')",
                [],
            )
            .unwrap();

        let err = db.athletes(&AthleteScope::All).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRecord(_)));
    }
}
