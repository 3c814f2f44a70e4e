//! CSV reader for raw session exports.

use chrono::NaiveDate;
use csv::ReaderBuilder;
use std::collections::BTreeMap;
use std::io::Read;
use tracing::debug;

use crate::error::EngineResult;
use crate::workload::types::RawSessionRow;

/// Column names accepted for the athlete id, in priority order.
pub const ATHLETE_ID_COLUMNS: &[&str] = &["athlete_id", "AthleteID", "player_id"];

/// Column names accepted for the session date, in priority order.
pub const DATE_COLUMNS: &[&str] = &["date_", "date", "Date", "session_date"];

const SESSION_NAME_COLUMNS: &[&str] = &["session_name", "SessionName"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y"];

/// Parses a calendar date in any of the accepted export formats.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

/// Reads every data row of a headed CSV export into [`RawSessionRow`]s.
///
/// Rows keep all their cells; athlete id and date are resolved here when
/// possible and left as `None` otherwise, so the aggregator can count them.
///
/// # Errors
///
/// Returns an error if the CSV is malformed or not valid UTF-8.
pub fn read_raw_rows<R: Read>(reader: R) -> EngineResult<Vec<RawSessionRow>> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result?;
        let fields: BTreeMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();

        let mut row = RawSessionRow {
            fields,
            row_number: i + 1,
            ..Default::default()
        };
        row.athlete_id = row.first_text(ATHLETE_ID_COLUMNS).map(str::to_string);
        row.date = DATE_COLUMNS
            .iter()
            .filter_map(|c| row.text(c))
            .find_map(parse_date);
        row.session_name = row
            .first_text(SESSION_NAME_COLUMNS)
            .unwrap_or_default()
            .to_string();

        rows.push(row);
    }

    debug!(rows = rows.len(), columns = headers.len(), "CSV rows read");
    Ok(rows)
}
