//! Output formatting and persistence for engine reports and feature rows.
//!
//! Supports JSON report logging and CSV append.

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};

use crate::workload::types::FeatureRecord;
use csv::WriterBuilder;
use std::fs::OpenOptions;
use std::path::Path;

/// Logs a report as pretty-printed JSON.
pub fn print_json(report: &impl Serialize) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

/// One feature record flattened for CSV.
#[derive(Debug, Serialize)]
struct FeatureCsvRow<'a> {
    athlete_id: &'a str,
    date: String,
    acwr_load: Option<f64>,
    acwr_hsr: Option<f64>,
    acwr_dive: Option<f64>,
    efficiency_index: Option<f64>,
    load_per_meter: Option<f64>,
    monotony_load: Option<f64>,
    asymmetry: Option<f64>,
    decel_density: Option<f64>,
    time_to_feet: Option<f64>,
    risk_level: &'a str,
    risk_reasons: String,
    acwr_distance: Option<f64>,
    acwr_jump: Option<f64>,
}

impl<'a> From<&'a FeatureRecord> for FeatureCsvRow<'a> {
    fn from(r: &'a FeatureRecord) -> Self {
        Self {
            athlete_id: &r.athlete_id,
            date: r.date.format("%Y-%m-%d").to_string(),
            acwr_load: r.acwr_load,
            acwr_hsr: r.acwr_hsr,
            acwr_dive: r.acwr_dive,
            efficiency_index: r.efficiency_index,
            load_per_meter: r.load_per_meter,
            monotony_load: r.monotony_load,
            asymmetry: r.params.asymmetry,
            decel_density: r.params.decel_density,
            time_to_feet: r.params.time_to_feet,
            risk_level: r.risk_level.as_str(),
            risk_reasons: r.risk_reasons.join("; "),
            acwr_distance: r.params.acwr_distance,
            acwr_jump: r.params.acwr_jump,
        }
    }
}

/// Appends feature records as rows to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_features_csv(path: &str, records: &[FeatureRecord]) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, rows = records.len(), "Appending CSV records");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for record in records {
        writer.serialize(FeatureCsvRow::from(record))?;
    }
    writer.flush()?;

    Ok(())
}
