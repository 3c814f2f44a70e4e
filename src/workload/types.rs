//! Data types used by the workload pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Playing role that selects which metric family is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Position {
    #[serde(rename = "GK")]
    Goalkeeper,
    #[default]
    #[serde(rename = "FP")]
    FieldPlayer,
}

impl Position {
    pub fn as_str(&self) -> &'static str {
        match self {
            Position::Goalkeeper => "GK",
            Position::FieldPlayer => "FP",
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Position {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GK" => Ok(Position::Goalkeeper),
            "FP" => Ok(Position::FieldPlayer),
            other => Err(EngineError::InvalidRecord(format!(
                "unknown position '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Athlete {
    pub athlete_id: String,
    pub name: String,
    /// `None` until positions have been detected at least once.
    pub position: Option<Position>,
}

/// One ingested measurement session, as read from an export row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSessionRow {
    pub athlete_id: Option<String>,
    pub date: Option<NaiveDate>,
    pub session_name: String,
    /// Every cell of the source row, keyed by column name.
    pub fields: BTreeMap<String, String>,
    pub batch_id: Option<i64>,
    pub row_number: usize,
}

impl RawSessionRow {
    /// Trimmed cell text, `None` when absent or blank.
    pub fn text(&self, column: &str) -> Option<&str> {
        self.fields
            .get(column)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Cell parsed as a finite number.
    pub fn number(&self, column: &str) -> Option<f64> {
        self.text(column)
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }

    /// First column of `columns` holding a number.
    pub fn first_number(&self, columns: &[&str]) -> Option<f64> {
        columns.iter().find_map(|c| self.number(c))
    }

    /// First column of `columns` holding non-blank text.
    pub fn first_text(&self, columns: &[&str]) -> Option<&str> {
        columns.iter().find_map(|c| self.text(c))
    }
}

/// A value in a daily record's open metrics map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
    TextList(Vec<String>),
}

impl MetricValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Number(v) => Some(*v),
            _ => None,
        }
    }
}

pub type Metrics = BTreeMap<String, MetricValue>;

/// One aggregated day for one athlete.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DailyRecord {
    pub athlete_id: String,
    pub date: NaiveDate,
    pub total_duration: f64,
    pub total_distance: f64,
    pub total_player_load: f64,
    pub max_velocity: Option<f64>,
    pub mean_heart_rate: Option<f64>,
    pub hsr_distance: f64,
    pub high_decel_count: f64,
    pub dive_count: f64,
    pub dive_load: f64,
    pub avg_time_to_feet: Option<f64>,
    pub jump_count: f64,
    pub is_match_day: bool,
    /// Signed distance in days to the nearest match day.
    pub md_offset: Option<i64>,
    pub md_phase: String,
    pub metrics: Metrics,
}

impl DailyRecord {
    /// Numeric entry of the metrics map, 0 when absent or not a number.
    pub fn metric_or_zero(&self, key: &str) -> f64 {
        self.metrics
            .get(key)
            .and_then(MetricValue::as_number)
            .unwrap_or(0.0)
    }
}

/// Risk tiers, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Safety,
    Caution,
    Risky,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safety => "safety",
            RiskLevel::Caution => "caution",
            RiskLevel::Risky => "risky",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "safety" => Ok(RiskLevel::Safety),
            "caution" => Ok(RiskLevel::Caution),
            "risky" => Ok(RiskLevel::Risky),
            other => Err(EngineError::InvalidRecord(format!(
                "unknown risk level '{other}'"
            ))),
        }
    }
}

/// Auxiliary per-day values stored next to the main features.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureParams {
    pub asymmetry: Option<f64>,
    pub decel_density: Option<f64>,
    pub time_to_feet: Option<f64>,
    /// Acute EWMA of player load.
    pub acute_load: Option<f64>,
    /// Chronic EWMA of player load.
    pub chronic_load: Option<f64>,
    /// EWMA ACWR of total distance.
    pub acwr_distance: Option<f64>,
    /// EWMA ACWR of jump count. Goalkeepers only.
    pub acwr_jump: Option<f64>,
}

/// Computed features and risk label for one athlete-day.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub athlete_id: String,
    pub date: NaiveDate,
    pub acwr_load: Option<f64>,
    pub acwr_hsr: Option<f64>,
    pub acwr_dive: Option<f64>,
    pub efficiency_index: Option<f64>,
    pub load_per_meter: Option<f64>,
    pub monotony_load: Option<f64>,
    pub risk_level: RiskLevel,
    pub risk_reasons: Vec<String>,
    pub params: FeatureParams,
}

/// Which athletes an operation touches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AthleteScope {
    #[default]
    All,
    Only(Vec<String>),
}

impl AthleteScope {
    /// Builds a scope from caller-supplied ids; an empty list means every athlete.
    pub fn from_ids(ids: Vec<String>) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for id in ids {
            let id = id.trim().to_string();
            if !id.is_empty() && !unique.contains(&id) {
                unique.push(id);
            }
        }
        if unique.is_empty() {
            AthleteScope::All
        } else {
            AthleteScope::Only(unique)
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, AthleteScope::All)
    }

    pub fn contains(&self, athlete_id: &str) -> bool {
        match self {
            AthleteScope::All => true,
            AthleteScope::Only(ids) => ids.iter().any(|id| id == athlete_id),
        }
    }
}

/// Inclusive calendar range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }
}
