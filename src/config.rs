//! Tunable thresholds for the workload engine.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// How dive activity is summarised when detecting goalkeepers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionMeasure {
    /// Sum of daily dive load over the athlete's whole history.
    #[default]
    Total,
    /// Largest single-day dive load.
    PeakDay,
}

/// Engine settings. Every field has a default, so a config file only needs
/// the values it overrides:
/// ```json
/// {
///   "position_threshold": 120,
///   "hsr_velocity_bands": [5, 6]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub acute_span_days: u32,
    pub chronic_span_days: u32,
    /// Share of the historical mean load used as the chronic denominator floor.
    pub chronic_floor_ratio: f64,
    /// Smallest denominator used anywhere a ratio could divide by zero.
    pub epsilon: f64,
    pub monotony_window_days: usize,
    /// Dive totals at or below this leave goalkeeper asymmetry at 0.
    pub gk_asymmetry_min_total: f64,
    /// Turning totals at or below this leave field-player asymmetry at 0.
    pub fp_asymmetry_min_total: f64,
    /// Metres a day must exceed before load-per-meter is reported.
    pub load_per_meter_min_distance: f64,
    /// Metres a day must exceed before decel density is reported.
    pub decel_density_min_distance: f64,
    /// Velocity bands summed into HSR distance.
    pub hsr_velocity_bands: Vec<u8>,
    /// Dive activity strictly above this marks an athlete as a goalkeeper.
    pub position_threshold: f64,
    pub position_measure: PositionMeasure,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            acute_span_days: 7,
            chronic_span_days: 28,
            chronic_floor_ratio: 0.3,
            epsilon: 1e-6,
            monotony_window_days: 7,
            gk_asymmetry_min_total: 5.0,
            fp_asymmetry_min_total: 10.0,
            load_per_meter_min_distance: 500.0,
            decel_density_min_distance: 100.0,
            hsr_velocity_bands: vec![5, 6],
            position_threshold: 100.0,
            position_measure: PositionMeasure::Total,
        }
    }
}

impl EngineConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Rejects settings the feature engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.epsilon.is_nan() || self.epsilon <= 0.0 {
            return Err(EngineError::Config(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        if self.acute_span_days == 0 || self.chronic_span_days == 0 {
            return Err(EngineError::Config(
                "EWMA spans must be at least one day".to_string(),
            ));
        }
        if self.monotony_window_days == 0 {
            return Err(EngineError::Config(
                "monotony window must be at least one day".to_string(),
            ));
        }
        if self.chronic_floor_ratio.is_nan() || self.chronic_floor_ratio < 0.0 {
            return Err(EngineError::Config(format!(
                "chronic_floor_ratio must be non-negative, got {}",
                self.chronic_floor_ratio
            )));
        }
        Ok(())
    }

    /// EWMA smoothing factor for a span of `days`.
    pub fn alpha(days: u32) -> f64 {
        2.0 / (f64::from(days) + 1.0)
    }

    /// Column names of the velocity bands that make up HSR distance.
    pub fn hsr_columns(&self) -> Vec<String> {
        self.hsr_velocity_bands
            .iter()
            .map(|band| format!("velocity_band{band}_total_distance"))
            .collect()
    }
}
