//! Rule-based risk tiers for one computed athlete-day.
//!
//! Field players:
//!
//! | Rule                 | Level   |
//! |----------------------|---------|
//! | HSR ACWR > 1.5       | risky   |
//! | HSR ACWR > 1.3       | caution |
//! | Efficiency < 0.5     | caution |
//! | Monotony > 2.5       | caution |
//! | Load ACWR > 1.5      | caution |
//!
//! Goalkeepers:
//!
//! | Rule                 | Level   |
//! |----------------------|---------|
//! | Time to feet > 2.0 s | risky   |
//! | Time to feet > 1.5 s | caution |
//! | Dive ACWR > 1.5      | risky   |
//! | Asymmetry > 0.4      | caution |
//! | Monotony > 2.5       | caution |
//!
//! The final level is the most severe level any rule triggered.

use crate::workload::types::{FeatureRecord, Position, RiskLevel};

pub const HSR_ACWR_RISKY: f64 = 1.5;
pub const HSR_ACWR_CAUTION: f64 = 1.3;
pub const EFFICIENCY_CAUTION: f64 = 0.5;
pub const MONOTONY_CAUTION: f64 = 2.5;
pub const LOAD_ACWR_CAUTION: f64 = 1.5;
pub const TIME_TO_FEET_RISKY: f64 = 2.0;
pub const TIME_TO_FEET_CAUTION: f64 = 1.5;
pub const DIVE_ACWR_RISKY: f64 = 1.5;
pub const ASYMMETRY_CAUTION: f64 = 0.4;

/// Risk level plus the reasons that produced it, in rule order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Assessment {
    pub level: RiskLevel,
    pub reasons: Vec<String>,
}

impl Assessment {
    /// Records a triggered rule. The level only ever escalates.
    fn flag(&mut self, level: RiskLevel, reason: String) {
        self.level = self.level.max(level);
        self.reasons.push(reason);
    }
}

/// Classifies a feature day with the rule set of `position`.
pub fn classify(position: Position, features: &FeatureRecord) -> Assessment {
    match position {
        Position::FieldPlayer => classify_field_player(features),
        Position::Goalkeeper => classify_goalkeeper(features),
    }
}

fn classify_field_player(f: &FeatureRecord) -> Assessment {
    let mut out = Assessment::default();

    if let Some(v) = f.acwr_hsr {
        if v > HSR_ACWR_RISKY {
            out.flag(RiskLevel::Risky, format!("HSR ACWR {v:.2} > {HSR_ACWR_RISKY}"));
        } else if v > HSR_ACWR_CAUTION {
            out.flag(RiskLevel::Caution, format!("HSR ACWR {v:.2} > {HSR_ACWR_CAUTION}"));
        }
    }
    if let Some(v) = f.efficiency_index.filter(|v| *v < EFFICIENCY_CAUTION) {
        out.flag(
            RiskLevel::Caution,
            format!("Low Efficiency {v:.2} < {EFFICIENCY_CAUTION}"),
        );
    }
    if let Some(v) = f.monotony_load.filter(|v| *v > MONOTONY_CAUTION) {
        out.flag(
            RiskLevel::Caution,
            format!("High Monotony {v:.2} > {MONOTONY_CAUTION}"),
        );
    }
    if let Some(v) = f.acwr_load.filter(|v| *v > LOAD_ACWR_CAUTION) {
        out.flag(
            RiskLevel::Caution,
            format!("Load ACWR {v:.2} > {LOAD_ACWR_CAUTION}"),
        );
    }

    out
}

fn classify_goalkeeper(f: &FeatureRecord) -> Assessment {
    let mut out = Assessment::default();

    if let Some(v) = f.params.time_to_feet {
        if v > TIME_TO_FEET_RISKY {
            out.flag(
                RiskLevel::Risky,
                format!("Recovery Time {v:.2}s > {TIME_TO_FEET_RISKY}s"),
            );
        } else if v > TIME_TO_FEET_CAUTION {
            out.flag(
                RiskLevel::Caution,
                format!("Recovery Time {v:.2}s > {TIME_TO_FEET_CAUTION}s"),
            );
        }
    }
    if let Some(v) = f.acwr_dive.filter(|v| *v > DIVE_ACWR_RISKY) {
        out.flag(RiskLevel::Risky, format!("Dive ACWR {v:.2} > {DIVE_ACWR_RISKY}"));
    }
    if let Some(v) = f.params.asymmetry.filter(|v| *v > ASYMMETRY_CAUTION) {
        out.flag(
            RiskLevel::Caution,
            format!("High Asymmetry {v:.2} > {ASYMMETRY_CAUTION}"),
        );
    }
    if let Some(v) = f.monotony_load.filter(|v| *v > MONOTONY_CAUTION) {
        out.flag(
            RiskLevel::Caution,
            format!("High Monotony {v:.2} > {MONOTONY_CAUTION}"),
        );
    }

    out
}
