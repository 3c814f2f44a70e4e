//! Goalkeeper / field-player detection from historical dive activity.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::PositionMeasure;
use crate::workload::types::{Athlete, DailyRecord, Position};

/// A stored position that changed during detection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionTransition {
    pub athlete_id: String,
    pub athlete_name: String,
    /// `None` when the athlete had never been classified.
    pub from: Option<Position>,
    pub to: Position,
}

/// Outcome of a detection pass.
#[derive(Debug, Default, Serialize)]
pub struct PositionReport {
    pub detected_gk_ids: BTreeSet<String>,
    pub transitions: Vec<PositionTransition>,
}

/// Summarises each athlete's dive load across their daily history.
pub fn dive_activity(records: &[DailyRecord], measure: PositionMeasure) -> BTreeMap<String, f64> {
    let mut activity: BTreeMap<String, f64> = BTreeMap::new();
    for record in records {
        let slot = activity.entry(record.athlete_id.clone()).or_insert(0.0);
        match measure {
            PositionMeasure::Total => *slot += record.dive_load,
            PositionMeasure::PeakDay => *slot = slot.max(record.dive_load),
        }
    }
    activity
}

/// Activity strictly above `threshold` is a goalkeeper.
pub fn classify_activity(activity: f64, threshold: f64) -> Position {
    if activity > threshold {
        Position::Goalkeeper
    } else {
        Position::FieldPlayer
    }
}

/// Compares fresh classifications against the stored positions of `athletes`.
///
/// Athletes with no dive history are classified from an activity of 0.
pub fn detect(
    athletes: &[Athlete],
    activity: &BTreeMap<String, f64>,
    threshold: f64,
) -> PositionReport {
    let detected_gk_ids: BTreeSet<String> = activity
        .iter()
        .filter(|(_, a)| classify_activity(**a, threshold) == Position::Goalkeeper)
        .map(|(id, _)| id.clone())
        .collect();

    let transitions = athletes
        .iter()
        .filter_map(|athlete| {
            let to = if detected_gk_ids.contains(&athlete.athlete_id) {
                Position::Goalkeeper
            } else {
                Position::FieldPlayer
            };
            (athlete.position != Some(to)).then(|| PositionTransition {
                athlete_id: athlete.athlete_id.clone(),
                athlete_name: athlete.name.clone(),
                from: athlete.position,
                to,
            })
        })
        .collect();

    PositionReport {
        detected_gk_ids,
        transitions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn daily(athlete: &str, d: u32, dive_load: f64) -> DailyRecord {
        DailyRecord {
            athlete_id: athlete.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, d).unwrap(),
            dive_load,
            ..Default::default()
        }
    }

    fn athlete(id: &str, position: Option<Position>) -> Athlete {
        Athlete {
            athlete_id: id.to_string(),
            name: format!("Player {id}"),
            position,
        }
    }

    #[test]
    fn test_threshold_is_strict() {
        assert_eq!(classify_activity(100.0, 100.0), Position::FieldPlayer);
        assert_eq!(classify_activity(100.5, 100.0), Position::Goalkeeper);
    }

    #[test]
    fn test_dive_activity_measures() {
        let records = vec![daily("G1", 1, 60.0), daily("G1", 2, 70.0), daily("F1", 1, 0.0)];

        let total = dive_activity(&records, PositionMeasure::Total);
        assert_eq!(total["G1"], 130.0);
        assert_eq!(total["F1"], 0.0);

        let peak = dive_activity(&records, PositionMeasure::PeakDay);
        assert_eq!(peak["G1"], 70.0);
    }

    #[test]
    fn test_bootstrap_records_transition_from_none() {
        let records = vec![daily("G1", 1, 150.0), daily("F1", 1, 3.0)];
        let activity = dive_activity(&records, PositionMeasure::Total);
        let athletes = vec![athlete("G1", None), athlete("F1", None)];

        let report = detect(&athletes, &activity, 100.0);

        assert_eq!(report.detected_gk_ids.len(), 1);
        assert!(report.detected_gk_ids.contains("G1"));
        assert_eq!(report.transitions.len(), 2);
        assert_eq!(report.transitions[0].from, None);
        assert_eq!(report.transitions[0].to, Position::Goalkeeper);
        assert_eq!(report.transitions[1].to, Position::FieldPlayer);
    }

    #[test]
    fn test_unchanged_positions_are_not_reported() {
        let records = vec![daily("G1", 1, 150.0)];
        let activity = dive_activity(&records, PositionMeasure::Total);
        let athletes = vec![
            athlete("G1", Some(Position::Goalkeeper)),
            athlete("F1", Some(Position::FieldPlayer)),
        ];

        let report = detect(&athletes, &activity, 100.0);
        assert!(report.transitions.is_empty());
    }

    #[test]
    fn test_former_goalkeeper_reverts_to_field_player() {
        let records = vec![daily("X1", 1, 100.0)];
        let activity = dive_activity(&records, PositionMeasure::Total);
        let athletes = vec![athlete("X1", Some(Position::Goalkeeper))];

        let report = detect(&athletes, &activity, 100.0);
        assert_eq!(report.transitions.len(), 1);
        assert_eq!(report.transitions[0].from, Some(Position::Goalkeeper));
        assert_eq!(report.transitions[0].to, Position::FieldPlayer);
    }
}
