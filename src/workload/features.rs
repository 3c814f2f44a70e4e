//! Workload features computed per athlete from a dense daily series.
//!
//! Everything is causal: the value for a day only depends on that day and
//! the days before it. Ratios that could divide by zero use floored
//! denominators and every output passes through [`finite_or_null`].

use std::collections::VecDeque;

use crate::config::EngineConfig;
use crate::workload::risk::classify;
use crate::workload::series::DenseDay;
use crate::workload::types::{FeatureParams, FeatureRecord, Position};
use crate::workload::utility::{finite_or_null, mean, sample_stddev};

/// Acute/chronic EWMA values after one day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadStep {
    pub acute: f64,
    pub chronic: f64,
    pub ratio: f64,
}

/// Running acute and chronic EWMAs of one load signal.
///
/// Both averages seed on the first day's value. The chronic denominator of
/// the ratio never drops below `max(mean so far * floor_ratio, epsilon)`.
#[derive(Debug, Clone)]
pub struct LoadTracker {
    alpha_acute: f64,
    alpha_chronic: f64,
    floor_ratio: f64,
    epsilon: f64,
    acute: Option<f64>,
    chronic: Option<f64>,
    total: f64,
    days: usize,
}

impl LoadTracker {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            alpha_acute: EngineConfig::alpha(config.acute_span_days),
            alpha_chronic: EngineConfig::alpha(config.chronic_span_days),
            floor_ratio: config.chronic_floor_ratio,
            epsilon: config.epsilon,
            acute: None,
            chronic: None,
            total: 0.0,
            days: 0,
        }
    }

    /// Advances one calendar day with that day's load.
    pub fn advance(&mut self, value: f64) -> LoadStep {
        let acute = ewma(self.acute, value, self.alpha_acute);
        let chronic = ewma(self.chronic, value, self.alpha_chronic);
        self.acute = Some(acute);
        self.chronic = Some(chronic);

        self.total += value;
        self.days += 1;
        let historical_mean = self.total / self.days as f64;
        let floor = (historical_mean * self.floor_ratio).max(self.epsilon);

        LoadStep {
            acute,
            chronic,
            ratio: acute / chronic.max(floor),
        }
    }
}

fn ewma(prev: Option<f64>, value: f64, alpha: f64) -> f64 {
    match prev {
        None => value,
        Some(prev) => alpha * value + (1.0 - alpha) * prev,
    }
}

/// Trailing-window monotony (mean / sample standard deviation).
///
/// Early days use however many samples exist; the standard deviation is
/// floored at `epsilon`.
#[derive(Debug, Clone)]
pub struct MonotonyWindow {
    size: usize,
    epsilon: f64,
    values: VecDeque<f64>,
}

impl MonotonyWindow {
    pub fn new(size: usize, epsilon: f64) -> Self {
        let size = size.max(1);
        Self {
            size,
            epsilon,
            values: VecDeque::with_capacity(size),
        }
    }

    pub fn push(&mut self, value: f64) -> f64 {
        if self.values.len() == self.size {
            self.values.pop_front();
        }
        self.values.push_back(value);

        let window: Vec<f64> = self.values.iter().copied().collect();
        let m = mean(&window);
        m / sample_stddev(&window, m).max(self.epsilon)
    }
}

/// `|left - right| / (left + right)`, or 0 when the total is at or below
/// `min_total`.
pub fn asymmetry(left: f64, right: f64, min_total: f64, epsilon: f64) -> f64 {
    let total = left + right;
    if total <= min_total {
        return 0.0;
    }
    (left - right).abs() / total.max(epsilon)
}

/// Computes features and risk for every day of one athlete's dense series.
pub fn compute_features(
    athlete_id: &str,
    series: &[DenseDay],
    position: Position,
    config: &EngineConfig,
) -> Vec<FeatureRecord> {
    let mut load = LoadTracker::new(config);
    let mut signal = LoadTracker::new(config);
    let mut distance = LoadTracker::new(config);
    let mut jumps = LoadTracker::new(config);
    let mut monotony = MonotonyWindow::new(config.monotony_window_days, config.epsilon);

    let mut out = Vec::with_capacity(series.len());
    for day in series {
        let load_step = load.advance(day.total_player_load);
        let monotony_load = monotony.push(day.total_player_load);
        let distance_step = distance.advance(day.total_distance);

        let (acwr_hsr, acwr_dive, acwr_jump, asym) = match position {
            Position::FieldPlayer => {
                let step = signal.advance(day.hsr_distance);
                let asym = asymmetry(
                    day.turn_left,
                    day.turn_right,
                    config.fp_asymmetry_min_total,
                    config.epsilon,
                );
                (Some(step.ratio), None, None, asym)
            }
            Position::Goalkeeper => {
                let step = signal.advance(day.dive_load);
                let jump_step = jumps.advance(day.jump_count);
                let asym = asymmetry(
                    day.dive_left,
                    day.dive_right,
                    config.gk_asymmetry_min_total,
                    config.epsilon,
                );
                (None, Some(step.ratio), Some(jump_step.ratio), asym)
            }
        };

        let load_per_meter = (day.total_distance > config.load_per_meter_min_distance)
            .then(|| day.total_player_load / day.total_distance);
        let decel_density = if day.total_distance > config.decel_density_min_distance {
            day.high_decel_count / (day.total_distance / 1000.0)
        } else {
            0.0
        };
        let efficiency_index = day
            .mean_heart_rate
            .filter(|hr| *hr > 0.0)
            .map(|hr| day.total_player_load / hr);

        let mut record = FeatureRecord {
            athlete_id: athlete_id.to_string(),
            date: day.date,
            acwr_load: finite_or_null(Some(load_step.ratio)),
            acwr_hsr: finite_or_null(acwr_hsr),
            acwr_dive: finite_or_null(acwr_dive),
            efficiency_index: finite_or_null(efficiency_index),
            load_per_meter: finite_or_null(load_per_meter),
            monotony_load: finite_or_null(Some(monotony_load)),
            params: FeatureParams {
                asymmetry: finite_or_null(Some(asym)),
                decel_density: finite_or_null(Some(decel_density)),
                time_to_feet: finite_or_null(day.avg_time_to_feet),
                acute_load: finite_or_null(Some(load_step.acute)),
                chronic_load: finite_or_null(Some(load_step.chronic)),
                acwr_distance: finite_or_null(Some(distance_step.ratio)),
                acwr_jump: finite_or_null(acwr_jump),
            },
            ..Default::default()
        };

        let assessment = classify(position, &record);
        record.risk_level = assessment.level;
        record.risk_reasons = assessment.reasons;
        out.push(record);
    }

    out
}
