//! Athlete workload features and risk grading.
//!
//! Raw session rows are reduced to daily records, gap-filled into a dense
//! calendar per athlete, turned into acute:chronic ratios and related indices,
//! and graded into a risk tier with readable reasons.

pub mod aggregate;
pub mod export;
pub mod features;
pub mod pipeline;
pub mod position;
pub mod risk;
pub mod series;
pub mod types;
pub mod utility;
