//! SQLite persistence for athletes, raw sessions, daily and feature records.

pub mod database;
pub mod schema;

pub use database::{Database, StoredBatch};
