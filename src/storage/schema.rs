//! SQLite schema for the workload store.

/// Current schema version.
pub const CURRENT_VERSION: i32 = 1;

/// Schema version tracking table.
pub const SCHEMA_VERSION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

/// Tables and indexes of version 1.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS athletes (
    athlete_id TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    position TEXT
);

CREATE TABLE IF NOT EXISTS ingest_batches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source_name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Raw rows are immutable; they only disappear through cascades.
CREATE TABLE IF NOT EXISTS raw_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    batch_id INTEGER NOT NULL REFERENCES ingest_batches(id) ON DELETE CASCADE,
    row_number INTEGER NOT NULL,
    athlete_id TEXT REFERENCES athletes(athlete_id) ON DELETE CASCADE,
    date TEXT,
    session_name TEXT NOT NULL DEFAULT '',
    fields_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_raw_sessions_batch ON raw_sessions(batch_id);
CREATE INDEX IF NOT EXISTS idx_raw_sessions_athlete_date ON raw_sessions(athlete_id, date);

CREATE TABLE IF NOT EXISTS daily_records (
    athlete_id TEXT NOT NULL REFERENCES athletes(athlete_id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    total_duration REAL NOT NULL,
    total_distance REAL NOT NULL,
    total_player_load REAL NOT NULL,
    max_velocity REAL,
    mean_heart_rate REAL,
    hsr_distance REAL NOT NULL,
    high_decel_count REAL NOT NULL,
    dive_count REAL NOT NULL,
    dive_load REAL NOT NULL,
    avg_time_to_feet REAL,
    jump_count REAL NOT NULL,
    is_match_day INTEGER NOT NULL DEFAULT 0,
    md_offset INTEGER,
    md_phase TEXT NOT NULL DEFAULT '',
    metrics_json TEXT NOT NULL DEFAULT '{}',
    UNIQUE(athlete_id, date)
);

CREATE INDEX IF NOT EXISTS idx_daily_records_date ON daily_records(date);

CREATE TABLE IF NOT EXISTS feature_records (
    athlete_id TEXT NOT NULL REFERENCES athletes(athlete_id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    acwr_load REAL,
    acwr_hsr REAL,
    acwr_dive REAL,
    efficiency_index REAL,
    load_per_meter REAL,
    monotony_load REAL,
    risk_level TEXT NOT NULL DEFAULT 'safety',
    risk_reasons_json TEXT NOT NULL DEFAULT '[]',
    params_json TEXT NOT NULL DEFAULT '{}',
    UNIQUE(athlete_id, date)
);

CREATE INDEX IF NOT EXISTS idx_feature_records_date ON feature_records(date);
"#;
