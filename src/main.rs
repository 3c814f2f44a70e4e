//! CLI entry point for the workload rater.
//!
//! Provides subcommands for ingesting raw session exports, rebuilding daily
//! records, detecting positions, computing workload features, and exporting
//! the results locally or to S3.

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use workload_rater::{
    config::EngineConfig,
    output::{append_features_csv, print_json},
    parser::read_raw_rows,
    storage::Database,
    workload::export::{ExportSink, LocalSink, S3Sink, collect_series, publish},
    workload::pipeline::{
        DailyRebuildOptions, FeatureRebuildOptions, classify_positions, ingest_raw_rows,
        rebuild_daily_series, rebuild_workload_features, scope_for_batch,
    },
    workload::types::{AthleteScope, DateRange},
};

#[derive(Parser)]
#[command(name = "workload_rater")]
#[command(about = "Computes athlete workload features and injury-risk grades", long_about = None)]
struct Cli {
    /// SQLite database path (defaults to WORKLOAD_DB_PATH or workload.db)
    #[arg(long, global = true)]
    db: Option<String>,

    /// Engine config JSON (defaults to WORKLOAD_CONFIG when set)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a raw session CSV export as a new batch and build its daily records
    Ingest {
        /// CSV file to ingest
        #[arg(long)]
        csv: String,

        /// Only store the raw rows
        #[arg(long, default_value_t = false)]
        skip_daily: bool,
    },
    /// Rebuild daily records from stored raw sessions
    BuildDaily {
        /// Athlete to rebuild (repeatable, default: all)
        #[arg(long = "athlete-id")]
        athlete_ids: Vec<String>,

        /// Restrict to the athletes of one ingest batch
        #[arg(long)]
        batch_id: Option<i64>,

        /// Delete existing daily records in scope before rebuilding
        #[arg(long, default_value_t = false)]
        delete_existing: bool,

        /// Allow deleting every athlete's daily records
        #[arg(long, default_value_t = false)]
        confirm_delete_all: bool,
    },
    /// Re-detect goalkeepers from dive history
    DetectPositions {
        /// Athlete to classify (repeatable, default: all)
        #[arg(long = "athlete-id")]
        athlete_ids: Vec<String>,

        /// Dive activity above which an athlete is a goalkeeper
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Rebuild workload features and risk grades
    BuildFeatures {
        /// Athlete to rebuild (repeatable, default: all)
        #[arg(long = "athlete-id")]
        athlete_ids: Vec<String>,

        /// Restrict to the athletes of one ingest batch
        #[arg(long)]
        batch_id: Option<i64>,

        /// First day to rebuild (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day to rebuild (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Allow replacing every athlete's features
        #[arg(long, default_value_t = false)]
        confirm_delete_all: bool,
    },
    /// Export feature series as JSON, locally or to S3
    Export {
        /// Directory to write JSON files to
        #[arg(short, long, default_value = "exports")]
        output_dir: String,

        /// Athlete to export (repeatable, default: all)
        #[arg(long = "athlete-id")]
        athlete_ids: Vec<String>,

        /// Optional: S3 bucket name to upload to instead (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: Option<String>,

        /// Optional: Gzip compress JSON objects before uploading to S3
        #[arg(long, default_value_t = false)]
        gzip: bool,

        /// Optional: CSV file to append flat feature rows to
        #[arg(long)]
        csv: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/workload_rater.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("workload_rater.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let db_path = cli
        .db
        .or_else(|| std::env::var("WORKLOAD_DB_PATH").ok())
        .unwrap_or_else(|| "workload.db".to_string());
    let config = match cli.config.or_else(|| std::env::var("WORKLOAD_CONFIG").ok()) {
        Some(path) => EngineConfig::load(&path)?,
        None => EngineConfig::default(),
    };
    let mut db = Database::open(Path::new(&db_path))?;
    info!(db = %db_path, "Opened workload store");

    match cli.command {
        Commands::Ingest { csv, skip_daily } => {
            let rows = read_raw_rows(File::open(&csv)?)?;
            let source_name = Path::new(&csv)
                .file_name()
                .and_then(OsStr::to_str)
                .unwrap_or(&csv);
            let report = ingest_raw_rows(&mut db, source_name, &rows)?;
            print_json(&report)?;

            if !skip_daily {
                let scope = scope_for_batch(&db, report.batch_id)?;
                let daily = rebuild_daily_series(
                    &mut db,
                    &scope,
                    &config,
                    DailyRebuildOptions::default(),
                )?;
                print_json(&daily)?;
            }
        }
        Commands::BuildDaily {
            athlete_ids,
            batch_id,
            delete_existing,
            confirm_delete_all,
        } => {
            let scope = resolve_scope(&db, athlete_ids, batch_id)?;
            let options = DailyRebuildOptions {
                delete_existing,
                confirm_delete_all,
            };
            let report = rebuild_daily_series(&mut db, &scope, &config, options)?;
            print_json(&report)?;
        }
        Commands::DetectPositions {
            athlete_ids,
            threshold,
        } => {
            let scope = AthleteScope::from_ids(athlete_ids);
            let threshold = threshold.unwrap_or(config.position_threshold);
            let report = classify_positions(&mut db, &scope, threshold, &config)?;
            print_json(&report)?;
        }
        Commands::BuildFeatures {
            athlete_ids,
            batch_id,
            from,
            to,
            confirm_delete_all,
        } => {
            let scope = resolve_scope(&db, athlete_ids, batch_id)?;
            let range = (from.is_some() || to.is_some()).then_some(DateRange {
                start: from,
                end: to,
            });
            let options = FeatureRebuildOptions {
                confirm_delete_all,
                range,
            };
            let written = rebuild_workload_features(&mut db, &scope, &config, options)?;
            info!(written, "Feature rebuild complete");
        }
        Commands::Export {
            output_dir,
            athlete_ids,
            s3_bucket,
            gzip,
            csv,
        } => {
            let scope = AthleteScope::from_ids(athlete_ids);
            let (series, index) = collect_series(&db, &scope)?;

            let sink: Box<dyn ExportSink> = match s3_bucket {
                Some(bucket) => Box::new(S3Sink::from_env(bucket, gzip).await),
                None => {
                    if gzip {
                        warn!("Gzip only applies to S3 uploads, writing plain JSON");
                    }
                    Box::new(LocalSink::new(&output_dir))
                }
            };
            publish(sink.as_ref(), &series, &index).await?;

            if let Some(csv) = csv {
                for athlete in &series {
                    append_features_csv(&csv, &athlete.features)?;
                }
            }
        }
    }

    Ok(())
}

/// Athletes named on the command line, plus those of `batch_id` when given.
fn resolve_scope(
    db: &Database,
    athlete_ids: Vec<String>,
    batch_id: Option<i64>,
) -> Result<AthleteScope> {
    let Some(batch_id) = batch_id else {
        return Ok(AthleteScope::from_ids(athlete_ids));
    };

    let mut ids = match scope_for_batch(db, batch_id)? {
        AthleteScope::Only(ids) => ids,
        AthleteScope::All => Vec::new(),
    };
    ids.extend(athlete_ids.into_iter().map(|id| id.trim().to_string()));
    ids.retain(|id| !id.is_empty());
    ids.sort();
    ids.dedup();
    Ok(AthleteScope::Only(ids))
}
