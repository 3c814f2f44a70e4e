//! Publishing stored feature series as JSON documents.
//!
//! Layout under a sink root:
//! - `features/{athlete_id}.json`: one athlete's full feature series
//! - `features.json`: index with each athlete's latest risk level

use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, NaiveDate, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::error::EngineResult;
use crate::storage::Database;
use crate::workload::types::{AthleteScope, FeatureRecord, Position, RiskLevel};

/// Feature time series of one athlete.
#[derive(Debug, Clone, Serialize)]
pub struct AthleteFeatureSeries {
    pub athlete_id: String,
    pub name: String,
    pub position: Position,
    pub features: Vec<FeatureRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeatureIndexEntry {
    pub athlete_id: String,
    pub name: String,
    pub position: Position,
    pub latest_date: Option<NaiveDate>,
    pub latest_risk_level: Option<RiskLevel>,
    pub days: usize,
}

/// Top-level index of exported athletes, served as `features.json`.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureIndex {
    pub generated_at: DateTime<Utc>,
    pub athletes: Vec<FeatureIndexEntry>,
}

/// Reads the feature series of every athlete in `scope`.
///
/// Athletes without feature rows are listed in the index with no latest values.
pub fn collect_series(
    db: &Database,
    scope: &AthleteScope,
) -> EngineResult<(Vec<AthleteFeatureSeries>, FeatureIndex)> {
    let athletes = db.athletes(scope)?;
    let mut by_athlete: BTreeMap<String, Vec<FeatureRecord>> = BTreeMap::new();
    for feature in db.features(scope, None)? {
        by_athlete
            .entry(feature.athlete_id.clone())
            .or_default()
            .push(feature);
    }

    let mut series = Vec::with_capacity(athletes.len());
    let mut entries = Vec::with_capacity(athletes.len());
    for athlete in athletes {
        let own = by_athlete.remove(&athlete.athlete_id).unwrap_or_default();
        let position = athlete.position.unwrap_or_default();
        let latest = own.last();
        entries.push(FeatureIndexEntry {
            athlete_id: athlete.athlete_id.clone(),
            name: athlete.name.clone(),
            position,
            latest_date: latest.map(|f| f.date),
            latest_risk_level: latest.map(|f| f.risk_level),
            days: own.len(),
        });
        series.push(AthleteFeatureSeries {
            athlete_id: athlete.athlete_id,
            name: athlete.name,
            position,
            features: own,
        });
    }

    let index = FeatureIndex {
        generated_at: Utc::now(),
        athletes: entries,
    };
    Ok((series, index))
}

/// Destination for exported documents.
#[async_trait]
pub trait ExportSink: Send + Sync {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()>;
}

/// Writes documents as files below a local directory.
pub struct LocalSink {
    root: PathBuf,
}

impl LocalSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ExportSink for LocalSink {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, body).await?;
        debug!(path = %path.display(), "Wrote export file");
        Ok(())
    }
}

/// Uploads documents to an S3 bucket, optionally gzip-compressed.
pub struct S3Sink {
    client: aws_sdk_s3::Client,
    bucket: String,
    gzip: bool,
}

impl S3Sink {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, gzip: bool) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            gzip,
        }
    }

    /// Builds a client from the environment's AWS configuration.
    pub async fn from_env(bucket: impl Into<String>, gzip: bool) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket, gzip)
    }
}

#[async_trait]
impl ExportSink for S3Sink {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<()> {
        let (body, key) = if self.gzip {
            (gzip(&body)?, format!("{key}.gz"))
        } else {
            (body, key.to_string())
        };

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .content_type("application/json");
        if self.gzip {
            request = request.content_encoding("gzip");
        }
        request.send().await?;

        debug!(bucket = %self.bucket, key = %key, "Uploaded export object");
        Ok(())
    }
}

pub fn gzip(body: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body)?;
    Ok(encoder.finish()?)
}

/// Object key of one athlete's series. The id is percent-encoded so it stays
/// a single path segment.
pub fn series_key(athlete_id: &str) -> String {
    format!("features/{}.json", urlencoding::encode(athlete_id))
}

/// Writes every series and then the index to `sink`.
pub async fn publish(
    sink: &dyn ExportSink,
    series: &[AthleteFeatureSeries],
    index: &FeatureIndex,
) -> Result<usize> {
    for athlete in series {
        let key = series_key(&athlete.athlete_id);
        sink.put(&key, serde_json::to_vec(athlete)?).await?;
    }
    sink.put("features.json", serde_json::to_vec(index)?).await?;

    info!(athletes = series.len(), "Published feature series");
    Ok(series.len())
}
