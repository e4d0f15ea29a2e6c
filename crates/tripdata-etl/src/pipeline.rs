//! Pipeline orchestration
//!
//! Drives the twelve monthly files for one configured year through
//! Stage -> Extract -> Transform -> Load, sequentially, in two explicit
//! passes. Pass 1 stages every file before pass 2 processes any of them:
//! a transient extract or load failure in month five must not keep months
//! six through twelve from being staged. Each month is an independent unit
//! of work; there is no cross-file transaction and no rollback across
//! files.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::time::Duration;
use tracing::{info, instrument};

use crate::extract::extract;
use crate::load::{load, LoadStatus};
use crate::storage::{ObjectStore, DEFAULT_PART_SIZE};
use crate::transform::transform;

/// Bucket every monthly file is staged into
pub const DEFAULT_BUCKET: &str = "nyc-taxi-data";

/// Public base URL for NYC TLC trip-record files
pub const DEFAULT_BASE_URL: &str = "https://d37ci6vzurychx.cloudfront.net/trip-data";

/// Warehouse schema holding raw loads
pub const DEFAULT_SCHEMA: &str = "raw";

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Remote filename for one month of yellow-taxi trip records
pub fn trip_file_name(year: i32, month: u32) -> String {
    format!("yellow_tripdata_{}-{:02}.parquet", year, month)
}

/// Object key for one month; doubles as the provenance tag on loaded rows
pub fn object_key(year: i32, month: u32) -> String {
    format!("{}/{:02}/{}", year, month, trip_file_name(year, month))
}

/// Download URL for one month
pub fn file_url(base_url: &str, year: i32, month: u32) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        trip_file_name(year, month)
    )
}

/// What one pipeline run is asked to do
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub year: i32,
    pub bucket: String,
    pub schema: String,
    pub table: String,
    pub base_url: String,
    pub part_size: usize,
}

impl PipelineConfig {
    pub fn for_year(year: i32) -> Self {
        Self {
            year,
            bucket: DEFAULT_BUCKET.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            table: format!("nyc_taxi_data_{}", year),
            base_url: DEFAULT_BASE_URL.to_string(),
            part_size: DEFAULT_PART_SIZE,
        }
    }
}

/// Per-run counters, logged at the end of the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub staged: usize,
    pub stage_failures: usize,
    pub loaded_rows: usize,
    pub skipped_empty: usize,
}

/// HTTP client with the bounded connect/read timeouts staging relies on
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .read_timeout(HTTP_READ_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")
}

/// Run the full pipeline for the configured year.
///
/// Bucket creation and load failures propagate and abort the run; staging
/// and extraction failures are contained per file.
#[instrument(skip(store, pool, http), fields(year = config.year, table = %config.table))]
pub async fn run(
    store: &ObjectStore,
    pool: &PgPool,
    http: &reqwest::Client,
    config: &PipelineConfig,
) -> Result<RunSummary> {
    store.ensure_bucket(&config.bucket).await?;

    let months: Vec<u32> = (1..=12).collect();
    let mut summary = RunSummary::default();

    // Pass 1: stage all twelve files
    for &month in &months {
        let key = object_key(config.year, month);
        let url = file_url(&config.base_url, config.year, month);
        let status = store
            .stage_from_url(http, &config.bucket, &key, &url, config.part_size)
            .await;
        if status.is_staged() {
            summary.staged += 1;
        } else {
            summary.stage_failures += 1;
        }
    }

    // Pass 2: extract, transform, and load each staged key
    for &month in &months {
        let key = object_key(config.year, month);
        let batch = extract(store, &config.bucket, &key).await;
        let batch = transform(batch, &key)?;
        match load(pool, &batch, &config.schema, &config.table, &key).await? {
            LoadStatus::Loaded { rows } => summary.loaded_rows += rows,
            LoadStatus::SkippedEmpty => summary.skipped_empty += 1,
        }
    }

    info!(
        "Run complete: {} staged, {} stage failures, {} rows loaded, {} months skipped empty",
        summary.staged, summary.stage_failures, summary.loaded_rows, summary.skipped_empty
    );
    Ok(summary)
}
