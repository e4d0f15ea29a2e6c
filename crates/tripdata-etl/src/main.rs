//! Tripdata ETL - batch loader for NYC taxi trip records

use anyhow::{ensure, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};
use tripdata_common::logging::{init_logging, LogConfig, LogLevel};
use tripdata_etl::{config, load, pipeline, storage};

#[derive(Parser, Debug)]
#[command(name = "tripdata-etl")]
#[command(author, version, about = "Stage, extract, transform and load NYC taxi trip records")]
struct Cli {
    /// Year to ingest (twelve monthly files)
    #[arg(long, default_value_t = 2025)]
    year: i32,

    /// Target bucket in the object store
    #[arg(long, default_value = pipeline::DEFAULT_BUCKET)]
    bucket: String,

    /// Warehouse schema
    #[arg(long, default_value = pipeline::DEFAULT_SCHEMA)]
    schema: String,

    /// Warehouse table (defaults to nyc_taxi_data_{year})
    #[arg(long)]
    table: Option<String>,

    /// Base URL for the trip-record files
    #[arg(long, default_value = pipeline::DEFAULT_BASE_URL)]
    base_url: String,

    /// Multipart upload part size in bytes
    #[arg(long, default_value_t = storage::DEFAULT_PART_SIZE)]
    part_size: usize,

    /// Path to the environment file with connection credentials
    #[arg(long, default_value = "conf/.env")]
    env_file: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    ensure!(cli.part_size > 0, "--part-size must be at least 1 byte");

    // Credentials come from the env file; absence is fine when the
    // variables are already exported.
    if dotenvy::from_path(&cli.env_file).is_err() {
        let _ = dotenvy::dotenv();
    }

    let mut log_config = LogConfig::from_env()
        .unwrap_or_else(|_| LogConfig::new())
        .with_file_prefix("tripdata-etl");
    if cli.verbose {
        log_config = log_config.with_level(LogLevel::Debug);
    }
    init_logging(&log_config)?;

    let storage_config = config::StorageConfig::from_env()?;
    let warehouse_config = config::WarehouseConfig::from_env()?;

    let table = cli
        .table
        .unwrap_or_else(|| format!("nyc_taxi_data_{}", cli.year));
    let run_config = pipeline::PipelineConfig {
        year: cli.year,
        bucket: cli.bucket,
        schema: cli.schema,
        table,
        base_url: cli.base_url,
        part_size: cli.part_size,
    };
    debug!("Pipeline configuration: {:?}", run_config);

    let store = storage::ObjectStore::new(&storage_config);
    let pool = load::connect(&warehouse_config).await?;
    let http = pipeline::http_client()?;

    info!("Ingesting trip records for {}", run_config.year);
    pipeline::run(&store, &pool, &http, &run_config).await?;
    info!("Ingestion complete");

    Ok(())
}
