//! Tripdata ETL Library
//!
//! Batch pipeline that stages monthly NYC yellow-taxi trip-record parquet
//! files from the public TLC URL into an S3-compatible object store, then
//! extracts, transforms, and idempotently loads them into a Postgres
//! warehouse table. One invocation processes one year and exits.
//!
//! # Stages
//!
//! - **Stage**: stream each remote file into the bucket under a
//!   deterministic `{year}/{month}/...` key ([`storage`])
//! - **Extract**: decode the staged parquet object into an in-memory batch
//!   ([`extract`], [`batch`])
//! - **Transform**: append `ingested_at` / `source_system` / `source_file`
//!   provenance columns ([`transform`])
//! - **Load**: delete-then-insert by `source_file` inside one transaction
//!   ([`load`])
//!
//! # Example
//!
//! ```no_run
//! use tripdata_etl::{config, load, pipeline, storage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage_config = config::StorageConfig::from_env()?;
//!     let warehouse_config = config::WarehouseConfig::from_env()?;
//!
//!     let store = storage::ObjectStore::new(&storage_config);
//!     let pool = load::connect(&warehouse_config).await?;
//!     let http = pipeline::http_client()?;
//!
//!     let config = pipeline::PipelineConfig::for_year(2025);
//!     pipeline::run(&store, &pool, &http, &config).await?;
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod config;
pub mod extract;
pub mod load;
pub mod pipeline;
pub mod storage;
pub mod transform;
