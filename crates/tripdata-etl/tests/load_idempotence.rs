//! Idempotent loading against a containerized Postgres
//!
//! These tests require Docker to be running. Run with:
//!
//! ```bash
//! cargo test --test load_idempotence -- --ignored --nocapture
//! ```

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Int64Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;

use tripdata_etl::batch::TableBatch;
use tripdata_etl::load::{load, LoadStatus};
use tripdata_etl::transform::transform;

const SCHEMA: &str = "raw";
const TABLE: &str = "nyc_taxi_data_2025";

async fn start_postgres() -> Result<(ContainerAsync<Postgres>, PgPool)> {
    let container = Postgres::default()
        .start()
        .await
        .context("Failed to start PostgreSQL container")?;

    let host = container.get_host().await.context("Failed to get host")?;
    let port = container
        .get_host_port_ipv4(5432.tcp())
        .await
        .context("Failed to get port")?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&format!(
            "postgresql://postgres:postgres@{}:{}/postgres",
            host, port
        ))
        .await
        .context("Failed to connect to container")?;

    Ok((container, pool))
}

fn trip_batch(rows: usize) -> TableBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("vendor_id", DataType::Int64, false),
        Field::new("fare_amount", DataType::Float64, true),
    ]));
    let vendor_ids: Vec<i64> = (1..=rows as i64).collect();
    let fares: Vec<Option<f64>> = (0..rows).map(|i| Some(10.0 + i as f64)).collect();
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(Int64Array::from(vendor_ids)),
            Arc::new(Float64Array::from(fares)),
        ],
    )
    .expect("batch construction");
    TableBatch::new(batch)
}

async fn count_for(pool: &PgPool, source_file: &str) -> i64 {
    sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {}.{} WHERE source_file = $1",
        SCHEMA, TABLE
    ))
    .bind(source_file)
    .fetch_one(pool)
    .await
    .expect("count query")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn double_load_leaves_single_generation() {
    let (_container, pool) = start_postgres().await.expect("postgres container");

    let key = "2025/01/yellow_tripdata_2025-01.parquet";
    let batch = transform(trip_batch(3), key).expect("transform");

    let first = load(&pool, &batch, SCHEMA, TABLE, key).await.expect("first load");
    assert_eq!(first, LoadStatus::Loaded { rows: 3 });
    assert_eq!(count_for(&pool, key).await, 3);

    // Same key again: the prior generation is replaced, not appended to
    let second = load(&pool, &batch, SCHEMA, TABLE, key).await.expect("second load");
    assert_eq!(second, LoadStatus::Loaded { rows: 3 });
    assert_eq!(count_for(&pool, key).await, 3);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn reload_touches_only_its_own_source_file() {
    let (_container, pool) = start_postgres().await.expect("postgres container");

    let january = "2025/01/yellow_tripdata_2025-01.parquet";
    let february = "2025/02/yellow_tripdata_2025-02.parquet";

    let jan_batch = transform(trip_batch(3), january).expect("transform");
    let feb_batch = transform(trip_batch(2), february).expect("transform");

    load(&pool, &jan_batch, SCHEMA, TABLE, january).await.expect("january load");
    load(&pool, &feb_batch, SCHEMA, TABLE, february).await.expect("february load");

    let jan_again = transform(trip_batch(4), january).expect("transform");
    load(&pool, &jan_again, SCHEMA, TABLE, january).await.expect("january reload");

    assert_eq!(count_for(&pool, january).await, 4);
    assert_eq!(count_for(&pool, february).await, 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn empty_batch_skips_and_keeps_prior_rows() {
    let (_container, pool) = start_postgres().await.expect("postgres container");

    let key = "2025/03/yellow_tripdata_2025-03.parquet";
    let batch = transform(trip_batch(2), key).expect("transform");
    load(&pool, &batch, SCHEMA, TABLE, key).await.expect("load");

    let status = load(&pool, &TableBatch::empty(), SCHEMA, TABLE, key)
        .await
        .expect("empty load");
    assert_eq!(status, LoadStatus::SkippedEmpty);
    assert_eq!(count_for(&pool, key).await, 2);
}
