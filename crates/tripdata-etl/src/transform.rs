//! Transform stage
//!
//! Appends the three provenance columns to an extracted batch:
//! `ingested_at` (wall clock at transform time, UTC), `source_system`
//! (fixed origin tag), and `source_file` (the staged object key, which the
//! load stage later uses for idempotent replacement).

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, RecordBatch, StringArray, TimestampMicrosecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::batch::TableBatch;

/// Fixed constant identifying the origin class of every loaded row
pub const SOURCE_SYSTEM: &str = "s3";

/// Append provenance columns to a batch.
///
/// An empty batch passes through unchanged; there is nothing to tag, and
/// the load stage will skip it anyway.
pub fn transform(batch: TableBatch, source_file: &str) -> Result<TableBatch> {
    if batch.is_empty() {
        info!("Batch for {} is empty, nothing to transform", source_file);
        return Ok(batch);
    }

    let n = batch.num_rows();
    let ingested_at = Utc::now().timestamp_micros();
    let record_batch = batch.record_batch();

    let mut fields: Vec<Field> = record_batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.as_ref().clone())
        .collect();
    let mut columns: Vec<ArrayRef> = record_batch.columns().to_vec();

    fields.push(Field::new(
        "ingested_at",
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        false,
    ));
    columns.push(Arc::new(
        TimestampMicrosecondArray::from_value(ingested_at, n).with_timezone("UTC"),
    ));

    fields.push(Field::new("source_system", DataType::Utf8, false));
    columns.push(Arc::new(StringArray::from(vec![SOURCE_SYSTEM; n])));

    fields.push(Field::new("source_file", DataType::Utf8, false));
    columns.push(Arc::new(StringArray::from(vec![source_file; n])));

    let transformed = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context("Failed to append provenance columns")?;
    Ok(TableBatch::new(transformed))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::batch::SqlValue;
    use arrow::array::Int64Array;

    fn input_batch(rows: usize) -> TableBatch {
        let schema = Arc::new(Schema::new(vec![Field::new(
            "trip_distance",
            DataType::Int64,
            false,
        )]));
        let values: Vec<i64> = (0..rows as i64).collect();
        let batch =
            RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).unwrap();
        TableBatch::new(batch)
    }

    #[test]
    fn test_appends_provenance_columns() {
        let key = "2025/01/yellow_tripdata_2025-01.parquet";
        let transformed = transform(input_batch(3), key).unwrap();

        assert_eq!(transformed.num_columns(), 4);
        let schema = transformed.schema();
        assert_eq!(schema.field(1).name(), "ingested_at");
        assert_eq!(schema.field(2).name(), "source_system");
        assert_eq!(schema.field(3).name(), "source_file");

        let rows = transformed.sql_rows().unwrap();
        for row in &rows {
            assert!(matches!(row[1], SqlValue::TimestampTz(Some(_))));
            assert_eq!(row[2], SqlValue::Text(Some(SOURCE_SYSTEM.to_string())));
            assert_eq!(row[3], SqlValue::Text(Some(key.to_string())));
        }
    }

    #[test]
    fn test_ingested_at_uniform_across_rows() {
        let transformed = transform(input_batch(5), "some/key.parquet").unwrap();
        let rows = transformed.sql_rows().unwrap();
        let first = &rows[0][1];
        assert!(rows.iter().all(|row| &row[1] == first));
    }

    #[test]
    fn test_empty_batch_passes_through() {
        let empty = TableBatch::empty();
        let transformed = transform(empty, "some/key.parquet").unwrap();
        assert!(transformed.is_empty());
        assert_eq!(transformed.num_columns(), 0);
    }
}
