//! The tabular batch
//!
//! One staged parquet object materialized in memory as an Arrow
//! [`RecordBatch`], plus the conversions the rest of the pipeline needs:
//! decoding parquet bytes, normalizing timestamps to UTC, and flattening
//! into SQL-typed rows for the warehouse load.
//!
//! An empty batch (zero rows, empty schema) is the explicit "extraction
//! produced nothing" value; downstream stages treat it as a no-op.

use anyhow::{anyhow, Context, Result};
use arrow::array::{Array, ArrayRef, AsArray, RecordBatch};
use arrow::compute;
use arrow::datatypes::{
    DataType, Date32Type, Decimal128Type, Field, Float32Type, Float64Type, Int16Type, Int32Type,
    Int64Type,
    Int8Type, Schema, SchemaRef, TimeUnit, TimestampMicrosecondType, TimestampMillisecondType,
    TimestampNanosecondType, TimestampSecondType, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::util::display::{ArrayFormatter, FormatOptions};
use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::sync::Arc;

/// A single cell, carrying its SQL type so null binds stay typed
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Bool(Option<bool>),
    Int(Option<i32>),
    Bigint(Option<i64>),
    Real(Option<f32>),
    Double(Option<f64>),
    Text(Option<String>),
    TimestampTz(Option<DateTime<Utc>>),
    Date(Option<NaiveDate>),
}

/// A warehouse column derived from one Arrow field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlColumn {
    pub name: String,
    pub pg_type: &'static str,
}

/// Map an Arrow data type to the Postgres column type it loads into.
///
/// Anything without a natural mapping renders as text.
pub fn postgres_type(data_type: &DataType) -> &'static str {
    match data_type {
        DataType::Boolean => "boolean",
        DataType::Int8 | DataType::Int16 | DataType::Int32 => "integer",
        DataType::UInt8 | DataType::UInt16 => "integer",
        DataType::Int64 | DataType::UInt32 | DataType::UInt64 => "bigint",
        DataType::Float32 => "real",
        DataType::Float64 | DataType::Decimal128(_, _) => "double precision",
        DataType::Timestamp(_, _) => "timestamptz",
        DataType::Date32 => "date",
        DataType::Utf8 | DataType::LargeUtf8 => "text",
        _ => "text",
    }
}

/// In-memory table extracted from one staged object
#[derive(Debug, Clone)]
pub struct TableBatch {
    batch: RecordBatch,
}

impl TableBatch {
    pub fn new(batch: RecordBatch) -> Self {
        Self { batch }
    }

    /// The empty-result value returned when extraction fails
    pub fn empty() -> Self {
        Self {
            batch: RecordBatch::new_empty(Arc::new(Schema::empty())),
        }
    }

    /// Decode parquet bytes into a single batch with UTC timestamps.
    ///
    /// Reader output batches are concatenated; every timestamp column is
    /// retagged with the UTC time zone regardless of what the file declares.
    pub fn from_parquet(data: Bytes) -> Result<Self> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(data)
            .context("Failed to open parquet data")?
            .build()
            .context("Failed to build parquet reader")?;

        let mut batches = Vec::new();
        for batch in reader {
            batches.push(batch.context("Failed to decode parquet batch")?);
        }

        let batch = match batches.first() {
            None => return Ok(Self::empty()),
            Some(first) => {
                let schema = first.schema();
                compute::concat_batches(&schema, &batches)
                    .context("Failed to concatenate parquet batches")?
            }
        };

        Ok(Self::new(normalize_timestamps(batch)?))
    }

    pub fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn schema(&self) -> SchemaRef {
        self.batch.schema()
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn num_columns(&self) -> usize {
        self.batch.num_columns()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.num_rows() == 0
    }

    /// Warehouse column layout for this batch
    pub fn sql_columns(&self) -> Vec<SqlColumn> {
        self.batch
            .schema()
            .fields()
            .iter()
            .map(|field| SqlColumn {
                name: field.name().clone(),
                pg_type: postgres_type(field.data_type()),
            })
            .collect()
    }

    /// Flatten into SQL-typed rows, column-major converted to row-major
    pub fn sql_rows(&self) -> Result<Vec<Vec<SqlValue>>> {
        let columns: Vec<Vec<SqlValue>> = self
            .batch
            .columns()
            .iter()
            .map(column_values)
            .collect::<Result<_>>()?;

        let mut rows = Vec::with_capacity(self.num_rows());
        for i in 0..self.num_rows() {
            rows.push(columns.iter().map(|col| col[i].clone()).collect());
        }
        Ok(rows)
    }
}

/// Retag every timestamp column with the UTC time zone.
///
/// Arrow timestamp values are epoch offsets; the zone is metadata only, so
/// no cell value changes here. Naive columns are interpreted as UTC, which
/// is what the public trip-record files carry.
fn normalize_timestamps(batch: RecordBatch) -> Result<RecordBatch> {
    let needs_retag = batch
        .schema()
        .fields()
        .iter()
        .any(|f| matches!(f.data_type(), DataType::Timestamp(_, tz) if tz.as_deref() != Some("UTC")));
    if !needs_retag {
        return Ok(batch);
    }

    let mut fields: Vec<Field> = Vec::with_capacity(batch.num_columns());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(batch.num_columns());
    for (field, column) in batch.schema().fields().iter().zip(batch.columns()) {
        match field.data_type() {
            DataType::Timestamp(unit, tz) if tz.as_deref() != Some("UTC") => {
                let retagged: ArrayRef = match unit {
                    TimeUnit::Second => Arc::new(
                        column
                            .as_primitive::<TimestampSecondType>()
                            .clone()
                            .with_timezone("UTC"),
                    ),
                    TimeUnit::Millisecond => Arc::new(
                        column
                            .as_primitive::<TimestampMillisecondType>()
                            .clone()
                            .with_timezone("UTC"),
                    ),
                    TimeUnit::Microsecond => Arc::new(
                        column
                            .as_primitive::<TimestampMicrosecondType>()
                            .clone()
                            .with_timezone("UTC"),
                    ),
                    TimeUnit::Nanosecond => Arc::new(
                        column
                            .as_primitive::<TimestampNanosecondType>()
                            .clone()
                            .with_timezone("UTC"),
                    ),
                };
                fields.push(
                    field
                        .as_ref()
                        .clone()
                        .with_data_type(DataType::Timestamp(*unit, Some("UTC".into()))),
                );
                columns.push(retagged);
            }
            _ => {
                fields.push(field.as_ref().clone());
                columns.push(column.clone());
            }
        }
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context("Failed to rebuild batch with UTC timestamps")
}

/// Convert one Arrow column into SQL-typed cells
fn column_values(array: &ArrayRef) -> Result<Vec<SqlValue>> {
    let n = array.len();
    let mut values = Vec::with_capacity(n);

    macro_rules! primitive {
        ($arrow_type:ty, $variant:ident, $convert:expr) => {{
            let typed = array.as_primitive::<$arrow_type>();
            for i in 0..n {
                values.push(if typed.is_null(i) {
                    SqlValue::$variant(None)
                } else {
                    SqlValue::$variant(Some(($convert)(typed.value(i))))
                });
            }
        }};
    }

    match array.data_type() {
        DataType::Boolean => {
            let typed = array.as_boolean();
            for i in 0..n {
                values.push(SqlValue::Bool((!typed.is_null(i)).then(|| typed.value(i))));
            }
        }
        DataType::Int8 => primitive!(Int8Type, Int, |v| v as i32),
        DataType::Int16 => primitive!(Int16Type, Int, |v| v as i32),
        DataType::Int32 => primitive!(Int32Type, Int, |v| v),
        DataType::UInt8 => primitive!(UInt8Type, Int, |v| v as i32),
        DataType::UInt16 => primitive!(UInt16Type, Int, |v| v as i32),
        DataType::Int64 => primitive!(Int64Type, Bigint, |v| v),
        DataType::UInt32 => primitive!(UInt32Type, Bigint, |v| v as i64),
        DataType::UInt64 => primitive!(UInt64Type, Bigint, |v| v as i64),
        DataType::Float32 => primitive!(Float32Type, Real, |v| v),
        DataType::Float64 => primitive!(Float64Type, Double, |v| v),
        DataType::Decimal128(_, scale) => {
            let divisor = 10f64.powi(*scale as i32);
            primitive!(Decimal128Type, Double, |v| v as f64 / divisor);
        }
        DataType::Timestamp(unit, _) => {
            let unit = *unit;
            let raw: Vec<Option<i64>> = match unit {
                TimeUnit::Second => array.as_primitive::<TimestampSecondType>().iter().collect(),
                TimeUnit::Millisecond => {
                    array.as_primitive::<TimestampMillisecondType>().iter().collect()
                }
                TimeUnit::Microsecond => {
                    array.as_primitive::<TimestampMicrosecondType>().iter().collect()
                }
                TimeUnit::Nanosecond => {
                    array.as_primitive::<TimestampNanosecondType>().iter().collect()
                }
            };
            for v in raw {
                let converted = match v {
                    None => None,
                    Some(v) => Some(
                        timestamp_from(v, unit)
                            .ok_or_else(|| anyhow!("Timestamp value {} out of range", v))?,
                    ),
                };
                values.push(SqlValue::TimestampTz(converted));
            }
        }
        DataType::Date32 => primitive!(Date32Type, Date, |days: i32| {
            DateTime::from_timestamp(i64::from(days) * 86_400, 0)
                .map(|dt| dt.date_naive())
                .unwrap_or_default()
        }),
        DataType::Utf8 => {
            let typed = array.as_string::<i32>();
            for i in 0..n {
                values.push(SqlValue::Text(
                    (!typed.is_null(i)).then(|| typed.value(i).to_string()),
                ));
            }
        }
        DataType::LargeUtf8 => {
            let typed = array.as_string::<i64>();
            for i in 0..n {
                values.push(SqlValue::Text(
                    (!typed.is_null(i)).then(|| typed.value(i).to_string()),
                ));
            }
        }
        other => {
            // Render anything else through Arrow's display path
            let options = FormatOptions::default();
            let formatter = ArrayFormatter::try_new(array.as_ref(), &options)
                .with_context(|| format!("Unsupported column type {:?}", other))?;
            for i in 0..n {
                values.push(SqlValue::Text(
                    (!array.is_null(i)).then(|| formatter.value(i).to_string()),
                ));
            }
        }
    }

    Ok(values)
}

fn timestamp_from(value: i64, unit: TimeUnit) -> Option<DateTime<Utc>> {
    match unit {
        TimeUnit::Second => DateTime::from_timestamp(value, 0),
        TimeUnit::Millisecond => DateTime::from_timestamp_millis(value),
        TimeUnit::Microsecond => DateTime::from_timestamp_micros(value),
        TimeUnit::Nanosecond => Some(DateTime::from_timestamp_nanos(value)),
    }
}


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, Int64Array, StringArray, TimestampMicrosecondArray};
    use parquet::arrow::ArrowWriter;

    fn sample_batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("vendor_id", DataType::Int64, false),
            Field::new("fare_amount", DataType::Float64, true),
            Field::new(
                "pickup_at",
                DataType::Timestamp(TimeUnit::Microsecond, None),
                true,
            ),
            Field::new("flag", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3])),
                Arc::new(Float64Array::from(vec![Some(10.5), None, Some(7.0)])),
                Arc::new(TimestampMicrosecondArray::from(vec![
                    Some(1_735_689_600_000_000),
                    Some(0),
                    None,
                ])),
                Arc::new(StringArray::from(vec![Some("Y"), Some("N"), None])),
            ],
        )
        .unwrap()
    }

    fn to_parquet(batch: &RecordBatch) -> Bytes {
        let mut out = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut out, batch.schema(), None).unwrap();
        writer.write(batch).unwrap();
        writer.close().unwrap();
        Bytes::from(out)
    }

    #[test]
    fn test_from_parquet_decodes_rows() {
        let batch = TableBatch::from_parquet(to_parquet(&sample_batch())).unwrap();
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.num_columns(), 4);
        assert!(!batch.is_empty());
    }

    #[test]
    fn test_from_parquet_forces_utc_timestamps() {
        let batch = TableBatch::from_parquet(to_parquet(&sample_batch())).unwrap();
        let field = batch.schema().field(2).clone();
        match field.data_type() {
            DataType::Timestamp(TimeUnit::Microsecond, Some(tz)) => {
                assert_eq!(tz.as_ref(), "UTC")
            }
            other => panic!("expected UTC timestamp, got {:?}", other),
        }
    }

    #[test]
    fn test_utc_retag_keeps_timestamp_values() {
        let batch = TableBatch::from_parquet(to_parquet(&sample_batch())).unwrap();
        let rows = batch.sql_rows().unwrap();
        assert_eq!(
            rows[0][2],
            SqlValue::TimestampTz(DateTime::from_timestamp_micros(1_735_689_600_000_000))
        );
        assert_eq!(
            rows[1][2],
            SqlValue::TimestampTz(DateTime::from_timestamp_micros(0))
        );
        assert_eq!(rows[2][2], SqlValue::TimestampTz(None));
    }

    #[test]
    fn test_utc_retag_preserves_field_metadata() {
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("PARQUET:field_id".to_string(), "7".to_string());
        let field = Field::new(
            "pickup_at",
            DataType::Timestamp(TimeUnit::Microsecond, None),
            true,
        )
        .with_metadata(metadata.clone());
        let batch = RecordBatch::try_new(
            Arc::new(Schema::new(vec![field])),
            vec![Arc::new(TimestampMicrosecondArray::from(vec![Some(0)]))],
        )
        .unwrap();

        let normalized = normalize_timestamps(batch).unwrap();
        let field = normalized.schema().field(0).clone();
        assert_eq!(field.metadata(), &metadata);
        assert!(matches!(
            field.data_type(),
            DataType::Timestamp(TimeUnit::Microsecond, Some(tz)) if tz.as_ref() == "UTC"
        ));
    }

    #[test]
    fn test_empty_batch() {
        let batch = TableBatch::empty();
        assert!(batch.is_empty());
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 0);
    }

    #[test]
    fn test_sql_columns_mapping() {
        let batch = TableBatch::new(sample_batch());
        let columns = batch.sql_columns();
        assert_eq!(
            columns,
            vec![
                SqlColumn {
                    name: "vendor_id".to_string(),
                    pg_type: "bigint"
                },
                SqlColumn {
                    name: "fare_amount".to_string(),
                    pg_type: "double precision"
                },
                SqlColumn {
                    name: "pickup_at".to_string(),
                    pg_type: "timestamptz"
                },
                SqlColumn {
                    name: "flag".to_string(),
                    pg_type: "text"
                },
            ]
        );
    }

    #[test]
    fn test_sql_rows_values_and_nulls() {
        let batch = TableBatch::new(sample_batch());
        let rows = batch.sql_rows().unwrap();
        assert_eq!(rows.len(), 3);

        assert_eq!(rows[0][0], SqlValue::Bigint(Some(1)));
        assert_eq!(rows[0][1], SqlValue::Double(Some(10.5)));
        assert_eq!(
            rows[0][2],
            SqlValue::TimestampTz(DateTime::from_timestamp_micros(1_735_689_600_000_000))
        );
        assert_eq!(rows[0][3], SqlValue::Text(Some("Y".to_string())));

        assert_eq!(rows[1][1], SqlValue::Double(None));
        assert_eq!(rows[2][2], SqlValue::TimestampTz(None));
        assert_eq!(rows[2][3], SqlValue::Text(None));
    }

    #[test]
    fn test_postgres_type_fallback() {
        assert_eq!(postgres_type(&DataType::Binary), "text");
        assert_eq!(postgres_type(&DataType::Int32), "integer");
        assert_eq!(postgres_type(&DataType::Decimal128(18, 2)), "double precision");
    }
}
