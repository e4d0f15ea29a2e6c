//! Load stage
//!
//! Idempotent delete-then-insert into the warehouse. Rows for one staged
//! object are keyed by their `source_file` value; replacing that key's
//! generation inside a single transaction means a re-run for the same month
//! never duplicates rows and never leaves stale ones behind.
//!
//! The target table is created from the first loaded batch's own column
//! layout and never migrated afterwards. A later file whose columns differ
//! will fail or be coerced by the backend; this is a known limitation
//! carried over from the original design.

use anyhow::{Context, Result};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, info, instrument};

use crate::batch::{SqlColumn, SqlValue, TableBatch};
use crate::config::WarehouseConfig;

/// Postgres caps bind parameters per statement at u16::MAX
const MAX_BIND_PARAMS: usize = 65_535;

/// Outcome of one load attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    /// The batch replaced the previous generation for its source file
    Loaded { rows: usize },
    /// Empty input; the warehouse was not touched
    SkippedEmpty,
}

/// Connect to the warehouse
pub async fn connect(config: &WarehouseConfig) -> Result<PgPool> {
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&config.login)
        .password(&config.password);

    PgPoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to warehouse at {}:{}/{}",
                config.host, config.port, config.database
            )
        })
}

/// Load a transformed batch into `schema.table`, replacing any prior
/// generation of rows tagged with `source_file`.
///
/// Ensures the schema and table exist first, then runs the delete and all
/// inserts inside one transaction. Load failures propagate; a broken
/// warehouse makes continuing pointless.
#[instrument(skip(pool, batch), fields(rows = batch.num_rows()))]
pub async fn load(
    pool: &PgPool,
    batch: &TableBatch,
    schema: &str,
    table: &str,
    source_file: &str,
) -> Result<LoadStatus> {
    if batch.is_empty() {
        info!("Batch for {} is empty, skipping load", source_file);
        return Ok(LoadStatus::SkippedEmpty);
    }

    let columns = batch.sql_columns();
    let rows = batch.sql_rows()?;
    let qualified = format!("{}.{}", quote_ident(schema), quote_ident(table));

    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema)))
        .execute(pool)
        .await
        .with_context(|| format!("Failed to ensure schema '{}'", schema))?;

    sqlx::query(&create_table_sql(schema, table, &columns))
        .execute(pool)
        .await
        .with_context(|| format!("Failed to ensure table {}", qualified))?;

    let mut tx = pool.begin().await.context("Failed to start transaction")?;

    let deleted = sqlx::query(&format!(
        "DELETE FROM {} WHERE source_file = $1",
        qualified
    ))
    .bind(source_file)
    .execute(&mut *tx)
    .await
    .with_context(|| format!("Failed to delete prior rows for {}", source_file))?
    .rows_affected();

    let column_list = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    for chunk in rows.chunks(rows_per_insert(columns.len())) {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("INSERT INTO {} ({}) ", qualified, column_list));
        builder.push_values(chunk.iter(), |mut b, row| {
            for value in row {
                match value.clone() {
                    SqlValue::Bool(v) => {
                        b.push_bind(v);
                    }
                    SqlValue::Int(v) => {
                        b.push_bind(v);
                    }
                    SqlValue::Bigint(v) => {
                        b.push_bind(v);
                    }
                    SqlValue::Real(v) => {
                        b.push_bind(v);
                    }
                    SqlValue::Double(v) => {
                        b.push_bind(v);
                    }
                    SqlValue::Text(v) => {
                        b.push_bind(v);
                    }
                    SqlValue::TimestampTz(v) => {
                        b.push_bind(v);
                    }
                    SqlValue::Date(v) => {
                        b.push_bind(v);
                    }
                }
            }
        });
        builder
            .build()
            .execute(&mut *tx)
            .await
            .context("Failed to insert rows")?;
        debug!("Inserted chunk of {} rows into {}", chunk.len(), qualified);
    }

    tx.commit().await.context("Failed to commit load")?;

    info!(
        "Replaced {} prior rows with {} rows for {} in {}",
        deleted,
        rows.len(),
        source_file,
        qualified
    );
    Ok(LoadStatus::Loaded { rows: rows.len() })
}

/// Quote a SQL identifier, doubling embedded quotes
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn create_table_sql(schema: &str, table: &str, columns: &[SqlColumn]) -> String {
    let column_defs = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.pg_type))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS {}.{} ({})",
        quote_ident(schema),
        quote_ident(table),
        column_defs
    )
}

/// How many rows fit in one INSERT without exceeding the bind limit
fn rows_per_insert(num_columns: usize) -> usize {
    (MAX_BIND_PARAMS / num_columns.max(1)).max(1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("raw"), "\"raw\"");
        assert_eq!(quote_ident("weird\"name"), "\"weird\"\"name\"");
    }

    #[test]
    fn test_create_table_sql() {
        let columns = vec![
            SqlColumn {
                name: "vendor_id".to_string(),
                pg_type: "bigint",
            },
            SqlColumn {
                name: "source_file".to_string(),
                pg_type: "text",
            },
        ];
        assert_eq!(
            create_table_sql("raw", "nyc_taxi_data_2025", &columns),
            "CREATE TABLE IF NOT EXISTS \"raw\".\"nyc_taxi_data_2025\" \
             (\"vendor_id\" bigint, \"source_file\" text)"
        );
    }

    #[test]
    fn test_rows_per_insert_respects_bind_limit() {
        assert_eq!(rows_per_insert(1), MAX_BIND_PARAMS);
        assert_eq!(rows_per_insert(20), MAX_BIND_PARAMS / 20);
        // Degenerate cases still make progress one row at a time
        assert_eq!(rows_per_insert(0), MAX_BIND_PARAMS);
        assert_eq!(rows_per_insert(MAX_BIND_PARAMS * 2), 1);
    }
}
