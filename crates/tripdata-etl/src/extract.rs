//! Extract stage
//!
//! Materializes one staged object as a [`TableBatch`]. Extraction never
//! aborts the run: a missing object, a transport failure, or a malformed
//! parquet file all degrade to an empty batch, which the downstream stages
//! treat as a no-op.

use tracing::{debug, warn};

use crate::batch::TableBatch;
use crate::storage::ObjectStore;

/// Extract a staged parquet object into an in-memory batch
pub async fn extract(store: &ObjectStore, bucket: &str, key: &str) -> TableBatch {
    let data = match store.download(bucket, key).await {
        Ok(data) => data,
        Err(e) => {
            warn!("Extraction of s3://{}/{} failed: {:#}", bucket, key, e);
            return TableBatch::empty();
        }
    };

    match TableBatch::from_parquet(data) {
        Ok(batch) => {
            debug!(
                "Extracted {} rows ({} columns) from s3://{}/{}",
                batch.num_rows(),
                batch.num_columns(),
                bucket,
                key
            );
            batch
        }
        Err(e) => {
            warn!("Decoding s3://{}/{} failed: {:#}", bucket, key, e);
            TableBatch::empty()
        }
    }
}
