//! Error types for the tripdata ETL pipeline
//!
//! Only failures with a defined propagation policy get a variant here.
//! Stage-internal failures that are contained by design (a failed download,
//! an unreadable parquet object) never surface as errors at all; they
//! degrade to a `Failed` staging status or an empty batch instead.

use thiserror::Error;

/// Result type alias for ETL operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Main error type for the tripdata ETL pipeline
#[derive(Error, Debug)]
pub enum EtlError {
    /// Bucket name rejected by local validation, never reaches the backend
    #[error("Invalid bucket name: '{0}'. Bucket names must be 3-63 lowercase alphanumeric characters (dots and hyphens allowed inside), must not look like an IP address, start with 'xn--' or end with '-s3alias'.")]
    InvalidBucketName(String),

    /// Object store rejected bucket creation
    #[error("Failed to create bucket '{bucket}': {message}")]
    BucketCreation { bucket: String, message: String },

    /// Object store operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check your environment variables or .env file.")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    /// Convenience constructor for configuration errors
    pub fn config(message: impl Into<String>) -> Self {
        EtlError::Config(message.into())
    }
}
