//! Tripdata Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling and logging for the tripdata ETL workspace.
//!
//! # Overview
//!
//! - **Error Handling**: the [`EtlError`] type classifying pipeline
//!   failures that have a defined propagation policy
//! - **Logging**: `tracing`-based logging with env-driven configuration
//!
//! # Example
//!
//! ```no_run
//! use tripdata_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     init_logging(&config)?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{EtlError, Result};
