//! Pipeline configuration
//!
//! Connection parameters for the object store and the warehouse, read once
//! from environment variables at startup and passed by reference into the
//! components that need them. There is no module-level configuration state.

use serde::{Deserialize, Serialize};
use std::env;
use tripdata_common::{EtlError, Result};

/// Object store (MinIO / S3-compatible) connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Host:port of the S3-compatible endpoint, without a scheme
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    /// Use TLS when talking to the endpoint
    pub secure: bool,
}

impl StorageConfig {
    /// Load from `MINIO_*` environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            endpoint: require_env("MINIO_ENDPOINT")?,
            access_key: require_env("MINIO_ACCESS_KEY")?,
            secret_key: require_env("MINIO_SECRET_KEY")?,
            secure: env::var("MINIO_SECURE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        })
    }

    /// Endpoint URL with the scheme implied by the secure flag
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}", scheme, self.endpoint)
    }
}

/// Warehouse (Postgres) connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub login: String,
    pub password: String,
}

impl WarehouseConfig {
    /// Load from `POSTGRES_*` environment variables
    pub fn from_env() -> Result<Self> {
        let port = env::var("POSTGRES_PORT").unwrap_or_else(|_| "5432".to_string());
        Ok(Self {
            host: require_env("POSTGRES_HOST")?,
            port: port
                .parse()
                .map_err(|_| EtlError::config(format!("Invalid POSTGRES_PORT: '{}'", port)))?,
            database: require_env("POSTGRES_DB")?,
            login: require_env("POSTGRES_LOGIN")?,
            password: require_env("POSTGRES_PASSWORD")?,
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| EtlError::config(format!("Missing environment variable {}", name)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_scheme() {
        let mut config = StorageConfig {
            endpoint: "localhost:9000".to_string(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            secure: false,
        };
        assert_eq!(config.endpoint_url(), "http://localhost:9000");

        config.secure = true;
        assert_eq!(config.endpoint_url(), "https://localhost:9000");
    }

    #[test]
    fn test_warehouse_from_env_requires_host() {
        std::env::remove_var("POSTGRES_HOST");
        std::env::set_var("POSTGRES_DB", "warehouse");
        std::env::set_var("POSTGRES_LOGIN", "etl");
        std::env::set_var("POSTGRES_PASSWORD", "etl");

        let err = WarehouseConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("POSTGRES_HOST"));
    }
}
