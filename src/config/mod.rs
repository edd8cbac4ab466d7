//! Configuration management for gridfetch
//!
//! Settings are layered from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use gridfetch::config::Config;
//!
//! let config = Config::load(None).expect("Failed to load configuration");
//! println!("Collecting {} endpoints", config.endpoints.len());
//! ```
//!
//! # Environment Variables
//!
//! Any scalar setting can be overridden with `GRIDFETCH__<section>__<key>`:
//! - `GRIDFETCH__STORAGE__BUCKET=energy-raw`
//! - `GRIDFETCH__PIPELINE__CONCURRENCY=8`
//! - `GRIDFETCH__RETRY__BASE_DELAY_MS=250`
//!
//! Storage credentials are only read from `S3_ACCESS_KEY`/`S3_SECRET_KEY`
//! or the standard `AWS_*` variables. Endpoint secrets are looked up by
//! name at request time and never stored here.
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/gridfetch.toml`.
//! This can be overridden with `--config` or the `GRIDFETCH_CONFIG`
//! environment variable.

mod models;
mod sources;
mod validation;

pub use models::{Config, PipelineConfig, StorageConfig, StorageProvider};
pub use validation::{MAX_RETRIES_LIMIT, ValidationError};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl Config {
    /// Load configuration from all sources (file + `.env` + environment)
    ///
    /// # Errors
    ///
    /// Returns an error if the file is malformed or validation fails
    /// (duplicate endpoints, bad URLs, missing bucket, etc.)
    pub fn load(explicit_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = sources::load(explicit_path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path, without secrets or `.env`
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Re-run validation, e.g. after programmatic changes
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DataFormat;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[storage]
bucket = "energy-raw"

[[endpoints]]
name = "lmp"
url = "https://webservices.iso-ne.com/api/v1.1/fiveminutelmp/current"
output_folder = "iso_ne/lmp"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.endpoints.len(), 1);
        assert_eq!(config.endpoints[0].max_retries, 3);
        assert_eq!(config.endpoints[0].target_format, None);
    }

    #[test]
    fn test_validation_catches_missing_bucket() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[[endpoints]]
name = "lmp"
url = "https://webservices.iso-ne.com/api/v1.1/fiveminutelmp/current"
output_folder = "iso_ne/lmp"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::MissingBucket)
        ));
    }

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[pipeline]
concurrency = 3
staging_dir = "/tmp/gridfetch"

[http]
connect_timeout_ms = 5000
user_agent = "gridfetch-test"

[retry]
base_delay_ms = 1000
max_delay_ms = 60000
multiplier = 2.0
jitter = 0.1

[storage]
provider = "memory"
root_prefix = "raw"
upload_max_retries = 5

[[endpoints]]
name = "fuel-mix"
url = "https://webservices.iso-ne.com/api/v1.1/genfuelmix/current"
output_folder = "iso_ne/fuel_mix"
file_prefix = "genfuelmix"
target_format = "parquet"
timeout_ms = 15000
auth = { mode = "basic", username = "analyst", password_ref = "ISO_NE_PASSWORD" }

[[endpoints]]
name = "caiso-prices"
url = "https://oasis.caiso.com/oasisapi/SingleZip"
output_folder = "caiso/prices"
headers = { accept = "text/csv" }
params = { queryname = "PRC_LMP", market_run_id = "DAM" }
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();

        assert_eq!(config.pipeline.concurrency, 3);
        assert_eq!(config.http.user_agent, "gridfetch-test");
        assert_eq!(config.storage.provider, StorageProvider::Memory);
        assert_eq!(config.storage.upload_max_retries, 5);
        assert_eq!(config.endpoints[0].target_format, Some(DataFormat::Parquet));
        assert_eq!(config.endpoints[0].prefix(), "genfuelmix");
        assert_eq!(config.endpoints[1].params.len(), 2);
        assert_eq!(config.endpoints[1].headers["accept"], "text/csv");
    }
}
