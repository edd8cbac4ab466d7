use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::collector::{BackoffPolicy, HttpConfig};
use crate::endpoint::EndpointSpec;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub retry: BackoffPolicy,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
}

/// Run-wide settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Endpoints processed at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// When set, raw response bodies are also written here
    pub staging_dir: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            staging_dir: None,
        }
    }
}

fn default_concurrency() -> usize {
    4
}

/// Storage provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    #[default]
    S3,
    /// Process-local store, for dry runs
    Memory,
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    #[serde(default)]
    pub bucket: String,
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores (MinIO, LocalStack)
    pub endpoint: Option<String>,
    /// Prefix prepended to every object key
    #[serde(default)]
    pub root_prefix: String,
    /// Retries after the first failed upload attempt
    #[serde(default = "default_upload_max_retries")]
    pub upload_max_retries: u32,
    /// S3 access key (loaded from environment, not from config file)
    #[serde(skip)]
    pub access_key: Option<String>,
    /// S3 secret key (loaded from environment, not from config file)
    #[serde(skip)]
    pub secret_key: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: StorageProvider::default(),
            bucket: String::new(),
            region: None,
            endpoint: None,
            root_prefix: String::new(),
            upload_max_retries: default_upload_max_retries(),
            access_key: None,
            secret_key: None,
        }
    }
}

fn default_upload_max_retries() -> u32 {
    3
}
