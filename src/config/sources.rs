use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "GRIDFETCH_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/gridfetch.toml";
const ENV_PREFIX: &str = "GRIDFETCH";
const ENV_SEPARATOR: &str = "__";

/// Config file path: explicit argument, then `GRIDFETCH_CONFIG`, then the default
pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit
        .or_else(|| env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load(explicit_path: Option<PathBuf>) -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let mut config = load_from_sources(config_path(explicit_path))?;
    load_secrets(&mut config, |name| env::var(name).ok());

    Ok(config)
}

/// Fill storage credentials; secrets are never read from TOML files
pub(crate) fn load_secrets(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    let first = |names: &[&str]| {
        names
            .iter()
            .find_map(|name| lookup(name).filter(|v| !v.is_empty()))
    };

    if let Some(access_key) = first(&["S3_ACCESS_KEY", "AWS_ACCESS_KEY_ID"]) {
        config.storage.access_key = Some(access_key);
    }
    if let Some(secret_key) = first(&["S3_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"]) {
        config.storage.secret_key = Some(secret_key);
    }
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // GRIDFETCH__STORAGE__BUCKET -> storage.bucket
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}
