use super::models::{Config, StorageProvider};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Upper bound on per-endpoint retries
pub const MAX_RETRIES_LIMIT: u32 = 10;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No endpoints configured (at least one [[endpoints]] entry is required)")]
    NoEndpointsConfigured,

    #[error("Endpoint #{index} has an empty name")]
    EmptyEndpointName { index: usize },

    #[error("Endpoint name '{name}' is configured more than once")]
    DuplicateEndpointName { name: String },

    #[error("Endpoint '{endpoint}' is invalid: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("Endpoint '{endpoint}' max_retries = {value} exceeds limit of {limit}")]
    TooManyRetries {
        endpoint: String,
        value: u32,
        limit: u32,
    },

    #[error("Endpoints '{first}' and '{second}' write to the same folder and prefix '{location}'")]
    ConflictingOutputLocation {
        first: String,
        second: String,
        location: String,
    },

    #[error("pipeline.concurrency must be positive")]
    InvalidConcurrency,

    #[error("Storage provider is S3 but no bucket is configured")]
    MissingBucket,

    #[error("Invalid retry policy: {reason}")]
    InvalidRetryPolicy { reason: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_endpoints(config)?;
    validate_output_locations(config)?;
    validate_pipeline(config)?;
    validate_storage(config)?;
    validate_retry(config)?;
    Ok(())
}

/// Names, URLs, timeouts and retry budgets of each endpoint
fn validate_endpoints(config: &Config) -> Result<(), ValidationError> {
    if config.endpoints.is_empty() {
        return Err(ValidationError::NoEndpointsConfigured);
    }

    let mut seen = HashSet::new();
    for (index, endpoint) in config.endpoints.iter().enumerate() {
        if endpoint.name.trim().is_empty() {
            return Err(ValidationError::EmptyEndpointName { index });
        }
        if !seen.insert(endpoint.name.as_str()) {
            return Err(ValidationError::DuplicateEndpointName {
                name: endpoint.name.clone(),
            });
        }
        if endpoint.max_retries > MAX_RETRIES_LIMIT {
            return Err(ValidationError::TooManyRetries {
                endpoint: endpoint.name.clone(),
                value: endpoint.max_retries,
                limit: MAX_RETRIES_LIMIT,
            });
        }
        if endpoint.folder().is_empty() {
            return Err(ValidationError::InvalidEndpoint {
                endpoint: endpoint.name.clone(),
                reason: "output_folder must not be empty".to_string(),
            });
        }
        endpoint
            .validate()
            .map_err(|e| ValidationError::InvalidEndpoint {
                endpoint: endpoint.name.clone(),
                reason: e.to_string(),
            })?;
    }

    Ok(())
}

/// No two endpoints may share folder + filename prefix
fn validate_output_locations(config: &Config) -> Result<(), ValidationError> {
    let mut locations: HashMap<String, &str> = HashMap::new();

    for endpoint in &config.endpoints {
        let location = format!("{}/{}", endpoint.folder(), endpoint.prefix());
        if let Some(first) = locations.insert(location.clone(), endpoint.name.as_str()) {
            return Err(ValidationError::ConflictingOutputLocation {
                first: first.to_string(),
                second: endpoint.name.clone(),
                location,
            });
        }
    }

    Ok(())
}

fn validate_pipeline(config: &Config) -> Result<(), ValidationError> {
    if config.pipeline.concurrency == 0 {
        return Err(ValidationError::InvalidConcurrency);
    }
    Ok(())
}

/// S3 needs a bucket; credentials may come from the ambient AWS chain
fn validate_storage(config: &Config) -> Result<(), ValidationError> {
    if config.storage.provider == StorageProvider::S3 && config.storage.bucket.trim().is_empty() {
        return Err(ValidationError::MissingBucket);
    }
    Ok(())
}

/// The policy must produce strictly growing delays until the cap
fn validate_retry(config: &Config) -> Result<(), ValidationError> {
    let retry = &config.retry;
    let invalid = |reason: String| Err(ValidationError::InvalidRetryPolicy { reason });

    if retry.base_delay.is_zero() {
        return invalid("base_delay_ms must be positive".to_string());
    }
    if retry.base_delay > retry.max_delay {
        return invalid(format!(
            "base_delay_ms ({}) exceeds max_delay_ms ({})",
            retry.base_delay.as_millis(),
            retry.max_delay.as_millis()
        ));
    }
    if !(0.0..=1.0).contains(&retry.jitter) {
        return invalid(format!("jitter ({}) must be within [0, 1]", retry.jitter));
    }
    if !retry.multiplier.is_finite() || retry.multiplier <= 1.0 {
        return invalid(format!(
            "multiplier ({}) must be greater than 1",
            retry.multiplier
        ));
    }
    if retry.multiplier < 1.0 + retry.jitter {
        return invalid(format!(
            "multiplier ({}) must be at least 1 + jitter ({})",
            retry.multiplier,
            1.0 + retry.jitter
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::models::*;
    use super::*;
    use crate::endpoint::EndpointSpec;
    use std::time::Duration;

    fn endpoint(name: &str, folder: &str) -> EndpointSpec {
        EndpointSpec::builder()
            .name(name)
            .url("https://webservices.iso-ne.com/api/v1.1/fiveminutelmp/current")
            .output_folder(folder)
            .build()
    }

    fn create_test_config() -> Config {
        Config {
            storage: StorageConfig {
                bucket: "energy-raw".to_string(),
                ..Default::default()
            },
            endpoints: vec![endpoint("lmp", "iso_ne/lmp"), endpoint("load", "iso_ne/load")],
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config() {
        let config = create_test_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_no_endpoints() {
        let mut config = create_test_config();
        config.endpoints.clear();

        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::NoEndpointsConfigured)));
    }

    #[test]
    fn test_duplicate_names() {
        let mut config = create_test_config();
        config.endpoints.push(endpoint("lmp", "elsewhere"));

        let result = validate(&config);
        assert!(matches!(
            result,
            Err(ValidationError::DuplicateEndpointName { .. })
        ));
    }

    #[test]
    fn test_invalid_url() {
        let mut config = create_test_config();
        config.endpoints[0].url = "file:///etc/passwd".to_string();

        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_zero_timeout() {
        let mut config = create_test_config();
        config.endpoints[1].timeout_ms = 0;

        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::InvalidEndpoint { .. })));
    }

    #[test]
    fn test_retry_limit() {
        let mut config = create_test_config();
        config.endpoints[0].max_retries = 11;

        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::TooManyRetries { .. })));
    }

    #[test]
    fn test_conflicting_folder_and_prefix() {
        let mut config = create_test_config();
        config.endpoints[0].output_folder = "/iso_ne/shared/".to_string();
        config.endpoints[0].file_prefix = Some("data".to_string());
        config.endpoints[1].output_folder = "iso_ne/shared".to_string();
        config.endpoints[1].file_prefix = Some("data".to_string());

        let result = validate(&config);
        assert!(matches!(
            result,
            Err(ValidationError::ConflictingOutputLocation { .. })
        ));
    }

    #[test]
    fn test_s3_bucket_missing() {
        let mut config = create_test_config();
        config.storage.bucket = String::new();

        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::MissingBucket)));

        config.storage.provider = StorageProvider::Memory;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_concurrency() {
        let mut config = create_test_config();
        config.pipeline.concurrency = 0;

        let result = validate(&config);
        assert!(matches!(result, Err(ValidationError::InvalidConcurrency)));
    }

    #[test]
    fn test_retry_policy_must_grow() {
        let mut config = create_test_config();
        config.retry.multiplier = 1.1;
        config.retry.jitter = 0.25;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidRetryPolicy { .. })
        ));

        let mut config = create_test_config();
        config.retry.multiplier = 1.0;
        config.retry.jitter = 0.0;
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidRetryPolicy { .. })
        ));

        let mut config = create_test_config();
        config.retry.base_delay = Duration::from_secs(60);
        config.retry.max_delay = Duration::from_secs(1);
        assert!(matches!(
            validate(&config),
            Err(ValidationError::InvalidRetryPolicy { .. })
        ));
    }
}
