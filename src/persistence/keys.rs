//! Storage key layout.
//!
//! `{root_prefix}/{folder}/{prefix}_{yyyyMMdd_HHmmss}_{suffix}.{ext}`

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::distributions::Alphanumeric;

use crate::endpoint::EndpointSpec;
use crate::format::DataFormat;

/// Length of the random component of every object name
pub const SUFFIX_LEN: usize = 8;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyResolver {
    root_prefix: String,
}

impl KeyResolver {
    pub fn new(root_prefix: impl AsRef<str>) -> Self {
        Self {
            root_prefix: root_prefix.as_ref().trim_matches('/').to_string(),
        }
    }

    /// Folder for an endpoint, without trailing slash
    pub fn folder(&self, spec: &EndpointSpec) -> String {
        [self.root_prefix.as_str(), spec.folder()]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Full object key. Pure: the same inputs always give the same key.
    pub fn resolve(
        &self,
        spec: &EndpointSpec,
        timestamp: DateTime<Utc>,
        suffix: &str,
        format: DataFormat,
    ) -> String {
        let name = file_name(spec, timestamp, suffix, format);
        let folder = self.folder(spec);
        if folder.is_empty() {
            name
        } else {
            format!("{folder}/{name}")
        }
    }
}

/// `{prefix}_{yyyyMMdd_HHmmss}_{suffix}.{ext}`
pub fn file_name(
    spec: &EndpointSpec,
    timestamp: DateTime<Utc>,
    suffix: &str,
    format: DataFormat,
) -> String {
    format!(
        "{}_{}_{}.{}",
        spec.prefix(),
        timestamp.format(TIMESTAMP_FORMAT),
        suffix,
        format.extension()
    )
}

/// Fresh alphanumeric suffix from the thread-local CSPRNG
pub fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect()
}
