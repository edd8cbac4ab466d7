//! Endpoint description: one configured HTTP data source plus its auth,
//! retry and output settings.

use bon::Builder;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::PipelineError;
use crate::format::DataFormat;

/// HTTP method used for an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// Authentication mode and the names of the secrets it needs.
///
/// Secrets themselves never live in configuration; the `*_ref` fields name
/// an entry in a [`SecretSource`](crate::collector::SecretSource).
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    None,
    Basic {
        username: String,
        password_ref: String,
    },
    ApiKey {
        #[serde(default = "default_api_key_header")]
        header: String,
        key_ref: String,
    },
    Bearer {
        token_ref: String,
    },
}

impl AuthMode {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMode::None => "none",
            AuthMode::Basic { .. } => "basic",
            AuthMode::ApiKey { .. } => "api_key",
            AuthMode::Bearer { .. } => "bearer",
        }
    }
}

pub fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

/// Immutable description of one data source
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Builder)]
pub struct EndpointSpec {
    #[builder(into)]
    pub name: String,
    /// URL template; `{key}` placeholders are filled from `params`
    #[builder(into)]
    pub url: String,
    #[serde(default)]
    #[builder(default)]
    pub method: HttpMethod,
    #[serde(default)]
    #[builder(default)]
    pub auth: AuthMode,
    #[serde(default = "default_timeout_ms")]
    #[builder(default = default_timeout_ms())]
    pub timeout_ms: u64,
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    #[builder(default = default_max_retries())]
    pub max_retries: u32,
    #[builder(into)]
    pub output_folder: String,
    #[builder(into)]
    pub file_prefix: Option<String>,
    pub target_format: Option<DataFormat>,
    #[builder(into)]
    pub description: Option<String>,
    #[serde(default)]
    #[builder(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    #[builder(default)]
    pub params: BTreeMap<String, String>,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

/// URL with placeholders filled, plus the params the template did not consume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRequest {
    pub url: Url,
    pub extra_params: Vec<(String, String)>,
}

impl EndpointSpec {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Filename prefix, falling back to the endpoint name
    pub fn prefix(&self) -> &str {
        self.file_prefix
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(&self.name)
    }

    /// Output folder without leading/trailing slashes
    pub fn folder(&self) -> &str {
        self.output_folder.trim_matches('/')
    }

    /// Fill URL placeholders and validate the result.
    pub fn render(&self) -> Result<RenderedRequest, PipelineError> {
        let mut url = self.url.clone();
        let mut extra_params = Vec::new();

        for (key, value) in &self.params {
            let placeholder = format!("{{{key}}}");
            if url.contains(&placeholder) {
                url = url.replace(&placeholder, value);
            } else {
                extra_params.push((key.clone(), value.clone()));
            }
        }

        if let (Some(open), Some(close)) = (url.find('{'), url.rfind('}')) {
            if open < close {
                return Err(PipelineError::config(format!(
                    "endpoint '{}' has unfilled URL placeholder in {}",
                    self.name,
                    &url[open..=close]
                )));
            }
        }

        let parsed = Url::parse(&url).map_err(|e| {
            PipelineError::config(format!("endpoint '{}' has invalid URL: {e}", self.name))
        })?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PipelineError::config(format!(
                "endpoint '{}' uses unsupported scheme '{}'",
                self.name,
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none_or(str::is_empty) {
            return Err(PipelineError::config(format!(
                "endpoint '{}' URL has no host",
                self.name
            )));
        }

        Ok(RenderedRequest {
            url: parsed,
            extra_params,
        })
    }

    /// Checks that make the endpoint unusable regardless of network state
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::config("endpoint name must not be empty"));
        }
        if self.timeout_ms == 0 {
            return Err(PipelineError::config(format!(
                "endpoint '{}' timeout must be positive",
                self.name
            )));
        }
        self.render().map(|_| ())
    }
}
