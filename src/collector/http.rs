//! HTTP transport for endpoint collection

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use super::auth::{Credentials, sanitize_headers};
use crate::endpoint::{EndpointSpec, HttpMethod, RenderedRequest};
use crate::error::PipelineError;

/// HTTP client configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_ms: u64,
    pub user_agent: String,
    /// Sent with every request; endpoint headers override them by name
    pub default_headers: BTreeMap<String, String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            user_agent: format!("gridfetch/{}", env!("CARGO_PKG_VERSION")),
            default_headers: BTreeMap::from([(
                "Accept".to_string(),
                "application/json, text/csv, application/xml, */*".to_string(),
            )]),
        }
    }
}

/// Status, declared content type and body of one exchange
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// Thin wrapper over a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| PipelineError::config(format!("building HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Issue one request; any HTTP status is returned as a response.
    ///
    /// Only transport failures (connect, timeout, body read) become errors.
    pub async fn send_once(
        &self,
        spec: &EndpointSpec,
        rendered: &RenderedRequest,
        credentials: &Credentials,
    ) -> Result<HttpResponse, PipelineError> {
        let method = match spec.method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
        };

        debug!(
            endpoint = %spec.name,
            method = %method,
            url = %rendered.url,
            headers = ?sanitize_headers(&self.merged_headers(spec)),
            "Sending request"
        );

        let mut request = self
            .client
            .request(method, rendered.url.clone())
            .headers(self.header_map(spec)?)
            .timeout(spec.timeout());

        request = match spec.method {
            HttpMethod::Get if !rendered.extra_params.is_empty() => {
                request.query(&rendered.extra_params)
            }
            HttpMethod::Post => {
                let body: serde_json::Map<String, serde_json::Value> = rendered
                    .extra_params
                    .iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                    .collect();
                request.json(&body)
            }
            HttpMethod::Get => request,
        };

        let response = credentials
            .attach(request)
            .send()
            .await
            .map_err(|e| transport_error(spec, e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| PipelineError::network(format!("failed to read body: {e}")))?;

        debug!(endpoint = %spec.name, status = status.as_u16(), size = body.len(), "Response received");

        Ok(HttpResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            content_type,
            body,
        })
    }

    fn merged_headers(&self, spec: &EndpointSpec) -> BTreeMap<String, String> {
        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in self.config.default_headers.iter().chain(spec.headers.iter()) {
            merged.retain(|existing, _| !existing.eq_ignore_ascii_case(name));
            merged.insert(name.clone(), value.clone());
        }
        merged
    }

    fn header_map(&self, spec: &EndpointSpec) -> Result<HeaderMap, PipelineError> {
        let mut map = HeaderMap::new();
        for (name, value) in self.merged_headers(spec) {
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                PipelineError::config(format!("endpoint '{}' has invalid header name '{name}'", spec.name))
            })?;
            let value = HeaderValue::from_str(&value).map_err(|_| {
                PipelineError::config(format!("endpoint '{}' has invalid value for header '{name}'", spec.name))
            })?;
            map.insert(header, value);
        }
        Ok(map)
    }
}

fn transport_error(spec: &EndpointSpec, e: reqwest::Error) -> PipelineError {
    if e.is_builder() {
        PipelineError::config(format!("invalid request: {e}"))
    } else if e.is_timeout() {
        PipelineError::network(format!("timed out after {}ms", spec.timeout_ms))
    } else if e.is_redirect() {
        PipelineError::network("too many redirects")
    } else if e.is_connect() {
        PipelineError::network(format!("connection failed: {e}"))
    } else {
        PipelineError::network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.connect_timeout_ms, 10_000);
        assert!(config.user_agent.starts_with("gridfetch/"));
        assert!(config.default_headers.contains_key("Accept"));
    }

    #[test]
    fn test_endpoint_headers_override_defaults_case_insensitively() {
        let client = HttpClient::new(HttpConfig::default()).unwrap();
        let mut spec = EndpointSpec::builder()
            .name("lmp")
            .url("https://example.com/lmp")
            .output_folder("lmp")
            .build();
        spec.headers.insert("accept".into(), "text/csv".into());

        let merged = client.merged_headers(&spec);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged["accept"], "text/csv");

        let map = client.header_map(&spec).unwrap();
        assert_eq!(map["accept"], "text/csv");
    }

    #[test]
    fn test_invalid_header_is_config_error() {
        let client = HttpClient::new(HttpConfig::default()).unwrap();
        let mut spec = EndpointSpec::builder()
            .name("lmp")
            .url("https://example.com/lmp")
            .output_folder("lmp")
            .build();
        spec.headers.insert("bad header".into(), "x".into());

        assert!(matches!(
            client.header_map(&spec),
            Err(PipelineError::Config { .. })
        ));
    }
}
