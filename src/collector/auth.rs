//! Credential resolution and attachment.

use reqwest::RequestBuilder;
use reqwest::header::HeaderName;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::endpoint::AuthMode;
use crate::error::PipelineError;

/// Header names whose values never reach the logs
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "x-api-key",
    "api-key",
    "token",
    "cookie",
    "x-auth-token",
    "password",
];

const REDACTED: &str = "[REDACTED]";

/// Lookup of named secrets referenced by endpoint auth settings
pub trait SecretSource: Send + Sync {
    fn secret(&self, name: &str) -> Option<String>;
}

/// Secrets from process environment variables
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn secret(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// Fixed in-memory secrets, handy for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }
}

impl SecretSource for StaticSecrets {
    fn secret(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }
}

/// Resolved request credentials
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Anonymous,
    Basic { username: String, password: String },
    ApiKey { header: HeaderName, key: String },
    Bearer { token: String },
}

impl Credentials {
    /// Attach these credentials to an outgoing request.
    pub fn attach(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Credentials::Anonymous => request,
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
            Credentials::ApiKey { header, key } => request.header(header.clone(), key),
            Credentials::Bearer { token } => request.bearer_auth(token),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Anonymous => f.write_str("Anonymous"),
            Credentials::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &REDACTED)
                .finish(),
            Credentials::ApiKey { header, .. } => f
                .debug_struct("ApiKey")
                .field("header", header)
                .field("key", &REDACTED)
                .finish(),
            Credentials::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &REDACTED)
                .finish(),
        }
    }
}

/// Turns an endpoint's [`AuthMode`] into [`Credentials`]
#[derive(Clone)]
pub struct CredentialProvider {
    secrets: Arc<dyn SecretSource>,
}

impl Default for CredentialProvider {
    fn default() -> Self {
        Self::new(Arc::new(EnvSecrets))
    }
}

impl CredentialProvider {
    pub fn new(secrets: Arc<dyn SecretSource>) -> Self {
        Self { secrets }
    }

    pub fn resolve(&self, auth: &AuthMode) -> Result<Credentials, PipelineError> {
        match auth {
            AuthMode::None => Ok(Credentials::Anonymous),
            AuthMode::Basic {
                username,
                password_ref,
            } => {
                if username.is_empty() {
                    return Err(PipelineError::auth("basic auth requires a username"));
                }
                Ok(Credentials::Basic {
                    username: username.clone(),
                    password: self.lookup(password_ref)?,
                })
            }
            AuthMode::ApiKey { header, key_ref } => {
                let header = HeaderName::from_bytes(header.as_bytes()).map_err(|_| {
                    PipelineError::config(format!("invalid API key header name '{header}'"))
                })?;
                Ok(Credentials::ApiKey {
                    header,
                    key: self.lookup(key_ref)?,
                })
            }
            AuthMode::Bearer { token_ref } => Ok(Credentials::Bearer {
                token: self.lookup(token_ref)?,
            }),
        }
    }

    fn lookup(&self, name: &str) -> Result<String, PipelineError> {
        if name.trim().is_empty() {
            return Err(PipelineError::auth("credential reference is empty"));
        }
        self.secrets
            .secret(name)
            .ok_or_else(|| PipelineError::auth(format!("secret '{name}' is not set")))
    }
}

/// Copy of `headers` with sensitive values replaced, for logging
pub fn sanitize_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let lower = name.to_ascii_lowercase();
            if SENSITIVE_HEADERS.contains(&lower.as_str()) {
                (name.clone(), REDACTED.to_string())
            } else {
                (name.clone(), value.clone())
            }
        })
        .collect()
}
