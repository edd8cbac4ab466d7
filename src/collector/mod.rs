//! API data collection.
//!
//! [`ApiDataCollector::collect`] runs one endpoint through
//! authenticate → send → classify → (backoff → send)* and always returns a
//! [`CollectionResult`]; failures are captured, never raised.

pub mod auth;
pub mod http;
pub mod retry;

pub use auth::{CredentialProvider, Credentials, EnvSecrets, SecretSource, StaticSecrets, sanitize_headers};
pub use http::{HttpClient, HttpConfig, HttpResponse};
pub use retry::{
    BackoffPolicy, FailureClass, RecordingSleep, RetryDecision, RetryState, Sleep, TokioSleep,
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::endpoint::EndpointSpec;
use crate::error::PipelineError;
use crate::format::{DataFormat, FormatSniffer};
use crate::observability::Metrics;
use crate::persistence::keys;
use crate::shutdown::ShutdownSignal;

/// Outcome of collecting one endpoint.
///
/// Either `payload` and `detected_format` are set and `error` is `None`, or
/// `error` is set and there is no payload.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionResult {
    pub endpoint: String,
    pub success: bool,
    #[serde(skip)]
    pub payload: Option<Bytes>,
    pub payload_size: usize,
    pub detected_format: Option<DataFormat>,
    pub content_type: Option<String>,
    pub staging_path: Option<PathBuf>,
    pub http_status: Option<u16>,
    pub attempts: u32,
    pub error: Option<PipelineError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl CollectionResult {
    pub fn failed(
        endpoint: impl Into<String>,
        error: PipelineError,
        attempts: u32,
        http_status: Option<u16>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            success: false,
            payload: None,
            payload_size: 0,
            detected_format: None,
            content_type: None,
            staging_path: None,
            http_status,
            attempts,
            error: Some(error),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn error_code(&self) -> Option<&'static str> {
        self.error.as_ref().map(PipelineError::code)
    }
}

/// Result of the request loop before the body is classified
struct Exchange {
    attempts: u32,
    http_status: Option<u16>,
    outcome: Result<HttpResponse, PipelineError>,
}

impl Exchange {
    fn failed(attempts: u32, http_status: Option<u16>, error: PipelineError) -> Self {
        Self {
            attempts,
            http_status,
            outcome: Err(error),
        }
    }
}

#[derive(Clone)]
pub struct ApiDataCollector {
    http: HttpClient,
    credentials: CredentialProvider,
    policy: BackoffPolicy,
    sniffer: Arc<FormatSniffer>,
    sleeper: Arc<dyn Sleep>,
    shutdown: ShutdownSignal,
    metrics: Arc<Metrics>,
    staging_dir: Option<PathBuf>,
    concurrency: usize,
}

impl ApiDataCollector {
    pub fn new(http: HttpClient, credentials: CredentialProvider, policy: BackoffPolicy) -> Self {
        Self {
            http,
            credentials,
            policy,
            sniffer: Arc::new(FormatSniffer::default()),
            sleeper: Arc::new(TokioSleep),
            shutdown: ShutdownSignal::new(),
            metrics: Arc::new(Metrics::new()),
            staging_dir: None,
            concurrency: 4,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleep>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Also write raw bodies under this directory
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Maximum endpoints collected at once by [`collect_all`](Self::collect_all)
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Collect one endpoint. Never fails; errors land in the result.
    pub async fn collect(&self, spec: &EndpointSpec) -> CollectionResult {
        let started_at = Utc::now();
        let exchange = self.exchange(spec).await;

        let result = match exchange.outcome {
            Ok(response) => self.accept(spec, response, exchange.attempts, started_at).await,
            Err(error) => CollectionResult::failed(
                &spec.name,
                error,
                exchange.attempts,
                exchange.http_status,
                started_at,
            ),
        };

        match &result.error {
            None => info!(
                endpoint = %spec.name,
                attempts = result.attempts,
                status = ?result.http_status,
                format = ?result.detected_format,
                size = result.payload_size,
                "Collection succeeded"
            ),
            Some(e) => warn!(
                endpoint = %spec.name,
                attempts = result.attempts,
                status = ?result.http_status,
                code = e.code(),
                error = %e,
                "Collection failed"
            ),
        }
        self.metrics.collection_finished(result.success);

        result
    }

    /// Collect every endpoint, at most `concurrency` at a time. One result
    /// per input, in input order.
    pub async fn collect_all(&self, specs: &[EndpointSpec]) -> Vec<CollectionResult> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut positions = HashMap::new();

        for (idx, spec) in specs.iter().cloned().enumerate() {
            let collector = self.clone();
            let semaphore = semaphore.clone();
            let handle = tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                collector.collect(&spec).await
            });
            positions.insert(handle.id(), idx);
        }

        let mut slots: Vec<Option<CollectionResult>> = (0..specs.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => {
                    error!(error = %e, "Collection task failed");
                    let id = e.id();
                    let Some(spec) = positions.get(&id).map(|&idx| &specs[idx]) else {
                        continue;
                    };
                    let failed = CollectionResult::failed(
                        &spec.name,
                        PipelineError::from(e),
                        0,
                        None,
                        Utc::now(),
                    );
                    (id, failed)
                }
            };
            if let Some(&idx) = positions.get(&id) {
                slots[idx] = Some(result);
            }
        }

        slots
            .into_iter()
            .zip(specs)
            .map(|(slot, spec)| {
                slot.unwrap_or_else(|| {
                    CollectionResult::failed(
                        &spec.name,
                        PipelineError::cancelled("collection task never reported"),
                        0,
                        None,
                        Utc::now(),
                    )
                })
            })
            .collect()
    }

    async fn exchange(&self, spec: &EndpointSpec) -> Exchange {
        if self.shutdown.is_triggered() {
            return Exchange::failed(0, None, PipelineError::cancelled("run cancelled before collection started"));
        }

        if let Err(e) = spec.validate() {
            return Exchange::failed(0, None, e);
        }
        let rendered = match spec.render() {
            Ok(rendered) => rendered,
            Err(e) => return Exchange::failed(0, None, e),
        };
        let credentials = match self.credentials.resolve(&spec.auth) {
            Ok(credentials) => credentials,
            Err(e) => return Exchange::failed(0, None, e),
        };

        let mut state = RetryState::new();
        let mut http_status = None;

        loop {
            let attempt = state.begin_attempt();
            self.metrics.http_attempt();

            let error = match self.http.send_once(spec, &rendered, &credentials).await {
                Ok(response) => {
                    http_status = Some(response.status);
                    if response.is_success() {
                        info!(
                            endpoint = %spec.name,
                            auth = spec.auth.name(),
                            attempt,
                            status = response.status,
                            "Request succeeded"
                        );
                        return Exchange {
                            attempts: attempt,
                            http_status,
                            outcome: Ok(response),
                        };
                    }
                    PipelineError::Http {
                        status: response.status,
                        message: response.reason,
                    }
                }
                Err(e) => e,
            };

            match state.record_failure(&self.policy, spec.max_retries, error.clone()) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        endpoint = %spec.name,
                        auth = spec.auth.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Request failed, retrying"
                    );
                    self.metrics.http_retry();

                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => {
                            return Exchange::failed(
                                attempt,
                                http_status,
                                PipelineError::cancelled(format!(
                                    "retries stopped after {attempt} attempts; last error: {error}"
                                )),
                            );
                        }
                        _ = self.sleeper.sleep(delay) => {}
                    }
                }
                RetryDecision::GiveUp => {
                    return Exchange::failed(attempt, http_status, error);
                }
            }
        }
    }

    /// Classify a successful response body
    async fn accept(
        &self,
        spec: &EndpointSpec,
        response: HttpResponse,
        attempts: u32,
        started_at: DateTime<Utc>,
    ) -> CollectionResult {
        if response.body.is_empty() {
            return CollectionResult::failed(
                &spec.name,
                PipelineError::format_detection(format!(
                    "HTTP {} returned an empty body",
                    response.status
                )),
                attempts,
                Some(response.status),
                started_at,
            );
        }

        let format = self
            .sniffer
            .detect(&response.body, response.content_type.as_deref());
        let staging_path = self.stage(spec, &response.body, format, started_at).await;

        CollectionResult {
            endpoint: spec.name.clone(),
            success: true,
            payload_size: response.body.len(),
            payload: Some(response.body),
            detected_format: Some(format),
            content_type: response.content_type,
            staging_path,
            http_status: Some(response.status),
            attempts,
            error: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Best-effort local copy of the raw body
    async fn stage(
        &self,
        spec: &EndpointSpec,
        body: &Bytes,
        format: DataFormat,
        at: DateTime<Utc>,
    ) -> Option<PathBuf> {
        let dir = self.staging_dir.as_ref()?.join(spec.folder());
        let path = dir.join(keys::file_name(spec, at, &keys::random_suffix(), format));

        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            warn!(endpoint = %spec.name, path = %dir.display(), error = %e, "Failed to create staging directory");
            return None;
        }
        match tokio::fs::write(&path, body).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!(endpoint = %spec.name, path = %path.display(), error = %e, "Failed to stage payload");
                None
            }
        }
    }
}
