//! Persistence: convert collected payloads, resolve their keys and upload
//! them with provenance metadata.

pub mod keys;

pub use keys::{KeyResolver, random_suffix};

use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::collector::{BackoffPolicy, CollectionResult, RetryDecision, RetryState, Sleep, TokioSleep};
use crate::endpoint::EndpointSpec;
use crate::error::{PipelineError, UploadErrorClass};
use crate::format::{Converted, DataFormat, FormatConverter};
use crate::observability::Metrics;
use crate::pipeline::RunContext;
use crate::shutdown::ShutdownSignal;
use crate::storage::{ObjectMetadata, ObjectStorage, PutReceipt, StorageError};

/// Value of the `data_source` metadata entry
const DATA_SOURCE: &str = "api_collector";

/// Outcome of persisting one collection result
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub endpoint: String,
    pub key: Option<String>,
    pub target_format: Option<DataFormat>,
    pub byte_size: usize,
    pub success: bool,
    pub attempts: u32,
    pub etag: Option<String>,
    pub error: Option<PipelineError>,
    pub error_class: Option<UploadErrorClass>,
    pub metadata: BTreeMap<String, String>,
}

impl UploadResult {
    fn failed(endpoint: &str, error: PipelineError) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            key: None,
            target_format: None,
            byte_size: 0,
            success: false,
            attempts: 0,
            etag: None,
            error_class: error.upload_class(),
            error: Some(error),
            metadata: BTreeMap::new(),
        }
    }

    pub fn error_code(&self) -> Option<&'static str> {
        self.error.as_ref().map(PipelineError::code)
    }
}

/// Uploads converted payloads to an [`ObjectStorage`]
#[derive(Clone)]
pub struct S3DataPersistence {
    storage: Arc<dyn ObjectStorage>,
    converter: FormatConverter,
    resolver: KeyResolver,
    run: RunContext,
    policy: BackoffPolicy,
    max_retries: u32,
    sleeper: Arc<dyn Sleep>,
    shutdown: ShutdownSignal,
    metrics: Arc<Metrics>,
}

impl S3DataPersistence {
    pub fn new(storage: Arc<dyn ObjectStorage>, run: RunContext) -> Self {
        Self {
            storage,
            converter: FormatConverter::new(),
            resolver: KeyResolver::default(),
            run,
            policy: BackoffPolicy::default(),
            max_retries: 3,
            sleeper: Arc::new(TokioSleep),
            shutdown: ShutdownSignal::new(),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Prefix prepended to every key
    pub fn with_root_prefix(mut self, root_prefix: &str) -> Self {
        self.resolver = KeyResolver::new(root_prefix);
        self
    }

    /// Backoff and retry budget for transient upload failures
    pub fn with_retry(mut self, policy: BackoffPolicy, max_retries: u32) -> Self {
        self.policy = policy;
        self.max_retries = max_retries;
        self
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

    /// Stamp keys and metadata with a different run
    pub fn with_run(mut self, run: RunContext) -> Self {
        self.run = run;
        self
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    /// Convert and upload one collection result. Never fails; errors land
    /// in the returned [`UploadResult`].
    pub async fn persist(&self, result: &CollectionResult, spec: &EndpointSpec) -> UploadResult {
        let upload = match self.prepare(result, spec) {
            Ok(prepared) => self.upload(spec, prepared).await,
            Err(error) => UploadResult::failed(&spec.name, error),
        };

        match &upload.error {
            None => {
                self.metrics.upload_succeeded(upload.byte_size);
                info!(
                    endpoint = %spec.name,
                    key = upload.key.as_deref().unwrap_or_default(),
                    size = upload.byte_size,
                    attempts = upload.attempts,
                    "Upload succeeded"
                );
            }
            Some(e) => {
                self.metrics.upload_failed();
                warn!(
                    endpoint = %spec.name,
                    code = e.code(),
                    class = ?upload.error_class,
                    error = %e,
                    "Upload failed"
                );
            }
        }

        upload
    }

    /// Persist every successful collection, pairing results with specs by
    /// endpoint name. Failed collections are not attempted.
    pub async fn persist_all(
        &self,
        results: &[CollectionResult],
        specs: &[EndpointSpec],
    ) -> Vec<UploadResult> {
        let mut uploads = Vec::new();
        for result in results.iter().filter(|r| r.success) {
            let upload = match specs.iter().find(|s| s.name == result.endpoint) {
                Some(spec) => self.persist(result, spec).await,
                None => UploadResult::failed(
                    &result.endpoint,
                    PipelineError::config(format!(
                        "no endpoint configuration named '{}'",
                        result.endpoint
                    )),
                ),
            };
            uploads.push(upload);
        }
        uploads
    }

    fn prepare(&self, result: &CollectionResult, spec: &EndpointSpec) -> Result<Prepared, PipelineError> {
        if let Some(error) = &result.error {
            return Err(error.clone());
        }
        let payload = result
            .payload
            .as_ref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| PipelineError::format_detection("collection result carries no payload"))?;

        let detected = result.detected_format.unwrap_or(DataFormat::Unknown);
        let target = match (detected, spec.target_format) {
            (_, Some(target)) => target,
            (DataFormat::Unknown, None) => {
                return Err(PipelineError::format_detection(
                    "payload format is unknown and no target format is configured",
                ));
            }
            (detected, None) => detected,
        };

        let converted = self.converter.convert(payload, detected, target)?;
        let key = self
            .resolver
            .resolve(spec, self.run.started_at, &random_suffix(), converted.format);
        let metadata = self.metadata(result, spec, detected, &converted);

        Ok(Prepared {
            key,
            converted,
            metadata,
        })
    }

    fn metadata(
        &self,
        result: &CollectionResult,
        spec: &EndpointSpec,
        detected: DataFormat,
        converted: &Converted,
    ) -> ObjectMetadata {
        let mut entries = BTreeMap::from([
            ("source".to_string(), spec.name.clone()),
            ("original_format".to_string(), detected.label().to_string()),
            ("target_format".to_string(), converted.format.label().to_string()),
            ("run_id".to_string(), self.run.run_id.to_string()),
            ("generated_at".to_string(), Utc::now().to_rfc3339()),
            ("byte_size".to_string(), converted.bytes.len().to_string()),
            ("data_source".to_string(), DATA_SOURCE.to_string()),
            ("attempts".to_string(), result.attempts.to_string()),
        ]);
        if let Some(count) = converted.record_count {
            entries.insert("record_count".to_string(), count.to_string());
        }
        if let Some(status) = result.http_status {
            entries.insert("http_status".to_string(), status.to_string());
        }
        if let Some(description) = spec.description.as_deref().filter(|d| !d.is_empty()) {
            entries.insert("description".to_string(), description.to_string());
        }

        ObjectMetadata {
            content_type: Some(converted.format.content_type().to_string()),
            entries,
        }
    }

    async fn upload(&self, spec: &EndpointSpec, prepared: Prepared) -> UploadResult {
        let Prepared {
            key,
            converted,
            metadata,
        } = prepared;

        let mut upload = UploadResult {
            endpoint: spec.name.clone(),
            key: Some(key.clone()),
            target_format: Some(converted.format),
            byte_size: converted.bytes.len(),
            success: false,
            attempts: 0,
            etag: None,
            error: None,
            error_class: None,
            metadata: metadata.entries.clone(),
        };

        let (attempts, outcome) = self.put_with_retry(&spec.name, &key, converted.bytes, &metadata).await;
        upload.attempts = attempts;
        match outcome {
            Ok(receipt) => {
                upload.success = true;
                upload.etag = receipt.etag;
            }
            Err(error) => {
                upload.error_class = error.upload_class();
                upload.error = Some(error);
            }
        }
        upload
    }

    async fn put_with_retry(
        &self,
        endpoint: &str,
        key: &str,
        bytes: Bytes,
        metadata: &ObjectMetadata,
    ) -> (u32, Result<PutReceipt, PipelineError>) {
        let mut state = RetryState::new();

        loop {
            if self.shutdown.is_triggered() {
                return (
                    state.attempt,
                    Err(PipelineError::cancelled("run cancelled before upload")),
                );
            }

            let attempt = state.begin_attempt();
            let error = match self.storage.put(key, bytes.clone(), metadata).await {
                Ok(receipt) => return (attempt, Ok(receipt)),
                // an earlier attempt landed even though its response was lost
                Err(StorageError::AlreadyExists(_)) if attempt > 1 => {
                    warn!(
                        endpoint,
                        key,
                        attempt,
                        "Object already stored by an earlier attempt"
                    );
                    let receipt = PutReceipt {
                        key: key.to_string(),
                        etag: None,
                        size: bytes.len(),
                    };
                    return (attempt, Ok(receipt));
                }
                Err(e) => PipelineError::from(e),
            };

            match state.record_failure(&self.policy, self.max_retries, error.clone()) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        endpoint,
                        key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Upload failed, retrying"
                    );
                    self.metrics.upload_retry();

                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => {
                            return (
                                attempt,
                                Err(PipelineError::cancelled(format!(
                                    "upload retries stopped after {attempt} attempts; last error: {error}"
                                ))),
                            );
                        }
                        _ = self.sleeper.sleep(delay) => {}
                    }
                }
                RetryDecision::GiveUp => return (attempt, Err(error)),
            }
        }
    }
}

/// Converted payload ready for upload
struct Prepared {
    key: String,
    converted: Converted,
    metadata: ObjectMetadata,
}
