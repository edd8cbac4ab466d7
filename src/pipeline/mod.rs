//! Run orchestration: collect each endpoint, persist what was collected and
//! fold every outcome into a [`RunSummary`].
//!
//! Endpoints run as independent tasks bounded by a semaphore. Each task
//! sends its [`EndpointReport`] over a channel to the aggregation loop,
//! which is the only place the summary is written.

mod summary;

pub use summary::{EndpointReport, RunSummary};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

use crate::collector::{ApiDataCollector, CollectionResult, CredentialProvider, HttpClient};
use crate::config::Config;
use crate::endpoint::EndpointSpec;
use crate::error::PipelineError;
use crate::observability::Metrics;
use crate::persistence::S3DataPersistence;
use crate::shutdown::ShutdownSignal;
use crate::storage::ObjectStorage;
use summary::SummaryBuilder;

/// Identity of one pipeline execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

pub struct PipelineOrchestrator {
    collector: ApiDataCollector,
    persistence: S3DataPersistence,
    shutdown: ShutdownSignal,
    metrics: Arc<Metrics>,
    concurrency: usize,
}

impl PipelineOrchestrator {
    /// `collector` and `persistence` should share `shutdown` and `metrics`.
    pub fn new(
        collector: ApiDataCollector,
        persistence: S3DataPersistence,
        shutdown: ShutdownSignal,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            collector,
            persistence,
            shutdown,
            metrics,
            concurrency: 4,
        }
    }

    /// Wire collector and persistence from loaded configuration.
    pub fn from_config(
        config: &Config,
        credentials: CredentialProvider,
        storage: Arc<dyn ObjectStorage>,
        shutdown: ShutdownSignal,
    ) -> Result<Self, PipelineError> {
        let metrics = Arc::new(Metrics::new());

        let mut collector = ApiDataCollector::new(HttpClient::new(config.http.clone())?, credentials, config.retry)
            .with_shutdown(shutdown.clone())
            .with_metrics(metrics.clone())
            .with_concurrency(config.pipeline.concurrency);
        if let Some(dir) = &config.pipeline.staging_dir {
            collector = collector.with_staging_dir(dir);
        }

        let persistence = S3DataPersistence::new(storage, RunContext::new())
            .with_root_prefix(&config.storage.root_prefix)
            .with_retry(config.retry, config.storage.upload_max_retries)
            .with_shutdown(shutdown.clone())
            .with_metrics(metrics.clone());

        Ok(Self::new(collector, persistence, shutdown, metrics).with_concurrency(config.pipeline.concurrency))
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Collect then persist every endpoint. One endpoint's failure never
    /// stops the others; a cancelled run still returns what completed.
    /// Every call is a new run with its own [`RunContext`].
    pub async fn run_pipeline(&self, specs: &[EndpointSpec]) -> RunSummary {
        let run = RunContext::new();
        let persistence = self.persistence.clone().with_run(run.clone());
        info!(run_id = %run.run_id, endpoints = specs.len(), "Pipeline run started");

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::channel::<(usize, EndpointReport)>(specs.len().max(1));
        let mut workers = JoinSet::new();
        let mut positions = HashMap::new();

        for (position, spec) in specs.iter().cloned().enumerate() {
            let collector = self.collector.clone();
            let persistence = persistence.clone();
            let semaphore = semaphore.clone();
            let tx = tx.clone();

            let handle = workers.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let report = process_endpoint(&collector, &persistence, &spec).await;
                if tx.send((position, report)).await.is_err() {
                    error!(endpoint = %spec.name, "Summary aggregator closed before report was delivered");
                }
            });
            positions.insert(handle.id(), position);
        }
        drop(tx);

        let mut builder = SummaryBuilder::new(run);
        let mut delivered = vec![false; specs.len()];
        while let Some((position, report)) = rx.recv().await {
            delivered[position] = true;
            builder.record(position, report);
        }

        let mut failures = HashMap::new();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Endpoint worker failed");
                if let Some(&position) = positions.get(&e.id()) {
                    failures.insert(position, PipelineError::from(e));
                }
            }
        }

        // a worker that died without reporting still gets a row
        for (position, spec) in specs.iter().enumerate() {
            if !delivered[position] {
                let error = failures
                    .remove(&position)
                    .unwrap_or_else(|| PipelineError::cancelled("endpoint worker never reported"));
                builder.record(
                    position,
                    EndpointReport {
                        endpoint: spec.name.clone(),
                        collection: CollectionResult::failed(&spec.name, error, 0, None, Utc::now()),
                        upload: None,
                    },
                );
            }
        }

        let summary = builder.finish(self.shutdown.is_triggered(), self.metrics.snapshot());
        info!(
            run_id = %summary.run_id,
            collections_succeeded = summary.collections_succeeded,
            collections_failed = summary.collections_failed,
            uploads_attempted = summary.uploads_attempted,
            uploads_succeeded = summary.uploads_succeeded,
            uploads_failed = summary.uploads_failed,
            cancelled = summary.cancelled,
            metrics = ?summary.metrics,
            "Pipeline run finished"
        );
        summary
    }
}

async fn process_endpoint(
    collector: &ApiDataCollector,
    persistence: &S3DataPersistence,
    spec: &EndpointSpec,
) -> EndpointReport {
    let collection = collector.collect(spec).await;
    let upload = if collection.success {
        Some(persistence.persist(&collection, spec).await)
    } else {
        None
    };

    EndpointReport {
        endpoint: spec.name.clone(),
        collection,
        upload,
    }
}

/// Restrict `specs` to the named endpoints, keeping configuration order.
/// An empty `names` selects everything.
pub fn select_endpoints(
    specs: &[EndpointSpec],
    names: &[String],
) -> Result<Vec<EndpointSpec>, PipelineError> {
    if names.is_empty() {
        return Ok(specs.to_vec());
    }

    if let Some(unknown) = names.iter().find(|n| !specs.iter().any(|s| &s.name == *n)) {
        return Err(PipelineError::config(format!("unknown endpoint '{unknown}'")));
    }

    Ok(specs
        .iter()
        .filter(|s| names.contains(&s.name))
        .cloned()
        .collect())
}
