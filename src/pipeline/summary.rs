//! Run summary and its single-writer aggregation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::RunContext;
use crate::collector::CollectionResult;
use crate::observability::MetricsSnapshot;
use crate::persistence::UploadResult;

/// Everything that happened to one endpoint during a run
#[derive(Debug, Clone, Serialize)]
pub struct EndpointReport {
    pub endpoint: String,
    pub collection: CollectionResult,
    /// `None` when the collection failed and nothing was persisted
    pub upload: Option<UploadResult>,
}

impl EndpointReport {
    pub fn succeeded(&self) -> bool {
        self.collection.success && self.upload.as_ref().is_some_and(|u| u.success)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub collections_succeeded: usize,
    pub collections_failed: usize,
    pub uploads_attempted: usize,
    pub uploads_succeeded: usize,
    pub uploads_failed: usize,
    pub cancelled: bool,
    pub results: Vec<EndpointReport>,
    pub metrics: MetricsSnapshot,
}

impl RunSummary {
    /// True when every endpoint was collected and uploaded
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.results.iter().all(EndpointReport::succeeded)
    }

    pub fn report(&self, endpoint: &str) -> Option<&EndpointReport> {
        self.results.iter().find(|r| r.endpoint == endpoint)
    }
}

/// Owns the counters while a run is in flight. Only the aggregation loop
/// holds one, so reports are merged by a single writer.
#[derive(Debug)]
pub(crate) struct SummaryBuilder {
    run: RunContext,
    reports: Vec<(usize, EndpointReport)>,
}

impl SummaryBuilder {
    pub(crate) fn new(run: RunContext) -> Self {
        Self {
            run,
            reports: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, position: usize, report: EndpointReport) {
        self.reports.push((position, report));
    }

    pub(crate) fn finish(mut self, cancelled: bool, metrics: MetricsSnapshot) -> RunSummary {
        self.reports.sort_by_key(|(position, _)| *position);
        let results: Vec<EndpointReport> = self.reports.into_iter().map(|(_, r)| r).collect();

        let collections_succeeded = results.iter().filter(|r| r.collection.success).count();
        let uploads: Vec<&UploadResult> = results.iter().filter_map(|r| r.upload.as_ref()).collect();
        let uploads_succeeded = uploads.iter().filter(|u| u.success).count();

        RunSummary {
            run_id: self.run.run_id,
            started_at: self.run.started_at,
            finished_at: Utc::now(),
            collections_succeeded,
            collections_failed: results.len() - collections_succeeded,
            uploads_attempted: uploads.len(),
            uploads_succeeded,
            uploads_failed: uploads.len() - uploads_succeeded,
            cancelled,
            results,
            metrics,
        }
    }
}
