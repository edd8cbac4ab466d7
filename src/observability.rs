//! Observability: in-process counters and tracing setup

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

/// Install the global `fmt` subscriber, honouring `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Run counters shared by collector and persistence
#[derive(Debug, Default)]
pub struct Metrics {
    http_attempts: AtomicU64,
    http_retries: AtomicU64,
    collections_succeeded: AtomicU64,
    collections_failed: AtomicU64,
    uploads_succeeded: AtomicU64,
    uploads_failed: AtomicU64,
    upload_retries: AtomicU64,
    bytes_uploaded: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn http_attempt(&self) {
        self.http_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn http_retry(&self) {
        self.http_retries.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "http_retries", "Metric incremented");
    }

    pub fn collection_finished(&self, success: bool) {
        if success {
            self.collections_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.collections_failed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(counter = "collections_failed", "Metric incremented");
        }
    }

    pub fn upload_retry(&self) {
        self.upload_retries.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "upload_retries", "Metric incremented");
    }

    pub fn upload_succeeded(&self, bytes: usize) {
        self.uploads_succeeded.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn upload_failed(&self) {
        self.uploads_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "uploads_failed", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            http_attempts: self.http_attempts.load(Ordering::Relaxed),
            http_retries: self.http_retries.load(Ordering::Relaxed),
            collections_succeeded: self.collections_succeeded.load(Ordering::Relaxed),
            collections_failed: self.collections_failed.load(Ordering::Relaxed),
            uploads_succeeded: self.uploads_succeeded.load(Ordering::Relaxed),
            uploads_failed: self.uploads_failed.load(Ordering::Relaxed),
            upload_retries: self.upload_retries.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub http_attempts: u64,
    pub http_retries: u64,
    pub collections_succeeded: u64,
    pub collections_failed: u64,
    pub uploads_succeeded: u64,
    pub uploads_failed: u64,
    pub upload_retries: u64,
    pub bytes_uploaded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = Metrics::new();
        metrics.http_attempt();
        metrics.http_attempt();
        metrics.http_retry();
        metrics.collection_finished(true);
        metrics.upload_succeeded(128);
        metrics.upload_failed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.http_attempts, 2);
        assert_eq!(snapshot.http_retries, 1);
        assert_eq!(snapshot.collections_succeeded, 1);
        assert_eq!(snapshot.collections_failed, 0);
        assert_eq!(snapshot.uploads_failed, 1);
        assert_eq!(snapshot.bytes_uploaded, 128);
    }
}
