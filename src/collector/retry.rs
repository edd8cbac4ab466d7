//! Backoff policy and explicit retry state.
//!
//! The policy is a pure function of (attempt, failure class, jitter sample),
//! so retry schedules can be asserted without timers. Actual waiting goes
//! through the [`Sleep`] trait, which tests replace with [`RecordingSleep`].

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{PipelineError, UploadErrorClass};

/// Whether a failure is worth another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    Terminal,
}

impl FailureClass {
    /// 429, 5xx, network errors and transient store errors retry; the rest do not.
    pub fn of(error: &PipelineError) -> Self {
        match error {
            PipelineError::Network { .. } => FailureClass::Retryable,
            PipelineError::Http { status, .. } if *status == 429 || (500..=599).contains(status) => {
                FailureClass::Retryable
            }
            PipelineError::Upload {
                class: UploadErrorClass::Transient,
                ..
            } => FailureClass::Retryable,
            _ => FailureClass::Terminal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Exponential backoff with proportional jitter, capped at `max_delay`.
///
/// Delay before retry `n` (1-based) is `base * multiplier^(n-1)`, plus up to
/// `jitter` of itself, never more than `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffPolicy {
    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Decide what to do after `attempt` (1-based) failed with `class`.
    ///
    /// `jitter_sample` is expected in `[0, 1)`.
    pub fn decide(
        &self,
        attempt: u32,
        max_retries: u32,
        class: FailureClass,
        jitter_sample: f64,
    ) -> RetryDecision {
        if class == FailureClass::Terminal || attempt > max_retries {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.delay_for(attempt, jitter_sample))
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32, jitter_sample: f64) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let sample = jitter_sample.clamp(0.0, 1.0);
        let jittered = raw + raw * self.jitter * sample;

        Duration::try_from_secs_f64(jittered)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Same as [`decide`](Self::decide) with a fresh random jitter sample
    pub fn decide_random(&self, attempt: u32, max_retries: u32, class: FailureClass) -> RetryDecision {
        let sample = rand::thread_rng().gen_range(0.0..1.0);
        self.decide(attempt, max_retries, class, sample)
    }
}

/// Retry bookkeeping for one unit of work
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetryState {
    pub attempt: u32,
    pub last_error: Option<PipelineError>,
    pub next_delay: Option<Duration>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the start of a new attempt and return its 1-based number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.next_delay = None;
        self.attempt
    }

    /// Record the failure of the current attempt and decide what follows.
    pub fn record_failure(
        &mut self,
        policy: &BackoffPolicy,
        max_retries: u32,
        error: PipelineError,
    ) -> RetryDecision {
        let decision = policy.decide_random(self.attempt, max_retries, FailureClass::of(&error));
        self.apply(decision, error)
    }

    /// Like [`record_failure`](Self::record_failure) with a fixed jitter sample.
    pub fn record_failure_with_sample(
        &mut self,
        policy: &BackoffPolicy,
        max_retries: u32,
        error: PipelineError,
        jitter_sample: f64,
    ) -> RetryDecision {
        let decision = policy.decide(self.attempt, max_retries, FailureClass::of(&error), jitter_sample);
        self.apply(decision, error)
    }

    fn apply(&mut self, decision: RetryDecision, error: PipelineError) -> RetryDecision {
        self.last_error = Some(error);
        self.next_delay = match decision {
            RetryDecision::RetryAfter(delay) => Some(delay),
            RetryDecision::GiveUp => None,
        };
        decision
    }
}

/// Injected delay mechanism
#[async_trait]
pub trait Sleep: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleep;

#[async_trait]
impl Sleep for TokioSleep {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested delays and returns immediately
#[derive(Debug, Default)]
pub struct RecordingSleep {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleep {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, duration: Duration) {
        match self.delays.lock() {
            Ok(mut delays) => delays.push(duration),
            Err(poisoned) => poisoned.into_inner().push(duration),
        }
    }

    pub fn delays(&self) -> Vec<Duration> {
        match self.delays.lock() {
            Ok(delays) => delays.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Sleep for RecordingSleep {
    async fn sleep(&self, duration: Duration) {
        self.record(duration);
        tokio::task::yield_now().await;
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(
            FailureClass::of(&PipelineError::network("reset")),
            FailureClass::Retryable
        );
        for status in [429, 500, 503, 599] {
            let err = PipelineError::Http {
                status,
                message: String::new(),
            };
            assert_eq!(FailureClass::of(&err), FailureClass::Retryable, "{status}");
        }
        for status in [400, 401, 404, 428, 430] {
            let err = PipelineError::Http {
                status,
                message: String::new(),
            };
            assert_eq!(FailureClass::of(&err), FailureClass::Terminal, "{status}");
        }
        assert_eq!(
            FailureClass::of(&PipelineError::auth("missing")),
            FailureClass::Terminal
        );
    }

    #[test]
    fn test_exponential_growth_without_jitter() {
        let policy = policy();
        assert_eq!(policy.delay_for(1, 0.0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, 0.0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, 0.0), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10, 0.0), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_keeps_delays_strictly_increasing() {
        let policy = policy();
        // worst case: maximal jitter on one retry, none on the next
        let first = policy.delay_for(1, 0.999);
        let second = policy.delay_for(2, 0.0);
        assert!(first < second, "{first:?} < {second:?}");
        assert!(policy.delay_for(1, 0.999) <= Duration::from_millis(150));
    }

    #[test]
    fn test_decide_gives_up() {
        let policy = policy();
        assert_eq!(
            policy.decide(1, 3, FailureClass::Terminal, 0.0),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(3, 3, FailureClass::Retryable, 0.0),
            RetryDecision::RetryAfter(Duration::from_millis(400))
        );
        assert_eq!(
            policy.decide(4, 3, FailureClass::Retryable, 0.0),
            RetryDecision::GiveUp
        );
        assert_eq!(
            policy.decide(1, 0, FailureClass::Retryable, 0.0),
            RetryDecision::GiveUp
        );
    }

    #[test]
    fn test_retry_state_tracks_last_error() {
        let policy = policy();
        let mut state = RetryState::new();

        assert_eq!(state.begin_attempt(), 1);
        let decision = state.record_failure_with_sample(
            &policy,
            1,
            PipelineError::Http {
                status: 503,
                message: "Service Unavailable".into(),
            },
            0.0,
        );
        assert_eq!(decision, RetryDecision::RetryAfter(Duration::from_millis(100)));
        assert_eq!(state.next_delay, Some(Duration::from_millis(100)));

        assert_eq!(state.begin_attempt(), 2);
        let decision =
            state.record_failure_with_sample(&policy, 1, PipelineError::network("timeout"), 0.0);
        assert_eq!(decision, RetryDecision::GiveUp);
        assert_eq!(state.last_error, Some(PipelineError::network("timeout")));
        assert_eq!(state.next_delay, None);
    }

    #[tokio::test]
    async fn test_recording_sleep() {
        let sleeper = RecordingSleep::new();
        sleeper.sleep(Duration::from_millis(5)).await;
        sleeper.sleep(Duration::from_millis(10)).await;
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_millis(5), Duration::from_millis(10)]
        );
    }
}
