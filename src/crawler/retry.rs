//! Retry coordinator
//!
//! Wraps a single-attempt fetch function with exponential backoff. Only
//! retryable failures are retried, at most `max_retries` times; running out
//! of attempts turns the last failure into `RetriesExhausted`.

use crate::output::RunStats;
use crate::state::{FailureReason, FetchOutcome, FetchTask};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Backoff parameters
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Attempts per task, the first one included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `retry` (0 for the first retry)
    ///
    /// `min(max_delay, base × 2^retry + jitter)` with jitter drawn from
    /// `[0, base × 2^retry / 4]`. The jitter never exceeds the doubling step,
    /// so successive delays never decrease.
    pub fn backoff(&self, retry: u32) -> Duration {
        let raw = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry.min(20)));
        let jitter_cap = (raw / 4).as_millis() as u64;
        let jitter = if jitter_cap > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_cap))
        } else {
            Duration::ZERO
        };
        raw.saturating_add(jitter).min(self.max_delay)
    }
}

/// Result of one attempt as reported by the attempt function
#[derive(Debug)]
pub struct AttemptReport {
    pub outcome: FetchOutcome,

    /// Proxy address the attempt went through
    pub proxy: Option<String>,
}

/// Drives the attempts of one task
pub struct RetryCoordinator {
    policy: RetryPolicy,
    stats: Arc<RunStats>,
    cancel: CancellationToken,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy, stats: Arc<RunStats>, cancel: CancellationToken) -> Self {
        Self {
            policy,
            stats,
            cancel,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs attempts for `task` until one is final
    ///
    /// `attempt_fn` performs exactly one attempt, acquiring whatever identity
    /// it needs, so every retry may go through a different proxy. Every
    /// attempt and every retry is recorded in the run statistics before this
    /// returns.
    ///
    /// # Returns
    ///
    /// * `Success` - An attempt fetched the document
    /// * `TerminalFailure` - A non-retryable failure, `RetriesExhausted`
    ///   wrapping the last retryable one, or `Cancelled`
    pub async fn run<F, Fut>(&self, task: &mut FetchTask, mut attempt_fn: F) -> FetchOutcome
    where
        F: FnMut(&FetchTask) -> Fut,
        Fut: Future<Output = AttemptReport>,
    {
        task.max_attempts = task.max_attempts.min(self.policy.max_attempts()).max(1);

        loop {
            if self.cancel.is_cancelled() {
                return FetchOutcome::TerminalFailure {
                    reason: FailureReason::Cancelled,
                };
            }
            if task.attempt_count == 0 {
                self.stats.record_task_attempted();
            }
            self.stats.record_attempt();

            let report = attempt_fn(task).await;
            let attempt = task.begin_attempt(report.proxy);

            let (reason, hint) = match report.outcome {
                FetchOutcome::RetryableFailure { reason, .. } => {
                    let hint = match &reason {
                        FailureReason::ProxyUnavailable { retry_after } => Some(*retry_after),
                        _ => None,
                    };
                    (reason, hint)
                }
                final_outcome => return final_outcome,
            };

            if !task.can_attempt() {
                tracing::debug!(url = %task.url, attempts = attempt, reason = %reason, "Retries exhausted");
                return FetchOutcome::TerminalFailure {
                    reason: FailureReason::RetriesExhausted {
                        last: Box::new(reason),
                    },
                };
            }

            self.stats.record_retry(&reason);

            let backoff = self.policy.backoff(attempt - 1);
            let delay = hint.map_or(backoff, |h| h.max(backoff)).min(self.policy.max_delay);

            tracing::debug!(
                url = %task.url,
                attempt,
                reason = %reason,
                delay_ms = delay.as_millis() as u64,
                "Retrying after backoff"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return FetchOutcome::TerminalFailure { reason: FailureReason::Cancelled };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
