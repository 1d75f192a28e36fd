//! Run statistics
//!
//! One `RunStats` is created per orchestrator run and shared by every
//! worker. Counters only grow for the lifetime of the run.

use crate::proxy::ProxyStats;
use crate::state::{FailureCategory, FailureReason};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone)]
struct Counters {
    attempted: u64,
    attempts: u64,
    succeeded: u64,
    retried: u64,
    failed: u64,
    skipped: u64,
    duplicates_dropped: u64,
    records: u64,
    discarded: u64,
    bytes_fetched: u64,
    failures: BTreeMap<FailureCategory, u64>,
    transient_failures: BTreeMap<FailureCategory, u64>,
}

/// Synchronized counters for one run
#[derive(Debug)]
pub struct RunStats {
    started: Instant,
    counters: Mutex<Counters>,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            counters: Mutex::new(Counters::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A task made its first attempt
    pub fn record_task_attempted(&self) {
        self.lock().attempted += 1;
    }

    /// Any attempt, first or retry
    pub fn record_attempt(&self) {
        self.lock().attempts += 1;
    }

    /// A retryable failure that will be attempted again
    pub fn record_retry(&self, reason: &FailureReason) {
        let mut counters = self.lock();
        counters.retried += 1;
        *counters.transient_failures.entry(reason.category()).or_insert(0) += 1;
    }

    /// A task finished with a usable document
    pub fn record_success(&self, bytes: usize) {
        let mut counters = self.lock();
        counters.succeeded += 1;
        counters.bytes_fetched += bytes as u64;
    }

    /// A task finished with a terminal failure
    pub fn record_failure(&self, reason: &FailureReason) {
        let mut counters = self.lock();
        counters.failed += 1;
        *counters.failures.entry(reason.category()).or_insert(0) += 1;
    }

    /// A task was never fetched because robots.txt disallows it
    pub fn record_skipped(&self) {
        self.lock().skipped += 1;
    }

    pub fn record_duplicate(&self) {
        self.lock().duplicates_dropped += 1;
    }

    /// A record was accepted by the sink
    pub fn record_record(&self) {
        self.lock().records += 1;
    }

    /// Tasks dropped unstarted because of cancellation or the URL cap
    pub fn record_discarded(&self, count: u64) {
        self.lock().discarded += count;
    }

    /// Returns a consistent copy of all counters with derived rates
    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = self.lock().clone();
        StatsSnapshot::from_counters(counters, self.started.elapsed())
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of the run's statistics
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    /// Tasks that made at least one attempt
    pub attempted: u64,
    /// Attempts across all tasks
    pub attempts: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub failed: u64,
    pub skipped: u64,
    pub duplicates_dropped: u64,
    pub records: u64,
    pub discarded: u64,
    pub bytes_fetched: u64,
    /// Terminal failures by category
    pub failures: BTreeMap<String, u64>,
    /// Retried failures by category
    pub transient_failures: BTreeMap<String, u64>,
    #[serde(skip)]
    pub elapsed: Duration,
    /// `succeeded / (succeeded + failed)`, 0 when nothing finished
    pub success_rate: f64,
    /// Finished tasks per second of wall time
    pub throughput: f64,
}

impl StatsSnapshot {
    fn from_counters(counters: Counters, elapsed: Duration) -> Self {
        let finished = counters.succeeded + counters.failed;
        let success_rate = if finished > 0 {
            counters.succeeded as f64 / finished as f64
        } else {
            0.0
        };
        let secs = elapsed.as_secs_f64();
        let throughput = if secs > 0.0 {
            finished as f64 / secs
        } else {
            0.0
        };

        let by_name = |map: BTreeMap<FailureCategory, u64>| {
            map.into_iter()
                .map(|(category, count)| (category.to_string(), count))
                .collect()
        };

        Self {
            attempted: counters.attempted,
            attempts: counters.attempts,
            succeeded: counters.succeeded,
            retried: counters.retried,
            failed: counters.failed,
            skipped: counters.skipped,
            duplicates_dropped: counters.duplicates_dropped,
            records: counters.records,
            discarded: counters.discarded,
            bytes_fetched: counters.bytes_fetched,
            failures: by_name(counters.failures),
            transient_failures: by_name(counters.transient_failures),
            elapsed,
            success_rate,
            throughput,
        }
    }
}

/// Prints the run summary to stdout in a formatted manner
///
/// # Arguments
///
/// * `stats` - The statistics to display
/// * `proxies` - Per-proxy statistics; empty when running direct
pub fn print_statistics(stats: &StatsSnapshot, proxies: &[ProxyStats]) {
    println!("=== Scrape Statistics ===\n");

    println!("Overview:");
    println!("  URLs attempted: {}", stats.attempted);
    println!("  Total attempts: {}", stats.attempts);
    println!("  Succeeded: {}", stats.succeeded);
    println!("  Failed: {}", stats.failed);
    println!("  Retried: {}", stats.retried);
    println!("  Skipped (robots.txt): {}", stats.skipped);
    println!("  Discarded: {}", stats.discarded);
    println!("  Records kept: {}", stats.records);
    println!("  Duplicates dropped: {}", stats.duplicates_dropped);
    println!("  Bytes fetched: {}", stats.bytes_fetched);
    println!();

    if !stats.failures.is_empty() {
        println!("Failure Summary:");
        let mut failure_counts: Vec<_> = stats.failures.iter().collect();
        failure_counts.sort_by(|a, b| b.1.cmp(a.1));

        for (category, count) in failure_counts {
            println!("  {}: {}", category, count);
        }
        println!();
    }

    if !stats.transient_failures.is_empty() {
        println!("Retried Failures:");
        for (category, count) in &stats.transient_failures {
            println!("  {}: {}", category, count);
        }
        println!();
    }

    if !proxies.is_empty() {
        println!("Proxies ({}):", proxies.len());
        for proxy in proxies {
            let state = match proxy.cooling_for {
                Some(remaining) => format!("cooling down ({}s left)", remaining.as_secs()),
                None if proxy.is_healthy => "healthy".to_string(),
                None => "probing".to_string(),
            };
            println!(
                "  - {}: {} ok / {} failed, {}",
                proxy.address, proxy.successes, proxy.failures, state
            );
        }
        println!();
    }

    println!(
        "Success Rate: {:.1}% ({} / {} finished URLs)",
        stats.success_rate * 100.0,
        stats.succeeded,
        stats.succeeded + stats.failed
    );
    println!(
        "Throughput: {:.2} URLs/s over {:.1}s",
        stats.throughput,
        stats.elapsed.as_secs_f64()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_accumulate() {
        let stats = RunStats::new();
        stats.record_task_attempted();
        stats.record_attempt();
        stats.record_retry(&FailureReason::HttpStatus(503));
        stats.record_attempt();
        stats.record_success(1024);
        stats.record_skipped();
        stats.record_duplicate();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.attempted, 1);
        assert_eq!(snapshot.attempts, 2);
        assert_eq!(snapshot.retried, 1);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.duplicates_dropped, 1);
        assert_eq!(snapshot.bytes_fetched, 1024);
        assert_eq!(snapshot.transient_failures.get("server_error"), Some(&1));
        assert!(snapshot.failures.is_empty());
    }

    #[test]
    fn test_failure_breakdown() {
        let stats = RunStats::new();
        stats.record_failure(&FailureReason::HttpStatus(404));
        stats.record_failure(&FailureReason::HttpStatus(410));
        stats.record_failure(&FailureReason::RetriesExhausted {
            last: Box::new(FailureReason::Timeout),
        });

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.failed, 3);
        assert_eq!(snapshot.failures.get("client_error"), Some(&2));
        assert_eq!(snapshot.failures.get("retries_exhausted"), Some(&1));
    }

    #[test]
    fn test_success_rate() {
        let stats = RunStats::new();
        assert_eq!(stats.snapshot().success_rate, 0.0);

        for _ in 0..3 {
            stats.record_success(10);
        }
        stats.record_failure(&FailureReason::HttpStatus(404));

        let snapshot = stats.snapshot();
        assert!((snapshot.success_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(RunStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        stats.record_attempt();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.snapshot().attempts, 800);
    }
}
