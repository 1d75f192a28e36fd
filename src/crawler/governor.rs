//! Rate governor
//!
//! Enforces a per-host pacing floor and a global ceiling on in-flight
//! requests. Callers for the same host are admitted in arrival order.
//!
//! The pacing floor for a host is `max(base_delay, robots crawl-delay)`,
//! jittered upward to at most `max_delay`, and is measured from the later
//! of the host's last admission and its last completion.

use crate::state::HostState;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Suggested re-poll interval when a slot, not pacing, is the blocker
const BUSY_RETRY: Duration = Duration::from_millis(25);

/// Governor tuning
#[derive(Debug, Clone)]
pub struct GovernorConfig {
    /// Minimum interval between requests to one host
    pub base_delay: Duration,

    /// Jitter ceiling for the interval
    pub max_delay: Duration,

    /// Global in-flight ceiling across all hosts
    pub concurrent_requests: usize,

    /// In-flight ceiling for a single host
    pub per_host_limit: u32,
}

/// Answer to an admission request
#[derive(Debug)]
pub enum Admission {
    /// The request may start now
    Permit(GovernorPermit),

    /// Ask again after this long
    Wait(Duration),
}

/// Per-host bookkeeping
#[derive(Debug)]
struct HostSlot {
    /// Serializes waiters for this host in arrival order
    gate: tokio::sync::Mutex<()>,
    state: Mutex<HostState>,
    /// Signalled whenever a request to this host completes
    freed: Notify,
}

impl HostSlot {
    fn new() -> Self {
        Self {
            gate: tokio::sync::Mutex::new(()),
            state: Mutex::new(HostState::new()),
            freed: Notify::new(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Why a host cannot be admitted right now
enum Blocked {
    Pacing(Duration),
    HostBusy,
}

/// Admission to fetch one URL
///
/// Holds a global concurrency slot and a host slot. Dropping the permit
/// releases both and stamps the host's completion time; use
/// [`RateGovernor::release`] to also report whether the request succeeded.
#[derive(Debug)]
pub struct GovernorPermit {
    slot: Arc<HostSlot>,
    host: String,
    admitted_at: Instant,
    success: bool,
    _global: OwnedSemaphorePermit,
}

impl GovernorPermit {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// When the governor admitted this request
    pub fn admitted_at(&self) -> Instant {
        self.admitted_at
    }
}

impl Drop for GovernorPermit {
    fn drop(&mut self) {
        self.slot
            .lock_state()
            .record_completion(Instant::now(), self.success);
        self.slot.freed.notify_one();
    }
}

/// Per-host pacing and global concurrency gate
#[derive(Debug)]
pub struct RateGovernor {
    config: GovernorConfig,
    global: Arc<Semaphore>,
    hosts: Mutex<HashMap<String, Arc<HostSlot>>>,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        let global = Arc::new(Semaphore::new(config.concurrent_requests.max(1)));
        Self {
            config,
            global,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the slot for a host, creating it on first use
    fn slot(&self, host: &str) -> Arc<HostSlot> {
        let mut hosts = self.hosts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(
            hosts
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(HostSlot::new())),
        )
    }

    /// Raises a host's pacing floor to its robots.txt crawl-delay
    pub fn set_crawl_delay(&self, host: &str, delay: Option<Duration>) {
        self.slot(host).lock_state().crawl_delay = delay;
    }

    /// Returns a copy of a host's state, if the host has been seen
    pub fn host_state(&self, host: &str) -> Option<HostState> {
        let hosts = self.hosts.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        hosts.get(host).map(|slot| slot.lock_state().clone())
    }

    /// Number of global slots currently free
    pub fn available_slots(&self) -> usize {
        self.global.available_permits()
    }

    /// Requests admission without waiting
    ///
    /// # Returns
    ///
    /// * `Admission::Permit` - The pacing floor has elapsed and both a host and
    ///   a global slot are free
    /// * `Admission::Wait(d)` - Ask again after `d`; waiters queued through
    ///   [`RateGovernor::acquire`] always go first
    pub fn admit(&self, host: &str) -> Admission {
        let slot = self.slot(host);
        let Ok(_turn) = slot.gate.try_lock() else {
            return Admission::Wait(BUSY_RETRY);
        };

        let now = Instant::now();
        match self.check_host(&slot, now) {
            Some(Blocked::Pacing(wait)) => return Admission::Wait(wait),
            Some(Blocked::HostBusy) => return Admission::Wait(BUSY_RETRY),
            None => {}
        }

        match Arc::clone(&self.global).try_acquire_owned() {
            Ok(global) => match self.try_grant(&slot, host, global) {
                Ok(permit) => Admission::Permit(permit),
                Err(_) => Admission::Wait(BUSY_RETRY),
            },
            Err(_) => Admission::Wait(BUSY_RETRY),
        }
    }

    /// Waits for admission to `host`
    ///
    /// Callers for the same host are served in arrival order. Returns `None`
    /// if `cancel` fires first, including when it is already cancelled and a
    /// slot happens to be free.
    pub async fn acquire(&self, host: &str, cancel: &CancellationToken) -> Option<GovernorPermit> {
        let slot = self.slot(host);

        let _turn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            turn = slot.gate.lock() => turn,
        };

        loop {
            // Register interest before checking so a completion in between is not lost
            let freed = slot.freed.notified();

            match self.check_host(&slot, Instant::now()) {
                Some(Blocked::Pacing(wait)) => {
                    tracing::trace!(host, wait_ms = wait.as_millis() as u64, "Pacing host");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(wait) => continue,
                    }
                }
                Some(Blocked::HostBusy) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return None,
                        _ = freed => continue,
                    }
                }
                None => {}
            }

            let global = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                permit = Arc::clone(&self.global).acquire_owned() => permit.ok()?,
            };

            // A completion may have moved the pacing reference while we waited
            if let Ok(permit) = self.try_grant(&slot, host, global) {
                return Some(permit);
            }
        }
    }

    /// Releases a permit, recording whether the request succeeded
    pub fn release(&self, mut permit: GovernorPermit, success: bool) {
        permit.success = success;
        drop(permit);
    }

    fn check_host(&self, slot: &HostSlot, now: Instant) -> Option<Blocked> {
        let state = slot.lock_state();
        if let Some(wait) = state.time_until_next_request(now) {
            return Some(Blocked::Pacing(wait));
        }
        if state.in_flight_count >= self.config.per_host_limit {
            return Some(Blocked::HostBusy);
        }
        None
    }

    /// Re-checks the host under its lock and stamps the admission
    ///
    /// On failure the global slot is returned to the semaphore.
    fn try_grant(
        &self,
        slot: &Arc<HostSlot>,
        host: &str,
        global: OwnedSemaphorePermit,
    ) -> Result<GovernorPermit, ()> {
        let now = Instant::now();
        let mut state = slot.lock_state();

        if !state.can_request(self.config.per_host_limit, now) {
            return Err(());
        }

        let gap = self.next_gap(&state);
        state.record_admission(now, gap);
        drop(state);

        tracing::trace!(host, gap_ms = gap.as_millis() as u64, "Admitted request");

        Ok(GovernorPermit {
            slot: Arc::clone(slot),
            host: host.to_string(),
            admitted_at: now,
            success: false,
            _global: global,
        })
    }

    /// Picks the interval to reserve after this admission
    fn next_gap(&self, state: &HostState) -> Duration {
        let floor = state.pacing_floor(self.config.base_delay);
        let spread = self.config.max_delay.saturating_sub(floor);
        if spread.is_zero() {
            return floor;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=spread.as_millis() as u64);
        floor + Duration::from_millis(jitter_ms)
    }
}
