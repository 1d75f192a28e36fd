use crate::proxy::{Identity, ProxyLease, ProxyUnavailable};
use crate::state::FetchOutcome;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Pool tuning
#[derive(Debug, Clone)]
pub struct ProxyPoolConfig {
    /// Consecutive failures before an entry is cooled down
    pub failure_threshold: u32,

    /// Length of the first cooldown
    pub cooldown: Duration,

    /// Upper bound for repeated, doubled cooldowns
    pub max_cooldown: Duration,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(600),
        }
    }
}

/// Health record for one proxy
///
/// Entries are never removed; a failing entry is only cooled down.
#[derive(Debug, Clone)]
struct ProxyEntry {
    address: String,
    is_healthy: bool,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
    cooldowns_served: u32,
    successes: u64,
    failures: u64,
}

impl ProxyEntry {
    fn new(address: String) -> Self {
        Self {
            address,
            is_healthy: true,
            consecutive_failures: 0,
            cooldown_until: None,
            cooldowns_served: 0,
            successes: 0,
            failures: 0,
        }
    }

    fn is_available(&self, now: Instant) -> bool {
        self.cooldown_until.map_or(true, |until| now >= until)
    }

    fn remaining_cooldown(&self, now: Instant) -> Duration {
        self.cooldown_until
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(now))
    }
}

/// Snapshot of one entry for the run summary
#[derive(Debug, Clone, Serialize)]
pub struct ProxyStats {
    pub address: String,
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub successes: u64,
    pub failures: u64,
    /// Remaining cooldown, if the entry is out of rotation
    pub cooling_for: Option<Duration>,
}

#[derive(Debug)]
struct PoolInner {
    entries: Vec<ProxyEntry>,
    cursor: usize,
}

/// Round-robin proxy pool with per-entry cooldown
#[derive(Debug)]
pub struct ProxyPool {
    config: ProxyPoolConfig,
    inner: Mutex<PoolInner>,
}

impl ProxyPool {
    /// Creates a pool over the given proxy addresses
    ///
    /// An empty list produces a pool that always yields the direct identity.
    pub fn new(addresses: &[String], config: ProxyPoolConfig) -> Self {
        let entries = addresses.iter().cloned().map(ProxyEntry::new).collect();
        Self {
            config,
            inner: Mutex::new(PoolInner { entries, cursor: 0 }),
        }
    }

    /// Creates a pool with no proxies
    pub fn direct() -> Self {
        Self::new(&[], ProxyPoolConfig::default())
    }

    /// Returns true if the pool rotates through proxies
    pub fn is_enabled(&self) -> bool {
        !self.lock_inner().entries.is_empty()
    }

    fn lock_inner(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned proxy pool mutex");
            poisoned.into_inner()
        })
    }

    /// Picks the identity for the next attempt
    ///
    /// # Returns
    ///
    /// * `Ok(Identity::Direct)` - No proxies are configured
    /// * `Ok(Identity::Proxy(_))` - The next entry not in cooldown, round-robin
    /// * `Err(ProxyUnavailable)` - Every entry is cooling down
    pub fn acquire(&self) -> Result<Identity, ProxyUnavailable> {
        self.acquire_at(Instant::now())
    }

    fn acquire_at(&self, now: Instant) -> Result<Identity, ProxyUnavailable> {
        let mut inner = self.lock_inner();
        let count = inner.entries.len();
        if count == 0 {
            return Ok(Identity::Direct);
        }

        for offset in 0..count {
            let index = (inner.cursor + offset) % count;
            if inner.entries[index].is_available(now) {
                inner.cursor = (index + 1) % count;
                return Ok(Identity::Proxy(ProxyLease {
                    index,
                    address: inner.entries[index].address.clone(),
                }));
            }
        }

        let retry_after = inner
            .entries
            .iter()
            .map(|e| e.remaining_cooldown(now))
            .min()
            .unwrap_or(self.config.cooldown);

        Err(ProxyUnavailable { retry_after })
    }

    /// Reports the outcome of an attempt made through `identity`
    ///
    /// Timeouts, connection and proxy errors, and 429 responses count against
    /// the proxy. Any other response from the target counts as success for
    /// the proxy, even when the page itself failed. Direct identities are
    /// not tracked.
    pub fn release(&self, identity: &Identity, outcome: &FetchOutcome) {
        let proxy_failed = outcome.reason().is_some_and(|r| r.blames_identity());
        self.release_at(identity, !proxy_failed, Instant::now());
    }

    fn release_at(&self, identity: &Identity, success: bool, now: Instant) {
        let Identity::Proxy(lease) = identity else {
            return;
        };

        let mut inner = self.lock_inner();
        let Some(entry) = inner.entries.get_mut(lease.index) else {
            return;
        };

        if success {
            entry.successes += 1;
            entry.consecutive_failures = 0;
            entry.cooldowns_served = 0;
            entry.cooldown_until = None;
            if !entry.is_healthy {
                tracing::info!(proxy = %entry.address, "Proxy recovered");
            }
            entry.is_healthy = true;
            return;
        }

        entry.failures += 1;
        entry.consecutive_failures += 1;

        if entry.consecutive_failures >= self.config.failure_threshold {
            let cooldown = cooldown_for(&self.config, entry.cooldowns_served);
            entry.cooldown_until = Some(now + cooldown);
            entry.cooldowns_served = entry.cooldowns_served.saturating_add(1);
            entry.is_healthy = false;

            tracing::warn!(
                proxy = %entry.address,
                failures = entry.consecutive_failures,
                cooldown_ms = cooldown.as_millis() as u64,
                "Proxy cooled down"
            );
        }
    }

    /// Returns per-entry statistics
    pub fn snapshot(&self) -> Vec<ProxyStats> {
        let now = Instant::now();
        self.lock_inner()
            .entries
            .iter()
            .map(|e| ProxyStats {
                address: e.address.clone(),
                is_healthy: e.is_healthy,
                consecutive_failures: e.consecutive_failures,
                successes: e.successes,
                failures: e.failures,
                cooling_for: (!e.is_available(now)).then(|| e.remaining_cooldown(now)),
            })
            .collect()
    }
}

/// Cooldown for the next time an entry is taken out of rotation
///
/// Doubles for every cooldown already served since the last success.
fn cooldown_for(config: &ProxyPoolConfig, served: u32) -> Duration {
    let factor = 2u32.saturating_pow(served.min(16));
    config
        .cooldown
        .saturating_mul(factor)
        .min(config.max_cooldown)
}
