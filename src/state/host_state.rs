use std::time::{Duration, Instant};

/// Tracks the pacing state of one host during a run
///
/// One instance exists per distinct host key, created lazily on the first
/// admission request for that host and kept until the run ends. Pacing is
/// tracked per host regardless of which proxy carries the request.
#[derive(Debug, Clone)]
pub struct HostState {
    /// Later of the last admission and the last completion for this host
    pub last_request_time: Option<Instant>,

    /// Gap that must elapse after `last_request_time` before the next admission
    pub required_gap: Duration,

    /// Requests currently admitted and not yet released
    pub in_flight_count: u32,

    /// Failures since the last success on this host
    pub consecutive_failure_count: u32,

    /// Total admissions for this host in the current run
    pub request_count: u32,

    /// Crawl-delay advertised by the host's robots.txt
    pub crawl_delay: Option<Duration>,
}

impl HostState {
    /// Creates a new HostState with no history
    pub fn new() -> Self {
        Self {
            last_request_time: None,
            required_gap: Duration::ZERO,
            in_flight_count: 0,
            consecutive_failure_count: 0,
            request_count: 0,
            crawl_delay: None,
        }
    }

    /// Checks if a request can be admitted to this host
    ///
    /// # Arguments
    ///
    /// * `per_host_limit` - Maximum simultaneous requests to one host
    /// * `now` - The current time instant
    ///
    /// # Returns
    ///
    /// * `true` - If the pacing floor has elapsed and a host slot is free
    /// * `false` - If the request must wait
    pub fn can_request(&self, per_host_limit: u32, now: Instant) -> bool {
        self.in_flight_count < per_host_limit && self.time_until_next_request(now).is_none()
    }

    /// Calculates the time until the pacing floor allows another request
    ///
    /// Returns None if a request can be made now.
    pub fn time_until_next_request(&self, now: Instant) -> Option<Duration> {
        let last = self.last_request_time?;
        let ready_at = last + self.required_gap;
        if now < ready_at {
            Some(ready_at - now)
        } else {
            None
        }
    }

    /// Records an admission and reserves the gap before the next one
    pub fn record_admission(&mut self, now: Instant, gap: Duration) {
        self.request_count += 1;
        self.in_flight_count += 1;
        self.last_request_time = Some(now);
        self.required_gap = gap;
    }

    /// Records that an admitted request finished
    ///
    /// The completion time becomes the new pacing reference, so a slow
    /// response pushes the next admission back instead of letting it burst.
    pub fn record_completion(&mut self, now: Instant, success: bool) {
        self.in_flight_count = self.in_flight_count.saturating_sub(1);
        self.last_request_time = Some(match self.last_request_time {
            Some(last) if last > now => last,
            _ => now,
        });

        if success {
            self.consecutive_failure_count = 0;
        } else {
            self.consecutive_failure_count += 1;
        }
    }

    /// Returns the effective minimum interval for this host
    pub fn pacing_floor(&self, base_delay: Duration) -> Duration {
        match self.crawl_delay {
            Some(delay) if delay > base_delay => delay,
            _ => base_delay,
        }
    }
}

impl Default for HostState {
    fn default() -> Self {
        Self::new()
    }
}
