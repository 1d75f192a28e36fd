//! Proxy / session pool
//!
//! Rotates requests across a configured list of egress proxies and keeps
//! failing ones out of rotation for a growing cooldown. With no proxies
//! configured every acquisition yields [`Identity::Direct`].

mod pool;

pub use pool::{ProxyPool, ProxyPoolConfig, ProxyStats};

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// A proxy handed out by the pool for one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyLease {
    pub(crate) index: usize,
    pub address: String,
}

/// Network identity used for one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// The default network path; no proxy
    Direct,

    /// A proxy from the pool
    Proxy(ProxyLease),
}

impl Identity {
    /// Returns the proxy address, or `None` for the direct path
    pub fn proxy_address(&self) -> Option<&str> {
        match self {
            Identity::Direct => None,
            Identity::Proxy(lease) => Some(&lease.address),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Direct => write!(f, "direct"),
            Identity::Proxy(lease) => write!(f, "{}", lease.address),
        }
    }
}

/// Every proxy in the pool is cooling down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("all proxies are cooling down; next one frees up in {retry_after:?}")]
pub struct ProxyUnavailable {
    /// Time until the first entry leaves cooldown
    pub retry_after: Duration,
}
