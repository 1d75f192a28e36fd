//! Per-host robots.txt cache
//!
//! Each host's policy is fetched on first use and kept for the rest of the
//! run. Concurrent first lookups for the same host may fetch twice; the
//! first policy written is the one that stays.

use crate::robots::ParsedRobots;
use crate::url::{host_key, robots_url};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

/// Robots policy cache shared by every worker of a run
pub struct RobotsCache {
    client: Client,
    enabled: bool,
    entries: RwLock<HashMap<String, Arc<ParsedRobots>>>,
}

impl RobotsCache {
    /// Creates a cache that fetches with the given client
    ///
    /// # Arguments
    ///
    /// * `client` - HTTP client used for robots.txt requests (direct, no proxy)
    /// * `enabled` - When false every lookup short-circuits to "allowed"
    pub fn new(client: Client, enabled: bool) -> Self {
        Self {
            client,
            enabled,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns true if robots.txt is being enforced
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Checks if `url` may be fetched by `user_agent`
    pub async fn is_allowed(&self, url: &Url, user_agent: &str) -> bool {
        if !self.enabled {
            return true;
        }
        self.policy(url).await.is_allowed(url.as_str(), user_agent)
    }

    /// Returns the crawl delay the host asks of `user_agent`
    pub async fn crawl_delay(&self, url: &Url, user_agent: &str) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        self.policy(url).await.crawl_delay(user_agent)
    }

    /// Returns the cached policy for the URL's host, fetching it on first use
    pub async fn policy(&self, url: &Url) -> Arc<ParsedRobots> {
        let Some(key) = host_key(url) else {
            return Arc::new(ParsedRobots::allow_all());
        };

        if let Some(policy) = self.entries.read().await.get(&key) {
            return Arc::clone(policy);
        }

        let fetched = Arc::new(self.fetch(url).await);

        let mut entries = self.entries.write().await;
        Arc::clone(entries.entry(key).or_insert(fetched))
    }

    /// Number of hosts with a cached policy
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Fetches and parses robots.txt for the URL's host
    ///
    /// Never fails: a missing file (4xx) means allow-all, and server errors or
    /// network failures are logged and also treated as allow-all.
    async fn fetch(&self, url: &Url) -> ParsedRobots {
        let Some(target) = robots_url(url) else {
            return ParsedRobots::allow_all();
        };

        tracing::debug!(url = %target, "Fetching robots.txt");

        let response = match self.client.get(target.clone()).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url = %target, error = %e, "robots.txt unreachable, allowing all");
                return ParsedRobots::allow_all();
            }
        };

        let status = response.status();
        if status.is_success() {
            match response.text().await {
                Ok(body) => ParsedRobots::from_content(&body),
                Err(e) => {
                    tracing::warn!(url = %target, error = %e, "robots.txt body unreadable, allowing all");
                    ParsedRobots::allow_all()
                }
            }
        } else if status.is_client_error() {
            tracing::debug!(url = %target, status = status.as_u16(), "No robots.txt, allowing all");
            ParsedRobots::allow_all()
        } else {
            tracing::warn!(
                url = %target,
                status = status.as_u16(),
                "robots.txt fetch failed, allowing all"
            );
            ParsedRobots::allow_all()
        }
    }
}
