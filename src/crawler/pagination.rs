//! Pagination driver
//!
//! Tracks one state machine per lineage (see [`SequenceState`]) and decides,
//! after each successfully extracted page, whether a follow-on task should
//! be created. Failures of a next page are not retried here; the child task
//! goes through the normal retry path like any other.

use crate::config::PaginationConfig;
use crate::state::{FetchTask, SequenceState};
use crate::url::{host_key, normalize_url};
use crate::ConfigError;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use url::Url;

/// Markup commonly used for "next page" links
const NEXT_LINK_PATTERNS: &[&str] = &[
    "a[rel='next']",
    "link[rel='next']",
    "a.next",
    "a.pagination-next",
    "a[aria-label*='next' i]",
    "a[title*='next' i]",
];

/// How the next page of a lineage is found
#[derive(Debug, Clone)]
pub enum NextPageRule {
    /// Follow the first element matching any of these selectors
    LinkSelector(Vec<Selector>),

    /// Increment a query parameter while pages keep yielding content
    QueryParam { param: String, start: u32 },
}

impl NextPageRule {
    /// Builds the rule described by the pagination settings
    pub fn from_config(config: &PaginationConfig) -> Result<Self, ConfigError> {
        if let Some(param) = &config.page_param {
            return Ok(NextPageRule::QueryParam {
                param: param.clone(),
                start: config.start_page,
            });
        }

        match &config.next_selector {
            Some(selector) => {
                let selector =
                    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
                        field: "pagination.next-selector".to_string(),
                        message: e.to_string(),
                    })?;
                Ok(NextPageRule::LinkSelector(vec![selector]))
            }
            None => Ok(NextPageRule::LinkSelector(
                NEXT_LINK_PATTERNS
                    .iter()
                    .filter_map(|pattern| Selector::parse(pattern).ok())
                    .collect(),
            )),
        }
    }

    /// Finds the next page's URL for a fetched page
    ///
    /// # Arguments
    ///
    /// * `document` - The fetched HTML
    /// * `page_url` - URL the document was served from; relative links resolve against it
    /// * `has_content` - Whether extraction produced any field values
    pub fn next_url(&self, document: &str, page_url: &Url, has_content: bool) -> Option<Url> {
        match self {
            NextPageRule::LinkSelector(selectors) => {
                let html = Html::parse_document(document);
                let href = selectors.iter().find_map(|selector| {
                    html.select(selector)
                        .filter_map(|el| el.value().attr("href"))
                        .map(str::trim)
                        .find(|href| !href.is_empty() && !href.starts_with('#'))
                        .map(str::to_string)
                })?;
                let joined = page_url.join(&href).ok()?;
                normalize_url(joined.as_str()).ok()
            }
            NextPageRule::QueryParam { param, start } => {
                if !has_content {
                    return None;
                }
                let current = page_url
                    .query_pairs()
                    .find(|(key, _)| key == param.as_str())
                    .and_then(|(_, value)| value.parse::<u32>().ok())
                    .unwrap_or(*start);

                let mut pairs: Vec<(String, String)> = page_url
                    .query_pairs()
                    .filter(|(key, _)| key != param.as_str())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                pairs.push((param.clone(), current.checked_add(1)?.to_string()));

                let mut next = page_url.clone();
                next.query_pairs_mut().clear().extend_pairs(pairs);
                normalize_url(next.as_str()).ok()
            }
        }
    }
}

/// Progress of one lineage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageReport {
    pub id: usize,
    pub seed: Url,
    pub state: SequenceState,
    /// Fetch tasks created for this lineage, the seed included
    pub pages: u32,
}

/// Per-lineage pagination state machine
#[derive(Debug)]
pub struct PaginationDriver {
    rule: Option<NextPageRule>,
    max_pages: u32,
    lineages: Mutex<BTreeMap<usize, LineageReport>>,
}

impl PaginationDriver {
    /// Creates a driver; `rule = None` makes every lineage a single page
    pub fn new(rule: Option<NextPageRule>, max_pages: u32) -> Self {
        Self {
            rule,
            max_pages: max_pages.max(1),
            lineages: Mutex::new(BTreeMap::new()),
        }
    }

    /// Builds the driver from optional pagination settings
    pub fn from_config(config: Option<&PaginationConfig>) -> Result<Self, ConfigError> {
        match config {
            Some(config) => Ok(Self::new(
                Some(NextPageRule::from_config(config)?),
                config.max_pages,
            )),
            None => Ok(Self::new(None, 1)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<usize, LineageReport>> {
        self.lineages.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers the seed task of a new lineage
    pub fn start_lineage(&self, task: &FetchTask) {
        self.lock().insert(
            task.lineage,
            LineageReport {
                id: task.lineage,
                seed: task.url.clone(),
                state: SequenceState::Fetching,
                pages: 1,
            },
        );
    }

    fn transition(&self, lineage: usize, next: SequenceState) {
        let mut lineages = self.lock();
        if let Some(report) = lineages.get_mut(&lineage) {
            if report.state.can_transition_to(next) {
                report.state = next;
            } else {
                tracing::trace!(lineage, from = %report.state, to = %next, "Ignored lineage transition");
            }
        }
    }

    /// Decides what follows a successfully extracted page
    ///
    /// Returns the next task when the rule finds a target and the lineage is
    /// below `max_pages`; the lineage is then `NextFound` until the caller
    /// reports whether it was enqueued. Otherwise the lineage is `Exhausted`.
    pub fn on_extracted(
        &self,
        task: &FetchTask,
        document: &str,
        page_url: &Url,
        has_content: bool,
    ) -> Option<FetchTask> {
        self.transition(task.lineage, SequenceState::Extracted);

        let next = self
            .rule
            .as_ref()
            .filter(|_| task.depth + 1 < self.max_pages)
            .and_then(|rule| rule.next_url(document, page_url, has_content))
            .and_then(|url| {
                let host = host_key(&url)?;
                Some(task.next_page(url, host))
            });

        match &next {
            Some(child) => {
                tracing::debug!(lineage = task.lineage, next = %child.url, depth = child.depth, "Next page found");
                self.transition(task.lineage, SequenceState::NextFound);
            }
            None => self.exhaust(task.lineage),
        }
        next
    }

    /// The next page was enqueued
    pub fn next_enqueued(&self, child: &FetchTask) {
        let mut lineages = self.lock();
        if let Some(report) = lineages.get_mut(&child.lineage) {
            if report.state.can_transition_to(SequenceState::Fetching) {
                report.state = SequenceState::Fetching;
                report.pages += 1;
            }
        }
    }

    /// The lineage ends here (no next page, already seen, cap, or failure)
    pub fn exhaust(&self, lineage: usize) {
        let mut lineages = self.lock();
        if let Some(report) = lineages.get_mut(&lineage) {
            report.state = SequenceState::Exhausted;
        }
    }

    /// Returns every lineage in seed order
    pub fn lineages(&self) -> Vec<LineageReport> {
        self.lock().values().cloned().collect()
    }
}
