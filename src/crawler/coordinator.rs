//! Scrape orchestrator - main run loop
//!
//! Accepts seeds as a batch or a stream and drives every task through the
//! pipeline:
//! - Robots policy check (disallowed tasks are skipped)
//! - Rate governor admission and proxy selection, per attempt
//! - Fetch attempts under the retry coordinator
//! - Extraction, dedup into the record sink, pagination follow-ups
//!
//! A fixed pool of workers shares one priority queue. The run ends when the
//! queue is empty, no task is in flight and the seed stream is closed, or
//! when the run is cancelled.

use crate::config::Config;
use crate::crawler::fetcher::{FetchExecutor, FetchMode, Renderer, WaitRule};
use crate::crawler::governor::{GovernorConfig, RateGovernor};
use crate::crawler::http::{build_http_client, HttpRenderer};
use crate::crawler::pagination::{LineageReport, PaginationDriver};
use crate::crawler::queue::WorkQueue;
use crate::crawler::retry::{AttemptReport, RetryCoordinator, RetryPolicy};
use crate::crawler::sitemap::collect_sitemap_urls;
use crate::crawler::CaptchaSolver;
use crate::extract::{
    compile_rules, Extractor, FieldRule, Record, SelectorExtractor, TransformRegistry,
};
use crate::output::{DedupSink, ExportError, ExportFormat, RecordSink, RunStats, StatsSnapshot};
use crate::proxy::{ProxyPool, ProxyPoolConfig, ProxyStats};
use crate::robots::RobotsCache;
use crate::state::{FailureReason, FetchOutcome, FetchTask, FetchedPage};
use crate::url::{host_key, normalize_url};
use crate::KumoError;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Seeds buffered between the seed producer and the admission loop
const SEED_BUFFER: usize = 256;

/// Final result of a run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stats: StatsSnapshot,

    #[serde(skip)]
    pub lineages: Vec<LineageReport>,

    pub proxies: Vec<ProxyStats>,
}

/// URLs admitted so far and the lineage counter
#[derive(Debug, Default)]
struct Admissions {
    seen: HashSet<String>,
    admitted: usize,
    next_lineage: usize,
}

enum AdmitResult {
    Admitted,
    AlreadySeen,
    LimitReached,
}

/// State shared by every worker
struct Shared {
    config: Config,
    mode: FetchMode,
    user_agent: String,
    robots_agent: String,
    rules: Vec<FieldRule>,
    queue: WorkQueue,
    governor: RateGovernor,
    /// Direct client for robots.txt and sitemaps
    client: Client,
    robots: RobotsCache,
    proxies: ProxyPool,
    executor: FetchExecutor,
    retry: RetryCoordinator,
    pagination: PaginationDriver,
    extractor: Arc<dyn Extractor>,
    sink: Mutex<Box<dyn RecordSink>>,
    stats: Arc<RunStats>,
    admissions: Mutex<Admissions>,
    cancel: CancellationToken,
}

/// Builder for an [`Orchestrator`]
///
/// Every collaborator has a default derived from the configuration; tests
/// and embedders can swap any of them.
pub struct OrchestratorBuilder {
    config: Config,
    renderer: Option<Arc<dyn Renderer>>,
    browser: Option<Arc<dyn Renderer>>,
    captcha_solver: Option<Arc<dyn CaptchaSolver>>,
    extractor: Option<Arc<dyn Extractor>>,
    sink: Option<Box<dyn RecordSink>>,
    transforms: TransformRegistry,
    cancel: Option<CancellationToken>,
}

impl OrchestratorBuilder {
    /// Replaces the plain HTTP renderer
    pub fn renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Replaces the browser renderer used in `browser` mode
    pub fn browser_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.browser = Some(renderer);
        self
    }

    pub fn captcha_solver(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
        self.captcha_solver = Some(solver);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn sink(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replaces the transform registry field rules are compiled against
    pub fn transforms(mut self, transforms: TransformRegistry) -> Self {
        self.transforms = transforms;
        self
    }

    /// Uses an existing token, so a caller can cancel the run from
    /// anywhere, including from inside a collaborator
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Validates the configuration and wires every component
    ///
    /// # Returns
    ///
    /// * `Ok(Orchestrator)` - Ready to run
    /// * `Err(KumoError)` - Invalid configuration or HTTP client setup failure
    pub fn build(self) -> Result<Orchestrator, KumoError> {
        let config = self.config;
        crate::config::validate_with_transforms(&config, &self.transforms)?;

        let rules = compile_rules(&config.fields, &self.transforms)?;
        let pagination = PaginationDriver::from_config(config.pagination.as_ref())?;

        let scraper = &config.scraper;
        let user_agent = config.politeness.user_agent.clone();
        let robots_agent = config.politeness.robots_agent().to_string();

        let client = build_http_client(&user_agent, scraper.timeout(), None)?;
        let robots = RobotsCache::new(client.clone(), config.politeness.respect_robots_txt);

        let governor = RateGovernor::new(GovernorConfig {
            base_delay: scraper.base_delay(),
            max_delay: scraper.max_delay(),
            concurrent_requests: scraper.concurrent_requests as usize,
            per_host_limit: scraper.per_host_concurrency,
        });

        let proxies = ProxyPool::new(
            config.proxy.active_proxies(),
            ProxyPoolConfig {
                failure_threshold: config.proxy.failure_threshold,
                cooldown: config.proxy.cooldown(),
                max_cooldown: config.proxy.max_cooldown(),
            },
        );

        let plain: Arc<dyn Renderer> = match self.renderer {
            Some(renderer) => renderer,
            None => Arc::new(HttpRenderer::new(user_agent.clone(), scraper.timeout())),
        };
        let mut executor = FetchExecutor::new(plain, scraper.timeout())
            .with_allowed_statuses(scraper.allowed_statuses.clone());

        if scraper.mode == FetchMode::Browser {
            let browser = match self.browser {
                Some(browser) => browser,
                None => default_browser(&config, &user_agent)?,
            };
            let wait = WaitRule {
                selector: config.browser.wait_for_selector.clone(),
                settle: config.browser.wait(),
            };
            executor = executor.with_browser(browser, wait);
        }
        if let Some(solver) = self.captcha_solver {
            executor = executor.with_captcha_solver(solver);
        }

        let stats = Arc::new(RunStats::new());
        let cancel = self.cancel.unwrap_or_default();
        let retry = RetryCoordinator::new(
            RetryPolicy {
                max_retries: scraper.max_retries,
                base_delay: scraper.base_delay(),
                max_delay: scraper.max_delay(),
            },
            Arc::clone(&stats),
            cancel.clone(),
        );

        let sink: Box<dyn RecordSink> = match self.sink {
            Some(sink) => sink,
            None => Box::new(DedupSink::new(
                config.output.directory.clone(),
                config.output.file_stem.clone(),
                config.output.deduplicate,
            )),
        };
        let extractor: Arc<dyn Extractor> = match self.extractor {
            Some(extractor) => extractor,
            None => Arc::new(SelectorExtractor),
        };

        Ok(Orchestrator {
            shared: Arc::new(Shared {
                mode: scraper.mode,
                user_agent,
                robots_agent,
                rules,
                queue: WorkQueue::new(),
                governor,
                client,
                robots,
                proxies,
                executor,
                retry,
                pagination,
                extractor,
                sink: Mutex::new(sink),
                stats,
                admissions: Mutex::new(Admissions::default()),
                cancel,
                config,
            }),
        })
    }
}

#[cfg(feature = "browser")]
fn default_browser(config: &Config, user_agent: &str) -> Result<Arc<dyn Renderer>, KumoError> {
    let renderer: Arc<dyn Renderer> = Arc::new(crate::crawler::BrowserRenderer::new(
        config.browser.headless,
        user_agent,
        config.scraper.timeout(),
    ));
    Ok(renderer)
}

#[cfg(not(feature = "browser"))]
fn default_browser(_config: &Config, _user_agent: &str) -> Result<Arc<dyn Renderer>, KumoError> {
    Err(crate::ConfigError::Validation(
        "scraper.mode = \"browser\" requires building with the `browser` feature".to_string(),
    )
    .into())
}

/// Drives one scraping run
///
/// An orchestrator is single-use: its statistics, queue and seen-URL set
/// belong to one run.
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    /// Creates an orchestrator with the default collaborators
    pub fn new(config: Config) -> Result<Self, KumoError> {
        Self::builder(config).build()
    }

    pub fn builder(config: Config) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            renderer: None,
            browser: None,
            captcha_solver: None,
            extractor: None,
            sink: None,
            transforms: TransformRegistry::builtin(),
            cancel: None,
        }
    }

    /// Token that cancels the run when triggered
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Cancels the run: queued tasks are discarded, backoff waits end, and
    /// requests already issued finish
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    /// Live statistics
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn proxy_stats(&self) -> Vec<ProxyStats> {
        self.shared.proxies.snapshot()
    }

    pub fn lineages(&self) -> Vec<LineageReport> {
        self.shared.pagination.lineages()
    }

    /// Runs the configured seeds plus `extra_seeds` to completion
    ///
    /// Pages listed in the configured sitemaps are streamed in after the
    /// seeds, while the first fetches are already under way.
    pub async fn run(&self, extra_seeds: Vec<String>) -> RunReport {
        let shared = &self.shared;
        let seeds: Vec<String> = shared
            .config
            .seeds
            .iter()
            .cloned()
            .chain(extra_seeds)
            .collect();

        let (tx, rx) = mpsc::channel(SEED_BUFFER);
        let producer = async move {
            let mut pending = seeds.into_iter();
            while let Some(seed) = pending.next() {
                if tx.send(seed).await.is_err() {
                    // The run stopped taking seeds
                    shared.stats.record_discarded(1 + pending.len() as u64);
                    return;
                }
            }

            if shared.config.sitemaps.is_empty() {
                return;
            }
            let pages =
                collect_sitemap_urls(&shared.client, &shared.config.sitemaps, &shared.cancel).await;
            let mut pending = pages.into_iter();
            while let Some(page) = pending.next() {
                if tx.send(page).await.is_err() {
                    shared.stats.record_discarded(1 + pending.len() as u64);
                    return;
                }
            }
        };

        let ((), report) = tokio::join!(producer, self.run_stream(rx));

        // The producer may count unsent seeds after the stream loop stopped
        RunReport {
            stats: shared.stats.snapshot(),
            ..report
        }
    }

    /// Runs until the seed stream closes and all admitted work is finished
    ///
    /// Seeds are admitted while workers are already fetching. Configured
    /// seeds are not read here; use [`Orchestrator::run`] for those.
    pub async fn run_stream(&self, mut seeds: mpsc::Receiver<String>) -> RunReport {
        let shared = &self.shared;
        let workers = shared.config.scraper.concurrent_requests.max(1);

        tracing::info!(
            workers,
            mode = ?shared.mode,
            proxies = shared.proxies.snapshot().len(),
            user_agent = %shared.user_agent,
            "Starting run"
        );

        let mut pool = JoinSet::new();
        for id in 0..workers {
            let shared = Arc::clone(shared);
            pool.spawn(async move { shared.work(id).await });
        }

        loop {
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => break,
                seed = seeds.recv() => match seed {
                    Some(seed) => shared.admit_seed(&seed),
                    None => break,
                },
            }
        }
        shared.queue.close_producers();

        // Seeds still buffered in the channel were never admitted
        seeds.close();
        let mut unread = 0u64;
        while seeds.try_recv().is_ok() {
            unread += 1;
        }
        if unread > 0 {
            shared.stats.record_discarded(unread);
            tracing::debug!(unread, "Discarded seeds left in the stream");
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker panicked");
            }
        }

        if shared.cancel.is_cancelled() {
            let discarded = shared.queue.close();
            shared.stats.record_discarded(discarded as u64);
            tracing::warn!(discarded, "Run cancelled");
        }

        let report = RunReport {
            stats: shared.stats.snapshot(),
            lineages: shared.pagination.lineages(),
            proxies: shared.proxies.snapshot(),
        };

        tracing::info!(
            attempted = report.stats.attempted,
            succeeded = report.stats.succeeded,
            failed = report.stats.failed,
            records = report.stats.records,
            "Run finished"
        );

        report
    }

    /// Writes accumulated records in the configured formats
    pub fn flush(&self) -> Result<Vec<PathBuf>, ExportError> {
        self.flush_as(&self.shared.config.output.formats)
    }

    pub fn flush_as(&self, formats: &[ExportFormat]) -> Result<Vec<PathBuf>, ExportError> {
        self.shared.lock_sink().flush(formats)
    }

    /// Number of records held by the sink
    pub fn record_count(&self) -> usize {
        self.shared.lock_sink().len()
    }
}

impl Shared {
    fn lock_sink(&self) -> MutexGuard<'_, Box<dyn RecordSink>> {
        self.sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_admissions(&self) -> MutexGuard<'_, Admissions> {
        self.admissions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Marks `url` as seen and counts it against `max_urls`
    fn admit_url(&self, url: &str) -> AdmitResult {
        let mut admissions = self.lock_admissions();
        if admissions.seen.contains(url) {
            return AdmitResult::AlreadySeen;
        }
        if let Some(limit) = self.config.scraper.max_urls {
            if admissions.admitted >= limit {
                return AdmitResult::LimitReached;
            }
        }
        admissions.seen.insert(url.to_string());
        admissions.admitted += 1;
        AdmitResult::Admitted
    }

    fn admit_seed(&self, raw: &str) {
        let url = match normalize_url(raw) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(seed = raw, error = %e, "Rejected malformed seed");
                self.stats
                    .record_failure(&FailureReason::MalformedUrl(e.to_string()));
                return;
            }
        };
        let Some(host) = host_key(&url) else {
            self.stats
                .record_failure(&FailureReason::MalformedUrl(format!("no host in {}", url)));
            return;
        };

        match self.admit_url(url.as_str()) {
            AdmitResult::Admitted => {}
            AdmitResult::AlreadySeen => {
                tracing::debug!(url = %url, "Seed already admitted");
                return;
            }
            AdmitResult::LimitReached => {
                tracing::debug!(url = %url, "URL limit reached, seed discarded");
                self.stats.record_discarded(1);
                return;
            }
        }

        let lineage = {
            let mut admissions = self.lock_admissions();
            let id = admissions.next_lineage;
            admissions.next_lineage += 1;
            id
        };

        let task = FetchTask::seed(url, host, lineage, self.config.scraper.max_attempts());
        self.pagination.start_lineage(&task);
        tracing::debug!(url = %task.url, lineage, "Seed admitted");
        self.queue.push(task);
    }

    async fn work(&self, id: u32) {
        tracing::trace!(worker = id, "Worker started");
        while let Some(task) = self.queue.pop(&self.cancel).await {
            self.process(task).await;
            self.queue.task_done();
        }
        tracing::trace!(worker = id, "Worker stopped");
    }

    /// Handles one task from robots check to pagination
    async fn process(&self, mut task: FetchTask) {
        if self.cancel.is_cancelled() {
            self.stats.record_discarded(1);
            self.pagination.exhaust(task.lineage);
            return;
        }
        if !self.robots.is_allowed(&task.url, &self.robots_agent).await {
            tracing::info!(url = %task.url, "Disallowed by robots.txt");
            self.stats.record_skipped();
            self.pagination.exhaust(task.lineage);
            return;
        }
        if self.robots.is_enabled() {
            let delay = self.robots.crawl_delay(&task.url, &self.robots_agent).await;
            self.governor.set_crawl_delay(&task.host, delay);
        }

        let outcome = self
            .retry
            .run(&mut task, |attempt| self.attempt(attempt.clone()))
            .await;

        match outcome {
            FetchOutcome::Success(page) => self.handle_page(&task, page),
            FetchOutcome::TerminalFailure {
                reason: FailureReason::Cancelled,
            } => {
                self.stats.record_discarded(1);
                self.pagination.exhaust(task.lineage);
            }
            FetchOutcome::TerminalFailure { reason }
            | FetchOutcome::RetryableFailure { reason, .. } => {
                tracing::warn!(
                    url = %task.url,
                    attempts = task.attempt_count,
                    proxy = task.assigned_proxy.as_deref().unwrap_or("direct"),
                    reason = %reason,
                    "Task failed"
                );
                self.stats.record_failure(&reason);
                self.pagination.exhaust(task.lineage);
            }
        }
    }

    /// One attempt: admission, identity, fetch, and health feedback
    async fn attempt(&self, task: FetchTask) -> AttemptReport {
        let Some(permit) = self.governor.acquire(&task.host, &self.cancel).await else {
            return AttemptReport {
                outcome: FetchOutcome::TerminalFailure {
                    reason: FailureReason::Cancelled,
                },
                proxy: None,
            };
        };

        let identity = match self.proxies.acquire() {
            Ok(identity) => identity,
            Err(unavailable) => {
                // No request went out, so the host is not penalized
                self.governor.release(permit, true);
                return AttemptReport {
                    outcome: FetchOutcome::RetryableFailure {
                        reason: FailureReason::ProxyUnavailable {
                            retry_after: unavailable.retry_after,
                        },
                        elapsed: Duration::ZERO,
                    },
                    proxy: None,
                };
            }
        };

        tracing::debug!(url = %task.url, attempt = task.attempt_count + 1, via = %identity, "Fetching");
        let outcome = self.executor.execute(&task, &identity, self.mode).await;

        self.proxies.release(&identity, &outcome);
        self.governor.release(permit, !outcome.is_retryable());

        AttemptReport {
            outcome,
            proxy: identity.proxy_address().map(str::to_string),
        }
    }

    /// Checks the sink for an equal record before storing this one
    fn keep_record(&self, record: Record) {
        let mut sink = self.lock_sink();
        if sink.is_duplicate(&record) {
            tracing::debug!(url = %record.url, "Duplicate record");
            self.stats.record_duplicate();
        } else if sink.accumulate(record) {
            self.stats.record_record();
        } else {
            self.stats.record_duplicate();
        }
    }

    /// Extraction, dedup and pagination for a fetched page
    fn handle_page(&self, task: &FetchTask, page: FetchedPage) {
        if page.final_url != page.url {
            // A redirect target counts as handled too
            self.lock_admissions()
                .seen
                .insert(page.final_url.as_str().to_string());
        }

        let record = match self.extractor.extract(&page, &self.rules) {
            Ok(record) => record,
            Err(e) => {
                let reason = FailureReason::Extraction(e.to_string());
                tracing::warn!(url = %task.url, attempts = task.attempt_count, reason = %reason, "Task failed");
                self.stats.record_failure(&reason);
                self.pagination.exhaust(task.lineage);
                return;
            }
        };

        self.stats.record_success(page.body.len());
        tracing::info!(
            url = %task.url,
            status = page.status,
            attempts = task.attempt_count,
            elapsed_ms = page.elapsed.as_millis() as u64,
            "Fetched"
        );

        let has_content = self.rules.is_empty() || record.has_content();
        if has_content {
            self.keep_record(record);
        } else {
            tracing::debug!(url = %task.url, "No field matched, record not kept");
        }

        let Some(next) = self
            .pagination
            .on_extracted(task, &page.body, &page.final_url, has_content)
        else {
            return;
        };

        match self.admit_url(next.url.as_str()) {
            AdmitResult::Admitted => {
                self.pagination.next_enqueued(&next);
                // Pushed before the parent is marked done
                self.queue.push(next);
            }
            AdmitResult::AlreadySeen => {
                tracing::debug!(url = %next.url, "Next page already seen, lineage ends");
                self.pagination.exhaust(task.lineage);
            }
            AdmitResult::LimitReached => {
                tracing::debug!(url = %next.url, "URL limit reached, next page discarded");
                self.stats.record_discarded(1);
                self.pagination.exhaust(task.lineage);
            }
        }
    }
}
