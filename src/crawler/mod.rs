//! Crawler module for request orchestration
//!
//! This module contains the fetch pipeline, including:
//! - Per-host pacing and the global concurrency ceiling
//! - Single fetch attempts over plain HTTP or a headless browser
//! - Retry with exponential backoff
//! - Pagination state per seed lineage
//! - Overall run orchestration

#[cfg(feature = "browser")]
mod browser;
mod captcha;
mod coordinator;
mod fetcher;
mod governor;
mod http;
mod pagination;
mod queue;
mod retry;
mod sitemap;

#[cfg(feature = "browser")]
pub use browser::BrowserRenderer;
pub use captcha::{detect_captcha, CaptchaError, CaptchaSolver};
pub use coordinator::{Orchestrator, OrchestratorBuilder, RunReport};
pub use fetcher::{FetchExecutor, FetchMode, RenderError, Rendered, Renderer, WaitRule};
pub use governor::{Admission, GovernorConfig, GovernorPermit, RateGovernor};
pub use http::{build_http_client, HttpRenderer};
pub use pagination::{LineageReport, NextPageRule, PaginationDriver};
pub use queue::WorkQueue;
pub use retry::{AttemptReport, RetryCoordinator, RetryPolicy};
pub use sitemap::{collect_sitemap_urls, fetch_sitemap, parse_sitemap, SitemapEntries, SitemapError};
