//! Fetch executor
//!
//! Performs exactly one attempt for a task through a [`Renderer`] and turns
//! whatever happened into a [`FetchOutcome`]:
//!
//! | Condition | Outcome |
//! |-----------|---------|
//! | 2xx or allow-listed status | Success |
//! | 429, 5xx | RetryableFailure |
//! | other 4xx, unfollowed 3xx | TerminalFailure |
//! | timeout, connection or proxy error | RetryableFailure |
//! | malformed URL | TerminalFailure |
//! | CAPTCHA the solver could not clear | RetryableFailure |

use crate::crawler::captcha::{detect_captcha, CaptchaSolver};
use crate::proxy::Identity;
use crate::state::{FailureReason, FetchOutcome, FetchTask, FetchedPage};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

/// How a page is retrieved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMode {
    /// Single HTTP GET; the raw document is returned
    #[default]
    Plain,

    /// Navigate a headless browser and capture the rendered DOM
    Browser,
}

/// Readiness condition for browser rendering
#[derive(Debug, Clone, Default)]
pub struct WaitRule {
    /// Selector that must be present before the DOM is captured
    pub selector: Option<String>,

    /// Fixed settle time after navigation
    pub settle: Option<Duration>,
}

/// Document produced by a renderer
#[derive(Debug, Clone)]
pub struct Rendered {
    pub final_url: Url,
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("proxy failed: {0}")]
    Proxy(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("browser error: {0}")]
    Browser(String),
}

impl From<RenderError> for FailureReason {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::Timeout => FailureReason::Timeout,
            RenderError::Connection(msg) => FailureReason::Connection(msg),
            RenderError::Proxy(msg) => FailureReason::Proxy(msg),
            RenderError::InvalidUrl(msg) => FailureReason::MalformedUrl(msg),
            RenderError::Launch(msg) | RenderError::Browser(msg) => FailureReason::Render(msg),
        }
    }
}

/// Something that can turn a URL into a document
///
/// Implemented by the plain HTTP client and by the headless browser; tests
/// plug in scripted implementations.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(
        &self,
        url: &Url,
        identity: &Identity,
        wait: &WaitRule,
    ) -> Result<Rendered, RenderError>;
}

/// Performs single fetch attempts
pub struct FetchExecutor {
    plain: Arc<dyn Renderer>,
    browser: Option<Arc<dyn Renderer>>,
    captcha_solver: Option<Arc<dyn CaptchaSolver>>,
    allowed_statuses: Vec<u16>,
    timeout: Duration,
    wait: WaitRule,
}

impl FetchExecutor {
    /// Creates an executor that fetches through `plain`
    pub fn new(plain: Arc<dyn Renderer>, timeout: Duration) -> Self {
        Self {
            plain,
            browser: None,
            captcha_solver: None,
            allowed_statuses: Vec::new(),
            timeout,
            wait: WaitRule::default(),
        }
    }

    pub fn with_browser(mut self, browser: Arc<dyn Renderer>, wait: WaitRule) -> Self {
        self.browser = Some(browser);
        self.wait = wait;
        self
    }

    pub fn with_captcha_solver(mut self, solver: Arc<dyn CaptchaSolver>) -> Self {
        self.captcha_solver = Some(solver);
        self
    }

    /// Non-2xx statuses that still count as success
    pub fn with_allowed_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.allowed_statuses = statuses;
        self
    }

    /// Returns true if `status` counts as a successful fetch
    pub fn is_accepted(&self, status: u16) -> bool {
        (200..300).contains(&status) || self.allowed_statuses.contains(&status)
    }

    /// Performs one attempt for `task` through `identity`
    ///
    /// The attempt is bounded by the configured timeout regardless of what
    /// the renderer enforces itself.
    pub async fn execute(&self, task: &FetchTask, identity: &Identity, mode: FetchMode) -> FetchOutcome {
        let started = Instant::now();

        let renderer = match mode {
            FetchMode::Plain => &self.plain,
            FetchMode::Browser => match &self.browser {
                Some(browser) => browser,
                None => {
                    return FetchOutcome::TerminalFailure {
                        reason: FailureReason::Render("no browser renderer configured".into()),
                    }
                }
            },
        };

        let rendered = match tokio::time::timeout(
            self.timeout,
            renderer.render(&task.url, identity, &self.wait),
        )
        .await
        {
            Ok(Ok(rendered)) => rendered,
            Ok(Err(e)) => return FetchOutcome::failure(e.into(), started.elapsed()),
            Err(_) => return FetchOutcome::failure(FailureReason::Timeout, started.elapsed()),
        };

        if !self.is_accepted(rendered.status) {
            return FetchOutcome::failure(
                FailureReason::HttpStatus(rendered.status),
                started.elapsed(),
            );
        }

        let mut body = rendered.body;
        if mode == FetchMode::Browser {
            if let Some(signature) = detect_captcha(&body) {
                match &self.captcha_solver {
                    Some(solver) => match solver.solve(&task.url, &body).await {
                        Ok(solved) => {
                            tracing::info!(url = %task.url, signature, "CAPTCHA solved");
                            body = solved;
                        }
                        Err(e) => {
                            return FetchOutcome::failure(
                                FailureReason::Captcha(e.to_string()),
                                started.elapsed(),
                            )
                        }
                    },
                    None => {
                        tracing::warn!(
                            url = %task.url,
                            signature,
                            "CAPTCHA detected but no solver configured"
                        );
                    }
                }
            }
        }

        FetchOutcome::Success(FetchedPage {
            url: task.url.clone(),
            final_url: rendered.final_url,
            status: rendered.status,
            body,
            elapsed: started.elapsed(),
        })
    }
}
