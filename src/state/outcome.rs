//! Fetch outcome definitions
//!
//! Every fetch attempt produces exactly one `FetchOutcome`. Retryable
//! outcomes may be resubmitted by the retry coordinator; terminal outcomes
//! close the task.

use std::fmt;
use std::time::Duration;
use url::Url;

/// A successfully fetched (or rendered) document
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// The URL that was requested
    pub url: Url,

    /// The URL the document was served from after redirects
    pub final_url: Url,

    /// HTTP status code (200 for browser snapshots without a known status)
    pub status: u16,

    /// Raw or rendered HTML
    pub body: String,

    /// Time spent on the attempt that produced this page
    pub elapsed: Duration,
}

/// Why a fetch attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The attempt exceeded its timeout
    Timeout,

    /// Connection refused, reset, DNS or TLS failure
    Connection(String),

    /// The server answered with a status outside the accepted set
    HttpStatus(u16),

    /// Every proxy in the pool is cooling down
    ProxyUnavailable { retry_after: Duration },

    /// The proxy itself rejected or broke the request
    Proxy(String),

    /// The URL cannot be fetched at all
    MalformedUrl(String),

    /// The browser renderer failed
    Render(String),

    /// A CAPTCHA was detected and could not be solved
    Captcha(String),

    /// The extraction collaborator rejected the document
    Extraction(String),

    /// The last retryable failure once attempts ran out
    RetriesExhausted { last: Box<FailureReason> },

    /// The run was cancelled while the task was waiting
    Cancelled,
}

/// Coarse grouping of failures for the run summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureCategory {
    Timeout,
    Connection,
    RateLimited,
    ServerError,
    ClientError,
    Proxy,
    MalformedUrl,
    Render,
    Captcha,
    Extraction,
    RetriesExhausted,
    Cancelled,
}

impl FailureReason {
    /// Returns true if this failure is worth another attempt
    ///
    /// Transient network errors, proxy problems, 429 and 5xx responses are
    /// retryable. Every other 4xx, malformed URLs and extraction errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout
            | Self::Connection(_)
            | Self::ProxyUnavailable { .. }
            | Self::Proxy(_)
            | Self::Render(_)
            | Self::Captcha(_) => true,
            Self::HttpStatus(code) => *code == 429 || (500..600).contains(code),
            Self::MalformedUrl(_)
            | Self::Extraction(_)
            | Self::RetriesExhausted { .. }
            | Self::Cancelled => false,
        }
    }

    /// Returns true if the failure says something about the egress identity
    /// rather than the target page
    pub fn blames_identity(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Connection(_) | Self::Proxy(_) | Self::HttpStatus(429)
        )
    }

    /// Returns the summary category for this failure
    pub fn category(&self) -> FailureCategory {
        match self {
            Self::Timeout => FailureCategory::Timeout,
            Self::Connection(_) => FailureCategory::Connection,
            Self::HttpStatus(429) => FailureCategory::RateLimited,
            Self::HttpStatus(code) if *code >= 500 => FailureCategory::ServerError,
            Self::HttpStatus(_) => FailureCategory::ClientError,
            Self::ProxyUnavailable { .. } | Self::Proxy(_) => FailureCategory::Proxy,
            Self::MalformedUrl(_) => FailureCategory::MalformedUrl,
            Self::Render(_) => FailureCategory::Render,
            Self::Captcha(_) => FailureCategory::Captcha,
            Self::Extraction(_) => FailureCategory::Extraction,
            Self::RetriesExhausted { .. } => FailureCategory::RetriesExhausted,
            Self::Cancelled => FailureCategory::Cancelled,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Connection(e) => write!(f, "connection error: {}", e),
            Self::HttpStatus(code) => write!(f, "HTTP {}", code),
            Self::ProxyUnavailable { retry_after } => {
                write!(f, "no proxy available (retry after {:?})", retry_after)
            }
            Self::Proxy(e) => write!(f, "proxy error: {}", e),
            Self::MalformedUrl(e) => write!(f, "malformed URL: {}", e),
            Self::Render(e) => write!(f, "render error: {}", e),
            Self::Captcha(e) => write!(f, "captcha unsolved: {}", e),
            Self::Extraction(e) => write!(f, "extraction error: {}", e),
            Self::RetriesExhausted { last } => write!(f, "retries_exhausted ({})", last),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::Proxy => "proxy",
            Self::MalformedUrl => "malformed_url",
            Self::Render => "render",
            Self::Captcha => "captcha",
            Self::Extraction => "extraction",
            Self::RetriesExhausted => "retries_exhausted",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of one fetch attempt
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// The document was fetched
    Success(FetchedPage),

    /// The attempt failed but another attempt may succeed
    RetryableFailure {
        reason: FailureReason,
        elapsed: Duration,
    },

    /// The task is finished and must not be retried
    TerminalFailure { reason: FailureReason },
}

impl FetchOutcome {
    /// Builds a failure outcome, picking the retryable or terminal variant
    /// from the reason
    pub fn failure(reason: FailureReason, elapsed: Duration) -> Self {
        if reason.is_retryable() {
            Self::RetryableFailure { reason, elapsed }
        } else {
            Self::TerminalFailure { reason }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableFailure { .. })
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::TerminalFailure { .. })
    }

    /// Returns the failure reason, if this outcome is a failure
    pub fn reason(&self) -> Option<&FailureReason> {
        match self {
            Self::Success(_) => None,
            Self::RetryableFailure { reason, .. } | Self::TerminalFailure { reason } => {
                Some(reason)
            }
        }
    }
}
