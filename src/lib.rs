//! Kumo-Harvest: a polite, resilient scraping orchestrator
//!
//! This crate fetches pages over plain HTTP or a headless browser, extracts
//! structured records with declarative selector rules, and exports the
//! deduplicated results. Fetching is paced per host, bounded globally,
//! retried with backoff, routed through a health-tracked proxy pool, and
//! gated by robots.txt.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod output;
pub mod proxy;
pub mod robots;
pub mod state;
pub mod url;

use thiserror::Error;

/// Main error type for Kumo-Harvest operations
#[derive(Debug, Error)]
pub enum KumoError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Export error: {0}")]
    Export(#[from] output::ExportError),

    #[error("Renderer error: {0}")]
    Render(#[from] crawler::RenderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run cancelled")]
    Cancelled,
}

/// Configuration-specific errors
///
/// Any of these aborts a run before the first fetch is issued.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid selector rule '{field}': {message}")]
    InvalidSelector { field: String, message: String },

    #[error("Unknown transform '{transform}' for field '{field}'")]
    UnknownTransform { field: String, transform: String },

    #[error("Invalid proxy '{proxy}': {message}")]
    InvalidProxy { proxy: String, message: String },
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Kumo-Harvest operations
pub type Result<T> = std::result::Result<T, KumoError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Orchestrator, RunReport};
pub use output::{RunStats, StatsSnapshot};
pub use state::{FetchOutcome, FetchTask, FailureReason};
pub use url::{host_key, normalize_url};
