//! Configuration module for Kumo-Harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Everything here is read once at run start; an invalid file aborts the run
//! before any request is made.
//!
//! # Example
//!
//! ```no_run
//! use kumo_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("scrape.toml")).unwrap();
//! println!("Retries per URL: {}", config.scraper.max_retries);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    BrowserConfig, Config, FieldConfig, FieldKind, OutputConfig, PaginationConfig,
    PolitenessConfig, ProxyConfig, ScraperConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::{validate, validate_proxy_url, validate_seed_sources, validate_with_transforms};
