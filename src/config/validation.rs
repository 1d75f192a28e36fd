use crate::config::types::{
    BrowserConfig, Config, PaginationConfig, PolitenessConfig, ProxyConfig, ScraperConfig,
};
use crate::extract::{compile_rules, TransformRegistry};
use crate::url::normalize_url;
use crate::ConfigError;
use scraper::Selector;
use url::Url;

const SUPPORTED_BROWSERS: &[&str] = &["chromium", "chrome"];
const PROXY_SCHEMES: &[&str] = &["http", "https", "socks5", "socks5h"];

/// Validates the entire configuration
///
/// Seeds and sitemaps are checked for syntax only; an empty seed list is
/// accepted here because the CLI may still add seeds (see
/// [`validate_seed_sources`]).
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_with_transforms(config, &TransformRegistry::builtin())
}

/// Validates the configuration, resolving `transform` fields against `transforms`
pub fn validate_with_transforms(
    config: &Config,
    transforms: &TransformRegistry,
) -> Result<(), ConfigError> {
    validate_scraper_config(&config.scraper)?;
    validate_politeness_config(&config.politeness)?;
    validate_proxy_config(&config.proxy)?;
    if let Some(pagination) = &config.pagination {
        validate_pagination_config(pagination)?;
    }
    validate_browser_config(&config.browser)?;
    validate_seeds(&config.seeds)?;
    validate_sitemaps(&config.sitemaps)?;

    if config.output.file_stem.trim().is_empty() {
        return Err(ConfigError::Validation(
            "output.file-stem cannot be empty".to_string(),
        ));
    }

    compile_rules(&config.fields, transforms)?;

    Ok(())
}

/// Validates the final seed sources of a run
///
/// A run needs at least one seed or sitemap, and every entry must parse.
pub fn validate_seed_sources(seeds: &[String], sitemaps: &[String]) -> Result<(), ConfigError> {
    if seeds.is_empty() && sitemaps.is_empty() {
        return Err(ConfigError::Validation(
            "at least one seed URL or sitemap is required".to_string(),
        ));
    }
    validate_seeds(seeds)?;
    validate_sitemaps(sitemaps)
}

fn validate_seeds(seeds: &[String]) -> Result<(), ConfigError> {
    for seed in seeds {
        normalize_url(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;
    }
    Ok(())
}

fn validate_sitemaps(sitemaps: &[String]) -> Result<(), ConfigError> {
    for sitemap in sitemaps {
        normalize_url(sitemap).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid sitemap URL '{}': {}", sitemap, e))
        })?;
    }
    Ok(())
}

/// Validates pacing, retry and concurrency settings
fn validate_scraper_config(config: &ScraperConfig) -> Result<(), ConfigError> {
    if config.concurrent_requests < 1 || config.concurrent_requests > 100 {
        return Err(ConfigError::Validation(format!(
            "concurrent-requests must be between 1 and 100, got {}",
            config.concurrent_requests
        )));
    }

    if config.per_host_concurrency < 1 {
        return Err(ConfigError::Validation(format!(
            "per-host-concurrency must be >= 1, got {}",
            config.per_host_concurrency
        )));
    }

    if config.base_delay_ms > config.max_delay_ms {
        return Err(ConfigError::Validation(format!(
            "base-delay-ms ({}) cannot exceed max-delay-ms ({})",
            config.base_delay_ms, config.max_delay_ms
        )));
    }

    if config.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "timeout-ms must be greater than zero".to_string(),
        ));
    }

    if config.max_urls == Some(0) {
        return Err(ConfigError::Validation(
            "max-urls must be >= 1 when set".to_string(),
        ));
    }

    if let Some(status) = config
        .allowed_statuses
        .iter()
        .find(|s| !(100..600).contains(*s))
    {
        return Err(ConfigError::Validation(format!(
            "allowed-statuses contains invalid HTTP status {}",
            status
        )));
    }

    Ok(())
}

fn validate_politeness_config(config: &PolitenessConfig) -> Result<(), ConfigError> {
    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates the proxy list
fn validate_proxy_config(config: &ProxyConfig) -> Result<(), ConfigError> {
    if config.use_proxies && config.proxy_list.is_empty() {
        return Err(ConfigError::Validation(
            "use-proxies is enabled but proxy-list is empty".to_string(),
        ));
    }

    if config.failure_threshold < 1 {
        return Err(ConfigError::Validation(
            "failure-threshold must be >= 1".to_string(),
        ));
    }

    if config.cooldown_ms > config.max_cooldown_ms {
        return Err(ConfigError::Validation(format!(
            "cooldown-ms ({}) cannot exceed max-cooldown-ms ({})",
            config.cooldown_ms, config.max_cooldown_ms
        )));
    }

    for proxy in &config.proxy_list {
        validate_proxy_url(proxy)?;
    }

    Ok(())
}

/// Validates a single proxy address
pub fn validate_proxy_url(proxy: &str) -> Result<(), ConfigError> {
    let invalid = |message: String| ConfigError::InvalidProxy {
        proxy: proxy.to_string(),
        message,
    };

    let url = Url::parse(proxy).map_err(|e| invalid(e.to_string()))?;

    if !PROXY_SCHEMES.contains(&url.scheme()) {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }

    reqwest::Proxy::all(proxy).map_err(|e| invalid(e.to_string()))?;

    Ok(())
}

fn validate_pagination_config(config: &PaginationConfig) -> Result<(), ConfigError> {
    if config.max_pages < 1 {
        return Err(ConfigError::Validation(
            "pagination.max-pages must be >= 1".to_string(),
        ));
    }

    match (&config.next_selector, &config.page_param) {
        (Some(_), Some(_)) => Err(ConfigError::Validation(
            "pagination accepts next-selector or page-param, not both".to_string(),
        )),
        (None, None) => Ok(()),
        (Some(selector), None) => validate_selector("pagination.next-selector", selector),
        (None, Some(param)) if param.trim().is_empty() => Err(ConfigError::Validation(
            "pagination.page-param cannot be empty".to_string(),
        )),
        (None, Some(_)) => Ok(()),
    }
}

fn validate_browser_config(config: &BrowserConfig) -> Result<(), ConfigError> {
    let browser = config.browser_type.to_lowercase();
    if !SUPPORTED_BROWSERS.contains(&browser.as_str()) {
        return Err(ConfigError::Validation(format!(
            "unsupported browser-type '{}' (expected one of: {})",
            config.browser_type,
            SUPPORTED_BROWSERS.join(", ")
        )));
    }

    if let Some(selector) = &config.wait_for_selector {
        validate_selector("browser.wait-for-selector", selector)?;
    }

    Ok(())
}

fn validate_selector(field: &str, selector: &str) -> Result<(), ConfigError> {
    Selector::parse(selector).map_err(|e| ConfigError::InvalidSelector {
        field: field.to_string(),
        message: e.to_string(),
    })?;
    Ok(())
}
