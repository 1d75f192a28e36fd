use crate::crawler::FetchMode;
use crate::output::ExportFormat;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for Kumo-Harvest
///
/// Every section is optional in the TOML file and falls back to the
/// defaults documented on each field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Seed URLs that start one lineage each
    #[serde(default)]
    pub seeds: Vec<String>,

    /// XML sitemaps whose page entries are added as seeds
    #[serde(default)]
    pub sitemaps: Vec<String>,

    #[serde(default)]
    pub scraper: ScraperConfig,

    #[serde(default)]
    pub politeness: PolitenessConfig,

    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Absent means seeds are fetched without following next pages
    #[serde(default)]
    pub pagination: Option<PaginationConfig>,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub output: OutputConfig,

    /// Field rules applied to every fetched page
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

/// Fetch pacing, retry and concurrency settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ScraperConfig {
    /// Minimum interval between requests to one host (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for jittered pacing and retry backoff (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Per-attempt timeout (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Worker count and global in-flight ceiling
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: u32,

    /// Simultaneous requests allowed to a single host
    #[serde(default = "default_per_host_concurrency")]
    pub per_host_concurrency: u32,

    /// Cap on tasks admitted to one run, pagination included
    #[serde(default)]
    pub max_urls: Option<usize>,

    /// Non-2xx statuses that still count as success
    #[serde(default)]
    pub allowed_statuses: Vec<u16>,

    #[serde(default)]
    pub mode: FetchMode,
}

/// Robots.txt and identification settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PolitenessConfig {
    #[serde(default = "default_true")]
    pub respect_robots_txt: bool,

    /// Full User-Agent header; its product token is used for robots matching
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Proxy pool settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ProxyConfig {
    #[serde(default)]
    pub use_proxies: bool,

    /// Proxy URLs (`http://`, `https://`, `socks5://`)
    #[serde(default)]
    pub proxy_list: Vec<String>,

    /// Consecutive failures before a proxy is cooled down
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// First cooldown length (milliseconds); doubles on each further cooldown
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    #[serde(default = "default_max_cooldown_ms")]
    pub max_cooldown_ms: u64,
}

/// Next-page discovery settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PaginationConfig {
    /// Pages per lineage, the seed included
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// CSS selector of the "next" link; with no `page_param` either, common
    /// next-link markup is tried
    #[serde(default)]
    pub next_selector: Option<String>,

    /// Query parameter incremented to reach the next page
    #[serde(default)]
    pub page_param: Option<String>,

    /// Page number assumed when the seed lacks `page_param`
    #[serde(default = "default_start_page")]
    pub start_page: u32,
}

/// Headless browser settings (used when `scraper.mode = "browser"`)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BrowserConfig {
    #[serde(default = "default_browser_type")]
    pub browser_type: String,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// Selector that must be present before the DOM is captured
    #[serde(default)]
    pub wait_for_selector: Option<String>,

    /// Fixed settle time after navigation (milliseconds)
    #[serde(default)]
    pub wait_ms: Option<u64>,
}

/// Export settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,

    /// File name without extension
    #[serde(default = "default_file_stem")]
    pub file_stem: String,

    #[serde(default = "default_formats")]
    pub formats: Vec<ExportFormat>,

    /// Drop records whose fields match an earlier record
    #[serde(default = "default_true")]
    pub deduplicate: bool,
}

/// How a field's value is read from the matched elements
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Attribute,
    Multiple,
    Transform,
}

/// One `[[fields]]` entry
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct FieldConfig {
    pub name: String,
    pub selector: String,

    #[serde(default)]
    pub kind: FieldKind,

    /// Attribute to read for `attribute` fields
    #[serde(default)]
    pub attribute: Option<String>,

    /// Registered transform name for `transform` fields
    #[serde(default)]
    pub transform: Option<String>,

    /// Value used when the selector matches nothing
    #[serde(default)]
    pub default: Option<String>,

    /// Reject the page when this field is missing and has no default
    #[serde(default)]
    pub required: bool,
}

impl ScraperConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Attempts per task, the first one included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl PolitenessConfig {
    /// Returns the product token matched against robots.txt groups
    ///
    /// `"KumoHarvest/0.4 (+https://example.com)"` yields `"KumoHarvest"`.
    pub fn robots_agent(&self) -> &str {
        self.user_agent
            .split(|c: char| c == '/' || c.is_whitespace())
            .next()
            .unwrap_or(&self.user_agent)
    }
}

impl ProxyConfig {
    /// Returns the proxies to rotate through, empty when proxies are off
    pub fn active_proxies(&self) -> &[String] {
        if self.use_proxies {
            &self.proxy_list
        } else {
            &[]
        }
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_millis(self.max_cooldown_ms)
    }
}

impl BrowserConfig {
    pub fn wait(&self) -> Option<Duration> {
        self.wait_ms.map(Duration::from_millis)
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            concurrent_requests: default_concurrent_requests(),
            per_host_concurrency: default_per_host_concurrency(),
            max_urls: None,
            allowed_statuses: Vec::new(),
            mode: FetchMode::default(),
        }
    }
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            respect_robots_txt: true,
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            use_proxies: false,
            proxy_list: Vec::new(),
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
            max_cooldown_ms: default_max_cooldown_ms(),
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            next_selector: None,
            page_param: None,
            start_page: default_start_page(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            browser_type: default_browser_type(),
            headless: true,
            wait_for_selector: None,
            wait_ms: None,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            file_stem: default_file_stem(),
            formats: default_formats(),
            deduplicate: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    3000
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_concurrent_requests() -> u32 {
    5
}

fn default_per_host_concurrency() -> u32 {
    2
}

fn default_user_agent() -> String {
    format!("KumoHarvest/{}", env!("CARGO_PKG_VERSION"))
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_cooldown_ms() -> u64 {
    30_000
}

fn default_max_cooldown_ms() -> u64 {
    600_000
}

fn default_max_pages() -> u32 {
    10
}

fn default_start_page() -> u32 {
    1
}

fn default_browser_type() -> String {
    "chromium".to_string()
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("./output")
}

fn default_file_stem() -> String {
    "records".to_string()
}

fn default_formats() -> Vec<ExportFormat> {
    vec![ExportFormat::Json]
}
