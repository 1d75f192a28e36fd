use kumo_harvest::config::{Config, FieldConfig, FieldKind};
use std::path::Path;

/// A configuration tuned for fast tests: short delays, robots.txt off,
/// one `title` field read from `h1`
pub fn test_config(seeds: Vec<String>, output_dir: &Path) -> Config {
    let mut config = Config::default();
    config.seeds = seeds;
    config.scraper.base_delay_ms = 5;
    config.scraper.max_delay_ms = 40;
    config.scraper.timeout_ms = 5_000;
    config.scraper.max_retries = 3;
    config.scraper.concurrent_requests = 2;
    config.politeness.respect_robots_txt = false;
    config.politeness.user_agent = "KumoHarvestTest/1.0".to_string();
    config.output.directory = output_dir.to_path_buf();
    config.fields = vec![text_field("title", "h1")];
    config
}

pub fn text_field(name: &str, selector: &str) -> FieldConfig {
    FieldConfig {
        name: name.to_string(),
        selector: selector.to_string(),
        kind: FieldKind::Text,
        attribute: None,
        transform: None,
        default: None,
        required: false,
    }
}

pub fn page(title: &str) -> String {
    format!(
        "<html><head><title>{0}</title></head><body><h1>{0}</h1></body></html>",
        title
    )
}
