//! Kumo-Harvest main entry point
//!
//! This is the command-line interface for the Kumo-Harvest scraping orchestrator.

use anyhow::Context;
use clap::Parser;
use kumo_harvest::config::{load_config_with_hash, validate_seed_sources, Config};
use kumo_harvest::output::print_statistics;
use kumo_harvest::Orchestrator;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Kumo-Harvest: a polite, resilient scraping orchestrator
///
/// Kumo-Harvest fetches the seed URLs of a configuration file while
/// respecting robots.txt and per-host pacing, retries transient failures,
/// follows pagination, and exports the extracted records as JSON or CSV.
#[derive(Parser, Debug)]
#[command(name = "kumo-harvest")]
#[command(version)]
#[command(about = "A polite, resilient scraping orchestrator", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Additional seed URL (repeatable)
    #[arg(long = "seed", value_name = "URL")]
    seeds: Vec<String>,

    /// XML sitemap whose pages are added as seeds (repeatable)
    #[arg(long = "sitemap", value_name = "URL")]
    sitemaps: Vec<String>,

    /// File with one seed URL per line; blank lines and `#` comments are ignored
    #[arg(long, value_name = "FILE")]
    seeds_from: Option<PathBuf>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be scraped without fetching anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (mut config, config_hash) = match load_config_with_hash(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    config.seeds.extend(cli.seeds.iter().cloned());
    if let Some(path) = &cli.seeds_from {
        config.seeds.extend(read_seed_file(path)?);
    }
    config.sitemaps.extend(cli.sitemaps.iter().cloned());
    validate_seed_sources(&config.seeds, &config.sitemaps)?;

    if cli.dry_run {
        handle_dry_run(&config);
    } else {
        handle_run(config).await?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("kumo_harvest=info,warn"),
            1 => EnvFilter::new("kumo_harvest=debug,info"),
            2 => EnvFilter::new("kumo_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn read_seed_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read seed file {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Handles the --dry-run mode: shows the effective settings and seeds
fn handle_dry_run(config: &Config) {
    println!("=== Kumo-Harvest Dry Run ===\n");

    let scraper = &config.scraper;
    println!("Scraper:");
    println!("  Mode: {:?}", scraper.mode);
    println!(
        "  Delay: {}ms base, {}ms max",
        scraper.base_delay_ms, scraper.max_delay_ms
    );
    println!("  Timeout: {}ms", scraper.timeout_ms);
    println!("  Max retries: {}", scraper.max_retries);
    println!(
        "  Concurrency: {} total, {} per host",
        scraper.concurrent_requests, scraper.per_host_concurrency
    );
    if let Some(max_urls) = scraper.max_urls {
        println!("  Max URLs: {}", max_urls);
    }

    println!("\nPoliteness:");
    println!("  User agent: {}", config.politeness.user_agent);
    println!("  Respect robots.txt: {}", config.politeness.respect_robots_txt);

    let proxies = config.proxy.active_proxies();
    println!("\nProxies ({}):", proxies.len());
    for proxy in proxies {
        println!("  - {}", proxy);
    }

    if let Some(pagination) = &config.pagination {
        println!("\nPagination:");
        println!("  Max pages: {}", pagination.max_pages);
        match (&pagination.next_selector, &pagination.page_param) {
            (Some(selector), _) => println!("  Next link: {}", selector),
            (None, Some(param)) => println!(
                "  Query parameter: {} (from {})",
                param, pagination.start_page
            ),
            (None, None) => println!("  Next link: built-in patterns"),
        }
    }

    println!("\nFields ({}):", config.fields.len());
    for field in &config.fields {
        println!("  - {} ({:?}): {}", field.name, field.kind, field.selector);
    }

    println!("\nOutput:");
    println!("  Directory: {}", config.output.directory.display());
    println!("  Formats: {:?}", config.output.formats);

    println!("\nSeeds ({}):", config.seeds.len());
    for seed in &config.seeds {
        println!("  * {}", seed);
    }
    if !config.sitemaps.is_empty() {
        println!("\nSitemaps ({}, not fetched in a dry run):", config.sitemaps.len());
        for sitemap in &config.sitemaps {
            println!("  * {}", sitemap);
        }
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main scrape operation
async fn handle_run(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        "Seeds: {}, sitemaps: {}, fields: {}, proxies: {}",
        config.seeds.len(),
        config.sitemaps.len(),
        config.fields.len(),
        config.proxy.active_proxies().len()
    );

    let orchestrator = Orchestrator::new(config).context("Failed to set up the run")?;

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight requests");
            cancel.cancel();
        }
    });

    let report = orchestrator.run(Vec::new()).await;

    let written = orchestrator
        .flush()
        .context("Failed to export records")?;
    for path in &written {
        println!("Wrote {}", path.display());
    }

    print_statistics(&report.stats, &report.proxies);

    for lineage in report.lineages.iter().filter(|l| l.pages > 1) {
        tracing::info!(
            seed = %lineage.seed,
            pages = lineage.pages,
            state = %lineage.state,
            "Pagination lineage"
        );
    }

    Ok(())
}
