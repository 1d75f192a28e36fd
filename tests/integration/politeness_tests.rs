use crate::common::{page, test_config};
use kumo_harvest::Orchestrator;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_robots_disallow_skips_without_fetching() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/report"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page("Secret")))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page("Public")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(
        vec![
            format!("{}/private/report", server.uri()),
            format!("{}/public", server.uri()),
        ],
        dir.path(),
    );
    config.politeness.respect_robots_txt = true;
    let orchestrator = Orchestrator::new(config).unwrap();

    let report = orchestrator.run(vec![]).await;

    assert_eq!(report.stats.skipped, 1);
    assert_eq!(report.stats.succeeded, 1);
    assert_eq!(report.stats.attempted, 1);
    assert_eq!(report.stats.failed, 0);
}

#[tokio::test]
async fn test_missing_robots_allows_all() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page("Open")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(vec![format!("{}/page", server.uri())], dir.path());
    config.politeness.respect_robots_txt = true;
    let orchestrator = Orchestrator::new(config).unwrap();

    let report = orchestrator.run(vec![]).await;
    assert_eq!(report.stats.succeeded, 1);
    assert_eq!(report.stats.skipped, 0);
}

#[tokio::test]
async fn test_requests_to_one_host_are_paced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page("Paced")))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let seeds = (0..4)
        .map(|n| format!("{}/paced/{}", server.uri(), n))
        .collect();
    let mut config = test_config(seeds, dir.path());
    config.scraper.base_delay_ms = 100;
    config.scraper.max_delay_ms = 150;
    config.scraper.concurrent_requests = 4;
    config.scraper.per_host_concurrency = 4;
    config.output.deduplicate = false;
    let orchestrator = Orchestrator::new(config).unwrap();

    let started = Instant::now();
    let report = orchestrator.run(vec![]).await;

    assert_eq!(report.stats.succeeded, 4);
    // Four admissions to one host need at least three gaps
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_crawl_delay_raises_pacing_floor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nCrawl-delay: 1\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page("Slow host")))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(
        vec![
            format!("{}/first", server.uri()),
            format!("{}/second", server.uri()),
        ],
        dir.path(),
    );
    config.politeness.respect_robots_txt = true;
    config.output.deduplicate = false;
    let orchestrator = Orchestrator::new(config).unwrap();

    let started = Instant::now();
    let report = orchestrator.run(vec![]).await;

    assert_eq!(report.stats.succeeded, 2);
    assert!(started.elapsed() >= Duration::from_secs(1));
}
