use crate::common::{page, test_config};
use async_trait::async_trait;
use kumo_harvest::crawler::{RenderError, Rendered, Renderer, WaitRule};
use kumo_harvest::proxy::Identity;
use kumo_harvest::Orchestrator;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page("Recovered")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(vec![format!("{}/flaky", server.uri())], dir.path());
    let orchestrator = Orchestrator::new(config).unwrap();

    let report = orchestrator.run(vec![]).await;

    assert_eq!(report.stats.succeeded, 1);
    assert_eq!(report.stats.retried, 3);
    assert_eq!(report.stats.attempts, 4);
    assert_eq!(report.stats.failed, 0);
    assert_eq!(report.stats.transient_failures.get("server_error"), Some(&3));
}

#[tokio::test]
async fn test_retries_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(vec![format!("{}/down", server.uri())], dir.path());
    config.scraper.max_retries = 2;
    let orchestrator = Orchestrator::new(config).unwrap();

    let report = orchestrator.run(vec![]).await;

    assert_eq!(report.stats.succeeded, 0);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.retried, 2);
    assert_eq!(report.stats.failures.get("retries_exhausted"), Some(&1));
}

#[tokio::test]
async fn test_rate_limited_then_ok() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page("Busy")))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(vec![format!("{}/busy", server.uri())], dir.path());
    let orchestrator = Orchestrator::new(config).unwrap();

    let report = orchestrator.run(vec![]).await;
    assert_eq!(report.stats.succeeded, 1);
    assert_eq!(report.stats.transient_failures.get("rate_limited"), Some(&1));
}

#[tokio::test]
async fn test_allowed_status_counts_as_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/teapot"))
        .respond_with(ResponseTemplate::new(418).set_body_string(page("Teapot")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(vec![format!("{}/teapot", server.uri())], dir.path());
    config.scraper.allowed_statuses = vec![418];
    let orchestrator = Orchestrator::new(config).unwrap();

    let report = orchestrator.run(vec![]).await;
    assert_eq!(report.stats.succeeded, 1);
    assert_eq!(report.stats.records, 1);
}

/// Fails every request through the `bad` proxy and serves a page otherwise
struct ProxyAwareRenderer {
    bad_attempts: AtomicUsize,
}

#[async_trait]
impl Renderer for ProxyAwareRenderer {
    async fn render(
        &self,
        url: &Url,
        identity: &Identity,
        _wait: &WaitRule,
    ) -> Result<Rendered, RenderError> {
        match identity.proxy_address() {
            Some(address) if address.contains("bad") => {
                self.bad_attempts.fetch_add(1, Ordering::SeqCst);
                Err(RenderError::Proxy("connection refused by proxy".into()))
            }
            _ => Ok(Rendered {
                final_url: url.clone(),
                status: 200,
                body: page(url.path()),
            }),
        }
    }
}

#[tokio::test]
async fn test_failing_proxy_is_cooled_down() {
    let dir = TempDir::new().unwrap();
    let seeds = (0..6)
        .map(|n| format!("https://shop.example.com/item/{}", n))
        .collect();
    let mut config = test_config(seeds, dir.path());
    config.proxy.use_proxies = true;
    config.proxy.proxy_list = vec![
        "http://bad.proxy.test:8080".into(),
        "http://good.proxy.test:8080".into(),
    ];
    config.proxy.failure_threshold = 1;
    config.proxy.cooldown_ms = 60_000;
    config.proxy.max_cooldown_ms = 60_000;

    let renderer = Arc::new(ProxyAwareRenderer {
        bad_attempts: AtomicUsize::new(0),
    });
    let orchestrator = Orchestrator::builder(config)
        .renderer(renderer.clone())
        .build()
        .unwrap();

    let report = orchestrator.run(vec![]).await;

    assert_eq!(report.stats.succeeded, 6);
    assert_eq!(report.stats.failed, 0);
    // One failure takes the bad proxy out of rotation for the rest of the run
    assert_eq!(renderer.bad_attempts.load(Ordering::SeqCst), 1);

    let bad = report
        .proxies
        .iter()
        .find(|p| p.address.contains("bad"))
        .unwrap();
    assert!(!bad.is_healthy);
    assert!(bad.cooling_for.is_some());

    let good = report
        .proxies
        .iter()
        .find(|p| p.address.contains("good"))
        .unwrap();
    assert_eq!(good.successes, 6);
}

#[tokio::test]
async fn test_all_proxies_down_exhausts_retries() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(
        vec!["https://shop.example.com/only".to_string()],
        dir.path(),
    );
    config.scraper.max_retries = 2;
    config.proxy.use_proxies = true;
    config.proxy.proxy_list = vec!["http://bad.proxy.test:8080".into()];
    config.proxy.failure_threshold = 1;
    config.proxy.cooldown_ms = 60_000;
    config.proxy.max_cooldown_ms = 60_000;

    let renderer = Arc::new(ProxyAwareRenderer {
        bad_attempts: AtomicUsize::new(0),
    });
    let orchestrator = Orchestrator::builder(config)
        .renderer(renderer.clone())
        .build()
        .unwrap();

    let report = orchestrator.run(vec![]).await;

    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.attempts, 3);
    assert_eq!(renderer.bad_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(report.stats.transient_failures.get("proxy"), Some(&2));
}
