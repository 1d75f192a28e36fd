use crate::common::{page, test_config, text_field};
use async_trait::async_trait;
use kumo_harvest::config::FieldKind;
use kumo_harvest::crawler::{RenderError, Rendered, Renderer, WaitRule};
use kumo_harvest::output::ExportFormat;
use kumo_harvest::proxy::Identity;
use kumo_harvest::Orchestrator;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_three_pages_with_bounded_concurrency() {
    let server = MockServer::start().await;
    for name in ["a", "b", "c"] {
        Mock::given(method("GET"))
            .and(path(format!("/{}", name)))
            .respond_with(ResponseTemplate::new(200).set_body_string(page(name)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let seeds = ["a", "b", "c"]
        .iter()
        .map(|name| format!("{}/{}", server.uri(), name))
        .collect();
    let orchestrator = Orchestrator::new(test_config(seeds, dir.path())).unwrap();

    let report = orchestrator.run(vec![]).await;

    assert_eq!(report.stats.attempted, 3);
    assert_eq!(report.stats.succeeded, 3);
    assert_eq!(report.stats.failed, 0);
    assert_eq!(report.stats.retried, 0);
    assert_eq!(report.stats.records, 3);
    assert!(report.stats.bytes_fetched > 0);
    assert_eq!(report.stats.success_rate, 1.0);
}

#[tokio::test]
async fn test_not_found_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = test_config(vec![format!("{}/gone", server.uri())], dir.path());
    let orchestrator = Orchestrator::new(config).unwrap();

    let report = orchestrator.run(vec![]).await;

    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.stats.retried, 0);
    assert_eq!(report.stats.attempts, 1);
    assert_eq!(report.stats.failures.get("client_error"), Some(&1));
}

#[tokio::test]
async fn test_duplicate_records_and_idempotent_export() {
    let server = MockServer::start().await;
    for p in ["/one", "/two"] {
        Mock::given(method("GET"))
            .and(path(p))
            .respond_with(ResponseTemplate::new(200).set_body_string(page("Same")))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/three"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page("Other")))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(
        vec![
            format!("{}/one", server.uri()),
            format!("{}/two", server.uri()),
            format!("{}/three", server.uri()),
        ],
        dir.path(),
    );
    config.output.formats = vec![ExportFormat::Json, ExportFormat::Csv];
    let orchestrator = Orchestrator::new(config).unwrap();

    let report = orchestrator.run(vec![]).await;
    assert_eq!(report.stats.succeeded, 3);
    assert_eq!(report.stats.records, 2);
    assert_eq!(report.stats.duplicates_dropped, 1);

    let first = orchestrator.flush().unwrap();
    let json_once = std::fs::read_to_string(&first[0]).unwrap();
    let second = orchestrator.flush().unwrap();
    assert_eq!(first, second);
    assert_eq!(std::fs::read_to_string(&second[0]).unwrap(), json_once);

    let exported: Value = serde_json::from_str(&json_once).unwrap();
    assert_eq!(exported.as_array().unwrap().len(), 2);
    assert!(dir.path().join("records.csv").exists());
}

#[tokio::test]
async fn test_transforms_and_attributes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/item"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body>
                <h1>  Ceramic
                   Mug </h1>
                <span class="price">¥1,280</span>
                <a class="shop" href="/shop/mugs">More mugs</a>
            </body></html>"#,
        ))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(vec![format!("{}/item", server.uri())], dir.path());
    let mut title = text_field("title", "h1");
    title.kind = FieldKind::Transform;
    title.transform = Some("collapse_whitespace".into());
    let mut price = text_field("price", ".price");
    price.kind = FieldKind::Transform;
    price.transform = Some("number".into());
    let mut shop = text_field("shop", "a.shop");
    shop.kind = FieldKind::Attribute;
    shop.attribute = Some("href".into());
    config.fields = vec![title, price, shop];

    let orchestrator = Orchestrator::new(config).unwrap();
    let report = orchestrator.run(vec![]).await;
    assert_eq!(report.stats.records, 1);

    let written = orchestrator.flush().unwrap();
    let exported: Value =
        serde_json::from_str(&std::fs::read_to_string(&written[0]).unwrap()).unwrap();
    let fields = &exported[0]["fields"];
    assert_eq!(fields["title"], "Ceramic Mug");
    assert_eq!(fields["price"], 1280.0);
    assert_eq!(fields["shop"], format!("{}/shop/mugs", server.uri()));
}

#[tokio::test]
async fn test_streamed_seeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page("Streamed")))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(vec![], dir.path());
    config.output.deduplicate = false;
    let orchestrator = Orchestrator::new(config).unwrap();

    let (tx, rx) = tokio::sync::mpsc::channel(1);
    let uri = server.uri();
    let producer = tokio::spawn(async move {
        for n in 0..4 {
            tx.send(format!("{}/stream/{}", uri, n)).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    });

    let report = orchestrator.run_stream(rx).await;
    producer.await.unwrap();

    assert_eq!(report.stats.succeeded, 4);
    assert_eq!(report.stats.records, 4);
}

/// Cancels the run from inside its first render and counts every render
struct CancellingRenderer {
    cancel: CancellationToken,
    renders: AtomicUsize,
}

#[async_trait]
impl Renderer for CancellingRenderer {
    async fn render(
        &self,
        url: &Url,
        _identity: &Identity,
        _wait: &WaitRule,
    ) -> Result<Rendered, RenderError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        self.cancel.cancel();
        Ok(Rendered {
            final_url: url.clone(),
            status: 200,
            body: page(url.path()),
        })
    }
}

#[tokio::test]
async fn test_cancel_stops_queued_work() {
    let dir = TempDir::new().unwrap();
    let seeds: Vec<String> = (0..200)
        .map(|n| format!("https://shop.example/item/{}", n))
        .collect();
    let mut config = test_config(seeds.clone(), dir.path());
    config.scraper.concurrent_requests = 1;

    let cancel = CancellationToken::new();
    let renderer = Arc::new(CancellingRenderer {
        cancel: cancel.clone(),
        renders: AtomicUsize::new(0),
    });
    let orchestrator = Orchestrator::builder(config)
        .renderer(renderer.clone())
        .cancel_token(cancel)
        .build()
        .unwrap();

    let report = orchestrator.run(vec![]).await;
    let stats = &report.stats;

    assert_eq!(renderer.renders.load(Ordering::SeqCst), 1);
    assert_eq!(stats.attempted, 1);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(
        stats.attempted + stats.discarded + stats.failed + stats.skipped,
        seeds.len() as u64,
        "{:?}",
        stats
    );
}

#[tokio::test]
async fn test_sitemap_pages_become_seeds() {
    let server = MockServer::start().await;
    let uri = server.uri();
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
            <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
              <url><loc>{0}/items/1</loc></url>
              <url><loc>{0}/items/2</loc></url>
              <url><loc>{0}/seeded</loc></url>
            </urlset>"#,
            uri
        )))
        .expect(1)
        .mount(&server)
        .await;
    for (route, title) in [("/items/1", "One"), ("/items/2", "Two"), ("/seeded", "Seeded")] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(page(title)))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let mut config = test_config(vec![format!("{}/seeded", uri)], dir.path());
    config.sitemaps = vec![format!("{}/sitemap.xml", uri)];
    let orchestrator = Orchestrator::new(config).unwrap();

    let report = orchestrator.run(vec![]).await;

    // The sitemap repeats a configured seed, which is fetched once
    assert_eq!(report.stats.attempted, 3);
    assert_eq!(report.stats.succeeded, 3);
    assert_eq!(report.stats.records, 3);
}
