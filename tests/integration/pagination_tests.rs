use crate::common::test_config;
use kumo_harvest::config::PaginationConfig;
use kumo_harvest::state::SequenceState;
use kumo_harvest::Orchestrator;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn listing(n: u32, next: Option<&str>) -> String {
    let link = next
        .map(|href| format!(r#"<a class="next" href="{}">Next</a>"#, href))
        .unwrap_or_default();
    format!("<html><body><h1>Listing {}</h1>{}</body></html>", n, link)
}

#[tokio::test]
async fn test_follows_next_links_until_last_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(1, Some("/list/2"))))
        .expect(1)
        .mount(&server)
        .await;
    for n in 2..=3u32 {
        let next = format!("/list/{}", n + 1);
        Mock::given(method("GET"))
            .and(path(format!("/list/{}", n)))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(n, Some(&next))))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/list/4"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(4, None)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(vec![format!("{}/list", server.uri())], dir.path());
    config.pagination = Some(PaginationConfig {
        next_selector: Some("a.next".into()),
        ..PaginationConfig::default()
    });
    let orchestrator = Orchestrator::new(config).unwrap();

    let report = orchestrator.run(vec![]).await;

    assert_eq!(report.stats.succeeded, 4);
    assert_eq!(report.stats.records, 4);
    assert_eq!(report.lineages.len(), 1);
    assert_eq!(report.lineages[0].pages, 4);
    assert_eq!(report.lineages[0].state, SequenceState::Exhausted);
}

#[tokio::test]
async fn test_max_pages_bounds_lineage() {
    let server = MockServer::start().await;
    // Every page links to a fresh next page
    for n in 1..=5u32 {
        let next = format!("/feed/{}", n + 1);
        Mock::given(method("GET"))
            .and(path(format!("/feed/{}", n)))
            .respond_with(ResponseTemplate::new(200).set_body_string(listing(n, Some(&next))))
            .mount(&server)
            .await;
    }

    let dir = TempDir::new().unwrap();
    let mut config = test_config(vec![format!("{}/feed/1", server.uri())], dir.path());
    config.pagination = Some(PaginationConfig {
        max_pages: 3,
        next_selector: Some("a.next".into()),
        ..PaginationConfig::default()
    });
    let orchestrator = Orchestrator::new(config).unwrap();

    let report = orchestrator.run(vec![]).await;
    assert_eq!(report.stats.succeeded, 3);
    assert_eq!(report.lineages[0].pages, 3);
}

#[tokio::test]
async fn test_cycle_ends_lineage() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(1, Some("/b"))))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(2, Some("/a"))))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(vec![format!("{}/a", server.uri())], dir.path());
    config.pagination = Some(PaginationConfig {
        next_selector: Some("a.next".into()),
        ..PaginationConfig::default()
    });
    let orchestrator = Orchestrator::new(config).unwrap();

    let report = orchestrator.run(vec![]).await;
    assert_eq!(report.stats.succeeded, 2);
    assert_eq!(report.lineages[0].state, SequenceState::Exhausted);
}

#[tokio::test]
async fn test_query_param_stops_on_empty_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>No results</p>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(2, None)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(1, None)))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = test_config(vec![format!("{}/search?q=mug", server.uri())], dir.path());
    config.pagination = Some(PaginationConfig {
        page_param: Some("page".into()),
        ..PaginationConfig::default()
    });
    let orchestrator = Orchestrator::new(config).unwrap();

    let report = orchestrator.run(vec![]).await;

    assert_eq!(report.stats.succeeded, 3);
    assert_eq!(report.stats.records, 2);
    assert_eq!(report.lineages[0].pages, 3);
    assert_eq!(report.lineages[0].state, SequenceState::Exhausted);
}
