//! XML sitemap seeding
//!
//! A run can list sitemaps next to its seeds. Every `<url><loc>` entry
//! becomes a seed; `<sitemap><loc>` entries of a sitemap index are fetched
//! in turn, a bounded number of levels deep.

use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use std::collections::HashSet;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Sitemap index levels followed below the configured sitemaps
const MAX_INDEX_DEPTH: usize = 3;

#[derive(Debug, Error)]
pub enum SitemapError {
    #[error("Failed to fetch sitemap: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Sitemap returned HTTP {0}")]
    Status(u16),

    #[error("Invalid sitemap XML: {0}")]
    Xml(String),
}

/// `<loc>` entries of one sitemap document
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SitemapEntries {
    /// Page URLs from `<url>` elements
    pub pages: Vec<String>,

    /// Child sitemaps from `<sitemap>` elements of an index
    pub sitemaps: Vec<String>,
}

#[derive(Clone, Copy)]
enum Parent {
    Page,
    Sitemap,
}

/// Parses a `<urlset>` or `<sitemapindex>` document
///
/// Namespaces are ignored, so prefixed and unprefixed documents read the
/// same. Unknown elements are skipped.
pub fn parse_sitemap(xml: &str) -> Result<SitemapEntries, SitemapError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = SitemapEntries::default();
    let mut parent = None;
    let mut in_loc = false;
    let mut loc = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"url" => parent = Some(Parent::Page),
                b"sitemap" => parent = Some(Parent::Sitemap),
                b"loc" => {
                    in_loc = true;
                    loc.clear();
                }
                _ => {}
            },
            Ok(Event::Text(e)) if in_loc => {
                let text = e.unescape().map_err(|e| SitemapError::Xml(e.to_string()))?;
                loc.push_str(text.trim());
            }
            Ok(Event::CData(e)) if in_loc => {
                loc.push_str(String::from_utf8_lossy(&e.into_inner()).trim());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"loc" => {
                    in_loc = false;
                    if !loc.is_empty() {
                        match parent {
                            Some(Parent::Page) => entries.pages.push(loc.clone()),
                            Some(Parent::Sitemap) => entries.sitemaps.push(loc.clone()),
                            None => {}
                        }
                    }
                }
                b"url" | b"sitemap" => parent = None,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SitemapError::Xml(format!(
                    "at byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(entries)
}

/// Fetches and parses one sitemap
pub async fn fetch_sitemap(client: &Client, url: &str) -> Result<SitemapEntries, SitemapError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(SitemapError::Status(status.as_u16()));
    }
    let body = response.text().await?;
    parse_sitemap(&body)
}

/// Collects the page URLs of `roots`, following sitemap indexes
///
/// Each sitemap is fetched at most once. A sitemap that cannot be fetched
/// or parsed is logged and skipped; the pages gathered so far are returned
/// when `cancel` fires.
pub async fn collect_sitemap_urls(
    client: &Client,
    roots: &[String],
    cancel: &CancellationToken,
) -> Vec<String> {
    let mut fetched = HashSet::new();
    let mut pages = Vec::new();
    let mut level = roots.to_vec();

    for depth in 0..=MAX_INDEX_DEPTH {
        let mut nested = Vec::new();

        for sitemap in level {
            if !fetched.insert(sitemap.clone()) {
                continue;
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return pages,
                result = fetch_sitemap(client, &sitemap) => result,
            };

            match result {
                Ok(entries) => {
                    tracing::info!(
                        sitemap = %sitemap,
                        pages = entries.pages.len(),
                        nested = entries.sitemaps.len(),
                        "Read sitemap"
                    );
                    pages.extend(entries.pages);
                    nested.extend(entries.sitemaps);
                }
                Err(e) => tracing::warn!(sitemap = %sitemap, error = %e, "Skipping sitemap"),
            }
        }

        if nested.is_empty() {
            break;
        }
        if depth == MAX_INDEX_DEPTH {
            tracing::warn!(skipped = nested.len(), "Sitemap indexes nested too deep");
            break;
        }
        level = nested;
    }

    pages
}
