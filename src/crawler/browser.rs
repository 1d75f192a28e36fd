//! Headless Chromium renderer
//!
//! One browser process is launched lazily per egress identity, since
//! Chromium takes its proxy as a launch flag. Each render opens a tab,
//! waits for the readiness rule, captures the DOM and closes the tab.

use crate::crawler::fetcher::{RenderError, Rendered, Renderer, WaitRule};
use crate::proxy::Identity;
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig as ChromeConfig};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

const SELECTOR_POLL: Duration = Duration::from_millis(100);

/// Renderer driving headless Chromium over the DevTools protocol
pub struct BrowserRenderer {
    headless: bool,
    user_agent: String,
    timeout: Duration,
    browsers: Mutex<HashMap<Option<String>, Arc<Browser>>>,
}

impl BrowserRenderer {
    pub fn new(headless: bool, user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            headless,
            user_agent: user_agent.into(),
            timeout,
            browsers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the browser for an identity, launching it on first use
    async fn browser_for(&self, identity: &Identity) -> Result<Arc<Browser>, RenderError> {
        let key = identity.proxy_address().map(str::to_string);
        let mut browsers = self.browsers.lock().await;

        if let Some(browser) = browsers.get(&key) {
            return Ok(Arc::clone(browser));
        }

        let browser = Arc::new(self.launch(key.as_deref()).await?);
        browsers.insert(key, Arc::clone(&browser));
        Ok(browser)
    }

    async fn launch(&self, proxy: Option<&str>) -> Result<Browser, RenderError> {
        let mut builder = ChromeConfig::builder()
            .no_sandbox()
            .request_timeout(self.timeout)
            .arg(format!("--user-agent={}", self.user_agent))
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run");

        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(proxy) = proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        let config = builder.build().map_err(RenderError::Launch)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| RenderError::Launch(e.to_string()))?;

        // The CDP handler must be polled for the connection to make progress
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!(error = %e, "Browser handler stopped");
                    break;
                }
            }
        });

        tracing::info!(proxy = proxy.unwrap_or("direct"), "Launched headless browser");
        Ok(browser)
    }
}

#[async_trait]
impl Renderer for BrowserRenderer {
    async fn render(
        &self,
        url: &Url,
        identity: &Identity,
        wait: &WaitRule,
    ) -> Result<Rendered, RenderError> {
        let browser = self.browser_for(identity).await?;

        let page = browser
            .new_page(url.as_str())
            .await
            .map_err(|e| RenderError::Browser(format!("navigation failed: {}", e)))?;

        if let Some(selector) = &wait.selector {
            let deadline = Instant::now() + self.timeout;
            while page.find_element(selector.as_str()).await.is_err() {
                if Instant::now() >= deadline {
                    let _ = page.close().await;
                    return Err(RenderError::Timeout);
                }
                tokio::time::sleep(SELECTOR_POLL).await;
            }
        }

        if let Some(settle) = wait.settle {
            tokio::time::sleep(settle).await;
        }

        let body = page
            .content()
            .await
            .map_err(|e| RenderError::Browser(format!("reading DOM failed: {}", e)))?;

        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .and_then(|u| Url::parse(&u).ok())
            .unwrap_or_else(|| url.clone());

        let _ = page.close().await;

        // The DevTools page API does not expose the document status
        Ok(Rendered {
            final_url,
            status: 200,
            body,
        })
    }
}
