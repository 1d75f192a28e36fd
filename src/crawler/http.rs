//! Plain HTTP renderer backed by reqwest

use crate::crawler::fetcher::{RenderError, Rendered, Renderer, WaitRule};
use crate::proxy::Identity;
use async_trait::async_trait;
use reqwest::{Client, Proxy};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - Value of the User-Agent header
/// * `timeout` - Whole-request timeout
/// * `proxy` - Proxy URL to route every request through, if any
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client (e.g. bad proxy URL)
pub fn build_http_client(
    user_agent: &str,
    timeout: Duration,
    proxy: Option<&str>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy)?);
    }

    builder.build()
}

/// Fetches raw HTML over HTTP
///
/// One client is kept per egress identity so connection pools are never
/// shared between proxies.
pub struct HttpRenderer {
    user_agent: String,
    timeout: Duration,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl HttpRenderer {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, identity: &Identity) -> Result<Client, RenderError> {
        let key = identity.proxy_address().map(str::to_string);
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = build_http_client(&self.user_agent, self.timeout, key.as_deref())
            .map_err(|e| RenderError::Proxy(e.to_string()))?;
        clients.insert(key, client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Renderer for HttpRenderer {
    async fn render(
        &self,
        url: &Url,
        identity: &Identity,
        _wait: &WaitRule,
    ) -> Result<Rendered, RenderError> {
        let client = self.client_for(identity)?;

        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e, identity))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest_error(&e, identity))?;

        Ok(Rendered {
            final_url,
            status,
            body,
        })
    }
}

/// Maps a reqwest error onto the renderer error taxonomy
fn classify_reqwest_error(e: &reqwest::Error, identity: &Identity) -> RenderError {
    if e.is_timeout() {
        RenderError::Timeout
    } else if e.is_builder() {
        RenderError::InvalidUrl(e.to_string())
    } else if e.is_connect() && matches!(identity, Identity::Proxy(_)) {
        RenderError::Proxy(e.to_string())
    } else {
        RenderError::Connection(e.to_string())
    }
}
