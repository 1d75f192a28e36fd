use url::Url;

/// Returns the key identifying a URL's network authority (`host:port`)
///
/// The host is lowercased and the port falls back to the scheme default, so
/// `http://Example.com/a` and `http://example.com:80/b` share a key. This key
/// is what per-host pacing and robots.txt caching are tracked against.
///
/// # Returns
///
/// * `Some(String)` - The authority key
/// * `None` - If the URL has no host
///
/// # Examples
///
/// ```
/// use url::Url;
/// use kumo_harvest::url::host_key;
///
/// let url = Url::parse("https://EXAMPLE.com/path").unwrap();
/// assert_eq!(host_key(&url), Some("example.com:443".to_string()));
/// ```
pub fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port_or_known_default() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}

/// Builds the robots.txt location for the origin serving `url`
pub fn robots_url(url: &Url) -> Option<Url> {
    url.host_str()?;
    url.join("/robots.txt").ok()
}
