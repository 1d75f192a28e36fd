//! CAPTCHA detection and the solver hook

use async_trait::async_trait;
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

/// Markup that identifies a CAPTCHA challenge page
const CAPTCHA_SIGNATURES: &[&str] = &[
    "img[src*='captcha']",
    ".captcha",
    "#captcha",
    ".g-recaptcha",
    ".h-captcha",
    "iframe[src*='recaptcha']",
];

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha not solved: {0}")]
    Unsolved(String),

    #[error("captcha solver unavailable: {0}")]
    Unavailable(String),
}

/// Pluggable CAPTCHA solver
///
/// Invoked by the fetch executor when a rendered page matches a CAPTCHA
/// signature. Returns the document to use in place of the challenge page.
#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    async fn solve(&self, url: &Url, document: &str) -> Result<String, CaptchaError>;
}

/// Returns the first CAPTCHA signature found in the document
pub fn detect_captcha(document: &str) -> Option<&'static str> {
    let html = Html::parse_document(document);
    CAPTCHA_SIGNATURES.iter().copied().find(|signature| {
        Selector::parse(signature)
            .map(|selector| html.select(&selector).next().is_some())
            .unwrap_or(false)
    })
}
