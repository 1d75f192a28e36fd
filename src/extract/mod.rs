//! Record extraction
//!
//! Turns a fetched document into a [`Record`] by applying compiled
//! [`FieldRule`]s. An extraction error is a terminal failure for that one
//! page and never aborts the run.

mod rules;
mod transforms;

pub use rules::{compile_rules, FieldRule, RuleKind};
pub use transforms::{Transform, TransformFn, TransformRegistry};

use crate::state::FetchedPage;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use url::Url;

/// Attributes whose values are resolved against the page URL
const URL_ATTRIBUTES: &[&str] = &["href", "src", "action"];

/// Errors that reject a single page
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("document is empty")]
    EmptyDocument,

    #[error("required field '{field}' not found")]
    MissingRequired { field: String },
}

/// One structured record extracted from a page
#[derive(Debug, Clone, Serialize)]
pub struct Record {
    /// URL the document was served from
    pub url: String,

    /// Field values keyed by field name
    pub fields: BTreeMap<String, Value>,

    pub scraped_at: DateTime<Utc>,

    /// Rules whose selector matched at least one element
    #[serde(skip)]
    matched: usize,
}

impl Record {
    pub fn new(url: impl Into<String>, fields: BTreeMap<String, Value>) -> Self {
        let matched = fields.values().filter(|v| !is_empty_value(v)).count();
        Self {
            url: url.into(),
            fields,
            scraped_at: Utc::now(),
            matched,
        }
    }

    /// Returns true if any rule matched the document
    ///
    /// Values filled in from a rule's default do not count.
    pub fn has_content(&self) -> bool {
        self.matched > 0
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Extraction collaborator
pub trait Extractor: Send + Sync {
    fn extract(&self, page: &FetchedPage, rules: &[FieldRule]) -> Result<Record, ExtractionError>;
}

/// Default extractor applying CSS selector rules
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorExtractor;

impl Extractor for SelectorExtractor {
    fn extract(&self, page: &FetchedPage, rules: &[FieldRule]) -> Result<Record, ExtractionError> {
        if page.body.trim().is_empty() {
            return Err(ExtractionError::EmptyDocument);
        }

        let document = Html::parse_document(&page.body);
        let mut fields = BTreeMap::new();
        let mut matched = 0;

        for rule in rules {
            match apply_rule(&document, rule, &page.final_url) {
                Some(value) => {
                    matched += 1;
                    fields.insert(rule.name.clone(), value);
                }
                None => match &rule.default {
                    Some(default) => {
                        fields.insert(rule.name.clone(), Value::String(default.clone()));
                    }
                    None if rule.required => {
                        return Err(ExtractionError::MissingRequired {
                            field: rule.name.clone(),
                        });
                    }
                    None => {
                        fields.insert(rule.name.clone(), Value::Null);
                    }
                },
            }
        }

        Ok(Record {
            url: page.final_url.to_string(),
            fields,
            scraped_at: Utc::now(),
            matched,
        })
    }
}

/// Applies one rule; `None` when nothing usable matched
fn apply_rule(document: &Html, rule: &FieldRule, base: &Url) -> Option<Value> {
    let mut matches = document.select(&rule.selector);

    match &rule.kind {
        RuleKind::Text => matches
            .next()
            .map(element_text)
            .filter(|text| !text.is_empty())
            .map(Value::String),
        RuleKind::Attribute(attribute) => matches
            .find_map(|el| read_attribute(el, attribute, base))
            .map(Value::String),
        RuleKind::Multiple { attribute } => {
            let values: Vec<Value> = matches
                .filter_map(|el| match attribute {
                    Some(attribute) => read_attribute(el, attribute, base),
                    None => Some(element_text(el)).filter(|text| !text.is_empty()),
                })
                .map(Value::String)
                .collect();
            (!values.is_empty()).then_some(Value::Array(values))
        }
        RuleKind::Transform {
            transform,
            attribute,
        } => {
            let raw = match attribute {
                Some(attribute) => matches.find_map(|el| read_attribute(el, attribute, base)),
                None => matches.next().map(element_text),
            }?;
            Some(transform.apply(&raw))
        }
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

fn read_attribute(element: ElementRef<'_>, attribute: &str, base: &Url) -> Option<String> {
    let value = element.value().attr(attribute)?.trim();
    if value.is_empty() {
        return None;
    }
    if URL_ATTRIBUTES.contains(&attribute) {
        if let Ok(absolute) = base.join(value) {
            return Some(absolute.to_string());
        }
    }
    Some(value.to_string())
}
