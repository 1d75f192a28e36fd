//! Named value transforms for `transform` fields

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
        .expect("Email regex is hardcoded and valid")
});

// International numbers need a leading `+`; the rest are read as NANP
static PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\+\d{1,3}[-.\s]?\d{2,4}[-.\s]?\d{3,4}[-.\s]?\d{3,4}\b|(?:\+?1[-.\s]?)?(?:\(\d{3}\)|\d{3})[-.\s]?\d{3}[-.\s]?\d{4}\b",
    )
    .expect("Phone regex is hardcoded and valid")
});

/// A transform turns the raw extracted string into a record value
pub type TransformFn = fn(&str) -> Value;

/// A named transform
#[derive(Clone)]
pub struct Transform {
    name: String,
    apply: TransformFn,
}

impl Transform {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, raw: &str) -> Value {
        (self.apply)(raw)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Transform").field(&self.name).finish()
    }
}

/// Registry of transforms that selector rules may reference by name
#[derive(Debug, Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, Transform>,
}

impl TransformRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in transforms
    ///
    /// `trim`, `lowercase`, `uppercase`, `collapse_whitespace`, `number`,
    /// `emails` and `phones`.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("trim", trim);
        registry.register("lowercase", lowercase);
        registry.register("uppercase", uppercase);
        registry.register("collapse_whitespace", collapse_whitespace);
        registry.register("number", number);
        registry.register("emails", emails);
        registry.register("phones", phones);
        registry
    }

    /// Adds or replaces a transform
    pub fn register(&mut self, name: impl Into<String>, apply: TransformFn) {
        let name = name.into();
        self.transforms
            .insert(name.clone(), Transform { name, apply });
    }

    pub fn get(&self, name: &str) -> Option<Transform> {
        self.transforms.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }
}

fn trim(raw: &str) -> Value {
    Value::String(raw.trim().to_string())
}

fn lowercase(raw: &str) -> Value {
    Value::String(raw.trim().to_lowercase())
}

fn uppercase(raw: &str) -> Value {
    Value::String(raw.trim().to_uppercase())
}

/// Collapses whitespace runs to one space and strips control characters
fn collapse_whitespace(raw: &str) -> Value {
    let cleaned: String = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|c| !c.is_control())
        .collect();
    Value::String(cleaned)
}

/// Parses the first number in the text, `null` when there is none
///
/// Thousands separators are ignored, so `"$1,299.50"` yields `1299.5`.
fn number(raw: &str) -> Value {
    first_number(raw)
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Every distinct email address in the text, in order of appearance
fn emails(raw: &str) -> Value {
    distinct(EMAIL_PATTERN.find_iter(raw).map(|m| m.as_str().to_string()))
}

/// Every distinct phone number in the text, reduced to digits and a
/// leading `+`
fn phones(raw: &str) -> Value {
    distinct(PHONE_PATTERN.find_iter(raw).map(|m| {
        m.as_str()
            .chars()
            .enumerate()
            .filter(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '+'))
            .map(|(_, c)| c)
            .collect()
    }))
}

fn distinct(found: impl Iterator<Item = String>) -> Value {
    let mut seen = HashSet::new();
    Value::Array(
        found
            .filter(|item| seen.insert(item.clone()))
            .map(Value::String)
            .collect(),
    )
}

fn first_number(raw: &str) -> Option<f64> {
    let chars: Vec<char> = raw.chars().collect();
    let start = chars.iter().position(char::is_ascii_digit)?;

    let negative = start > 0 && chars[start - 1] == '-';
    let mut digits = String::new();
    let mut seen_dot = false;
    let mut i = start;

    while i < chars.len() {
        let c = chars[i];
        let next_is_digit = chars.get(i + 1).map_or(false, char::is_ascii_digit);
        match c {
            '0'..='9' => digits.push(c),
            ',' if next_is_digit && !seen_dot => {}
            '.' if next_is_digit && !seen_dot => {
                seen_dot = true;
                digits.push(c);
            }
            _ => break,
        }
        i += 1;
    }

    let value: f64 = digits.parse().ok()?;
    Some(if negative { -value } else { value })
}
