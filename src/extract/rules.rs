//! Compiled selector rules

use super::transforms::{Transform, TransformRegistry};
use crate::config::{FieldConfig, FieldKind};
use crate::ConfigError;
use scraper::Selector;
use std::collections::HashSet;

/// What a rule reads from the matched elements
#[derive(Debug, Clone)]
pub enum RuleKind {
    /// Text content of the first match
    Text,

    /// An attribute of the first match
    Attribute(String),

    /// Text (or `attribute`) of every match, as a list
    Multiple { attribute: Option<String> },

    /// Text (or `attribute`) of the first match passed through a named transform
    Transform {
        transform: Transform,
        attribute: Option<String>,
    },
}

/// A field rule with its selector parsed and transform resolved
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub name: String,
    pub selector: Selector,
    pub kind: RuleKind,
    pub default: Option<String>,
    pub required: bool,
}

/// Compiles `[[fields]]` entries into rules
///
/// Fails on an empty or duplicate field name, an unparsable selector, an
/// `attribute` field without an attribute, or an unknown transform.
pub fn compile_rules(
    fields: &[FieldConfig],
    transforms: &TransformRegistry,
) -> Result<Vec<FieldRule>, ConfigError> {
    let mut names = HashSet::new();
    fields
        .iter()
        .map(|field| {
            if field.name.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Field name must not be empty".to_string(),
                ));
            }
            if !names.insert(field.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate field name '{}'",
                    field.name
                )));
            }
            compile_rule(field, transforms)
        })
        .collect()
}

fn compile_rule(
    field: &FieldConfig,
    transforms: &TransformRegistry,
) -> Result<FieldRule, ConfigError> {
    let selector =
        Selector::parse(&field.selector).map_err(|e| ConfigError::InvalidSelector {
            field: field.name.clone(),
            message: e.to_string(),
        })?;

    let kind = match field.kind {
        FieldKind::Text => RuleKind::Text,
        FieldKind::Attribute => {
            let attribute = field.attribute.clone().ok_or_else(|| {
                ConfigError::Validation(format!(
                    "Field '{}' has kind 'attribute' but no attribute",
                    field.name
                ))
            })?;
            RuleKind::Attribute(attribute)
        }
        FieldKind::Multiple => RuleKind::Multiple {
            attribute: field.attribute.clone(),
        },
        FieldKind::Transform => {
            let name = field.transform.clone().ok_or_else(|| {
                ConfigError::Validation(format!(
                    "Field '{}' has kind 'transform' but no transform",
                    field.name
                ))
            })?;
            let transform = transforms
                .get(&name)
                .ok_or_else(|| ConfigError::UnknownTransform {
                    field: field.name.clone(),
                    transform: name,
                })?;
            RuleKind::Transform {
                transform,
                attribute: field.attribute.clone(),
            }
        }
    };

    Ok(FieldRule {
        name: field.name.clone(),
        selector,
        kind,
        default: field.default.clone(),
        required: field.required,
    })
}
