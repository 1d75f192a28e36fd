//! URL handling module for Kumo-Harvest
//!
//! This module provides URL normalization and the host key used to group
//! requests for rate pacing and robots.txt lookups.

mod domain;
mod normalize;

pub use domain::{host_key, robots_url};
pub use normalize::normalize_url;
