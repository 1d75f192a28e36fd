//! Integration tests for the scraping pipeline
//!
//! These tests use wiremock to create mock HTTP servers and run the
//! orchestrator end-to-end.

mod common;
mod pagination_tests;
mod politeness_tests;
mod resilience_tests;
mod run_tests;
