//! Observability infrastructure for rsquery.
//!
//! This module provides:
//! - Structured logging configuration
//! - Registration of the request cache metric descriptions

mod logging;

pub use logging::{create_json_subscriber, init_logging, LoggingConfig};
pub use rsquery_domain::cache::register_cache_metrics;
