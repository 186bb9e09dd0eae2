//! rsquery-server: Configuration, logging and runtime facade
//!
//! This crate hosts the query engine from `rsquery-domain`:
//! - Layered configuration (defaults, YAML file, environment)
//! - Structured logging initialisation
//! - A runtime that builds dispatchers and caches from configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               rsquery-server                 │
//! ├─────────────────────────────────────────────┤
//! │  config.rs      - Configuration management  │
//! │  observability/ - Logging and metrics       │
//! │  runtime.rs     - QueryRuntime facade       │
//! └─────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod observability;
pub mod runtime;

// Re-exports for convenience
pub use config::{ConfigLoadError, ServerConfig};
pub use runtime::QueryRuntime;
