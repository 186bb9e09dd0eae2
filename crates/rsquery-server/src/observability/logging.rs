//! Structured logging configuration.
//!
//! Dispatch rounds run inside a `dispatch_round` span, so every resolver
//! call is attributed to the round that issued it. Setting `logging.spans`
//! also logs when each round starts and ends.
//!
//! # Log Format
//!
//! When JSON formatting is enabled, log entries are output as JSON objects:
//!
//! ```json
//! {"timestamp":"2026-01-15T10:30:00.000Z","level":"DEBUG","target":"rsquery_domain::dispatcher::round","fields":{"message":"invoking resolver","resolver":"users","batch_size":3}}
//! ```

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use crate::config::LoggingSettings;

/// Configuration for structured logging.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Whether to use JSON format (true) or text format (false)
    pub json_format: bool,
    /// The default log level if RUST_LOG is not set
    pub default_level: Level,
    /// Whether to include span events (enter/exit)
    pub include_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json_format: false,
            default_level: Level::INFO,
            include_spans: false,
        }
    }
}

impl LoggingConfig {
    /// Builds the logging configuration described by the settings section.
    ///
    /// An unparseable level falls back to INFO; [`ServerConfig::validate`]
    /// rejects those before they get here.
    ///
    /// [`ServerConfig::validate`]: crate::config::ServerConfig::validate
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            json_format: settings.json,
            default_level: Level::from_str(&settings.level).unwrap_or(Level::INFO),
            include_spans: settings.spans,
        }
    }
}

/// Initialize the logging subsystem with the given configuration.
///
/// Returns false if a global subscriber was already installed, in which
/// case the call has no effect.
pub fn init_logging(config: LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.to_string()));

    let span_events = if config.include_spans {
        FmtSpan::ENTER | FmtSpan::EXIT
    } else {
        FmtSpan::NONE
    };

    let installed = if config.json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_span_events(span_events)
                    .with_current_span(true)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_span_events(span_events)
                    .with_target(true),
            )
            .try_init()
    };

    installed.is_ok()
}

/// Creates a JSON subscriber writing to `writer`, for capturing log output
/// in tests.
pub fn create_json_subscriber<W>(writer: W) -> impl tracing::Subscriber + Send + Sync
where
    W: for<'writer> tracing_subscriber::fmt::MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(EnvFilter::new("trace"))
        .with(
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_target(true)
                .with_current_span(true),
        )
}
