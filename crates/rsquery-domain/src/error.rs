//! Error types for query execution and cache construction.

use thiserror::Error;

/// A resolver returned control without completing every request it was given.
///
/// This indicates a bug in the resolver rather than a data error, so the
/// dispatcher aborts the run instead of retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("resolver '{resolver}' returned with {unresolved} request(s) still pending")]
pub struct ProtocolViolation {
    /// Diagnostic name of the offending resolver.
    pub resolver: String,
    /// Number of requests left without a result.
    pub unresolved: usize,
}

/// Errors surfaced by running a query to completion.
#[derive(Debug, Clone, Error)]
pub enum QueryError<E> {
    /// A request failed with its domain error.
    ///
    /// Whole-batch resolver failures also surface here: every request of the
    /// failed batch is completed with the resolver's error.
    #[error("request failed: {0}")]
    Request(E),

    /// A resolver left requests pending.
    #[error(transparent)]
    ProtocolViolation(#[from] ProtocolViolation),

    /// A dispatch round exceeded the configured timeout.
    #[error("dispatch round timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl<E> QueryError<E> {
    /// Returns the domain error if this is a request failure.
    pub fn request_error(&self) -> Option<&E> {
        match self {
            QueryError::Request(error) => Some(error),
            _ => None,
        }
    }

    /// Returns true if the run was aborted by a misbehaving resolver.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, QueryError::ProtocolViolation(_))
    }
}

/// Result type for query runs.
pub type QueryResult<T, E> = Result<T, QueryError<E>>;

/// Invalid cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheConfigError {
    /// Capacity must be a positive integer.
    #[error("cache capacity must be greater than 0")]
    ZeroCapacity,
}
