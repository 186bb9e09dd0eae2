//! Tests for the dispatcher module.
//!
//! Organized by functionality:
//! - Batch collapsing and resolver identity
//! - Failure handling (per request, whole batch, protocol violations)
//! - Batching regions and sequential rounds
//! - Timeouts and run statistics
//! - Cache deduplication, expiry and eviction
//! - Concurrent runs sharing a cache
