//! rsquery-domain: Request batching, deduplication and caching core
//!
//! This crate contains the machinery that turns independent data fetches
//! into a minimal number of batched resolver calls:
//! - Request and resolver abstractions
//! - Single-assignment completion channels
//! - Blocked-step model and the query combinators that build it
//! - TTL/LRU request cache with in-flight sharing
//! - The dispatcher driving suspend → resolve → resume rounds
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               rsquery-domain                 │
//! ├─────────────────────────────────────────────┤
//! │  request.rs    - Request trait              │
//! │  resolver/     - Resolver capability        │
//! │  completion.rs - Completion channels        │
//! │  blocked.rs    - Blocked requests & merge   │
//! │  query.rs      - Query combinators          │
//! │  cache/        - Request cache              │
//! │  dispatcher/   - Dispatch loop              │
//! └─────────────────────────────────────────────┘
//! ```

pub mod blocked;
pub mod cache;
pub mod completion;
pub mod dispatcher;
pub mod error;
pub mod query;
pub mod request;
pub mod resolver;

// Re-export commonly used types at the crate root
pub use blocked::BlockedRequests;
pub use cache::{make_cache, CacheConfig, CacheKeys, CacheStats, CacheView, RequestCache};
pub use completion::Completion;
pub use dispatcher::{DispatchState, Dispatcher, DispatcherConfig, RunStats};
pub use error::{CacheConfigError, ProtocolViolation, QueryError, QueryResult};
pub use query::{submit, Query, Step, StepContext};
pub use request::Request;
pub use resolver::{BatchEntry, RequestResolver, Resolver, ResolverId};
