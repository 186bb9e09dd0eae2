//! The request abstraction.

use std::fmt::Debug;
use std::hash::Hash;

/// An immutable, value-equal description of one unit of deferred work.
///
/// Equality and hashing come from the request's own fields, so two requests
/// built separately with the same payload are the same cache key. The
/// associated types describe what resolving the request produces; they carry
/// no runtime data.
///
/// Requests belonging to one resolver domain are usually a closed enum:
///
/// ```rust,ignore
/// #[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// enum UserRequest {
///     ById(u64),
///     ByEmail(String),
/// }
///
/// impl Request for UserRequest {
///     type Value = User;
///     type Error = ApiError;
/// }
/// ```
pub trait Request: Clone + Eq + Hash + Debug + Send + Sync + 'static {
    /// Successful outcome of the request.
    type Value: Clone + Send + Sync + 'static;
    /// Per-request failure.
    type Error: Clone + Send + Sync + 'static;
}
