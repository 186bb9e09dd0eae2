//! Resolver capability and identity.
//!
//! A [`Resolver`] is a shared handle to a [`RequestResolver`]. Its identity
//! is the handle's allocation: clones of one handle are the same resolver
//! and their requests merge into one batch, while two handles built
//! separately never merge, even when they wrap structurally identical
//! resolvers. Captured context may differ between such resolvers, so
//! merging them would not be safe.

mod function;
mod traits;

use std::any::TypeId;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub use function::{BatchFnResolver, FnResolver};
pub use traits::{BatchEntry, RequestResolver};

use crate::request::Request;

/// Identity used to decide which requests may share a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolverId {
    request_type: TypeId,
    address: usize,
}

/// Shared handle to a resolver.
pub struct Resolver<R: Request> {
    inner: Arc<dyn RequestResolver<R>>,
}

impl<R: Request> Clone for Resolver<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Request> Resolver<R> {
    /// Wraps a resolver implementation in a new handle with its own identity.
    pub fn new(resolver: impl RequestResolver<R>) -> Self {
        Self {
            inner: Arc::new(resolver),
        }
    }

    /// Builds a resolver that handles each request with an individual call.
    ///
    /// Calls belonging to one batch run concurrently.
    pub fn from_fn<F, Fut>(name: impl Into<String>, resolve: F) -> Self
    where
        F: Fn(R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Value, R::Error>> + Send + 'static,
    {
        Self::new(FnResolver::new(name.into(), resolve))
    }

    /// Builds a resolver that handles a whole batch with a single call.
    pub fn from_batch_fn<F, Fut>(name: impl Into<String>, resolve: F) -> Self
    where
        F: Fn(Vec<R>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Result<R::Value, R::Error>>, R::Error>> + Send + 'static,
    {
        Self::new(BatchFnResolver::new(name.into(), resolve))
    }

    /// Returns the merge identity of this handle.
    pub fn id(&self) -> ResolverId {
        ResolverId {
            request_type: TypeId::of::<R>(),
            address: Arc::as_ptr(&self.inner) as *const () as usize,
        }
    }

    /// Diagnostic name of the wrapped resolver.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub(crate) async fn run_batch(&self, batch: &[BatchEntry<R>]) -> Result<(), R::Error> {
        self.inner.run_batch(batch).await
    }
}

impl<R: Request> fmt::Debug for Resolver<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("name", &self.name())
            .field("id", &self.id())
            .finish()
    }
}
