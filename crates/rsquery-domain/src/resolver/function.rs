//! Resolvers built from async functions.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use futures::future::join_all;

use super::traits::{BatchEntry, RequestResolver};
use crate::request::Request;

/// Resolves each request of a batch with its own call, concurrently.
pub struct FnResolver<R, F> {
    name: String,
    resolve: F,
    _request: PhantomData<fn(R)>,
}

impl<R, F> FnResolver<R, F> {
    pub(crate) fn new(name: String, resolve: F) -> Self {
        Self {
            name,
            resolve,
            _request: PhantomData,
        }
    }
}

#[async_trait]
impl<R, F, Fut> RequestResolver<R> for FnResolver<R, F>
where
    R: Request,
    F: Fn(R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Value, R::Error>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_batch(&self, batch: &[BatchEntry<R>]) -> Result<(), R::Error> {
        let calls = batch.iter().map(|entry| {
            let call = (self.resolve)(entry.request().clone());
            async move {
                entry.complete(call.await);
            }
        });
        join_all(calls).await;
        Ok(())
    }
}

/// Resolves a whole batch with one call whose results are matched to the
/// requests by position.
///
/// A result vector shorter than the batch leaves the tail pending, which
/// the dispatcher reports as a protocol violation. Extra results are
/// ignored.
pub struct BatchFnResolver<R, F> {
    name: String,
    resolve: F,
    _request: PhantomData<fn(R)>,
}

impl<R, F> BatchFnResolver<R, F> {
    pub(crate) fn new(name: String, resolve: F) -> Self {
        Self {
            name,
            resolve,
            _request: PhantomData,
        }
    }
}

#[async_trait]
impl<R, F, Fut> RequestResolver<R> for BatchFnResolver<R, F>
where
    R: Request,
    F: Fn(Vec<R>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Result<R::Value, R::Error>>, R::Error>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_batch(&self, batch: &[BatchEntry<R>]) -> Result<(), R::Error> {
        let requests = batch.iter().map(|entry| entry.request().clone()).collect();
        let results = (self.resolve)(requests).await?;
        if results.len() != batch.len() {
            tracing::warn!(
                resolver = %self.name,
                expected = batch.len(),
                actual = results.len(),
                "batch function returned a mismatched number of results"
            );
        }
        for (entry, result) in batch.iter().zip(results) {
            entry.complete(result);
        }
        Ok(())
    }
}
