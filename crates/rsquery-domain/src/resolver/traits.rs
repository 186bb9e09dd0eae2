//! Traits implemented by request resolvers.

use async_trait::async_trait;

use crate::completion::Completion;
use crate::request::Request;

/// One request handed to a resolver together with the channel its outcome
/// must be written to.
#[derive(Debug)]
pub struct BatchEntry<R: Request> {
    request: R,
    completion: Completion<R::Value, R::Error>,
}

impl<R: Request> BatchEntry<R> {
    pub(crate) fn new(request: R, completion: Completion<R::Value, R::Error>) -> Self {
        Self {
            request,
            completion,
        }
    }

    /// The request to resolve.
    pub fn request(&self) -> &R {
        &self.request
    }

    /// Writes the outcome. Returns `false` if one was already written.
    pub fn complete(&self, result: Result<R::Value, R::Error>) -> bool {
        self.completion.complete(result)
    }

    /// Completes the request successfully.
    pub fn succeed(&self, value: R::Value) -> bool {
        self.completion.succeed(value)
    }

    /// Completes the request with its own failure.
    pub fn fail(&self, error: R::Error) -> bool {
        self.completion.fail(error)
    }

    /// Returns true while no outcome has been written.
    pub fn is_pending(&self) -> bool {
        self.completion.is_pending()
    }

    pub(crate) fn completion(&self) -> &Completion<R::Value, R::Error> {
        &self.completion
    }
}

/// Capability that executes a batch of same-typed requests.
///
/// # Contract
///
/// `run_batch` must complete every entry exactly once before returning.
/// Entries arrive in the order their requests were enqueued. Returning
/// `Err` means the whole batch failed; the dispatcher then fails every
/// entry that is still pending with that error. Returning with entries
/// still pending is a protocol violation and aborts the run.
#[async_trait]
pub trait RequestResolver<R: Request>: Send + Sync + 'static {
    /// Diagnostic name used in logs and errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Resolves every entry of the batch.
    async fn run_batch(&self, batch: &[BatchEntry<R>]) -> Result<(), R::Error>;
}
