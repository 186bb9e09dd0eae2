//! Single-assignment completion channels.
//!
//! A [`Completion`] is the cell a resolver writes a request's outcome into
//! and every interested party reads it from. It starts `Pending` and moves
//! exactly once to `Completed` (success or failure). Clones share the same
//! cell, which is how a cache entry hands one in-flight result to many
//! waiters.
//!
//! If the party responsible for completing a channel goes away first (a
//! resolver that panicked or returned without answering), the channel is
//! marked `Abandoned`. Waiters observe that instead of hanging and can retry.
//!
//! Only the engine writes channels, through the [`BatchEntry`] it hands to a
//! resolver. Outside this crate a `Completion` is a read-only handle.
//!
//! [`BatchEntry`]: crate::resolver::BatchEntry

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
enum Slot<A, E> {
    Pending,
    Completed(Result<A, E>),
    Abandoned,
}

impl<A, E> Slot<A, E> {
    fn is_pending(&self) -> bool {
        matches!(self, Slot::Pending)
    }
}

/// Shared single-assignment result cell.
///
/// Handles returned to callers, such as [`RequestCache::get`], can be
/// inspected and awaited but not written:
///
/// ```compile_fail
/// use rsquery_domain::{make_cache, Request};
/// # use std::time::Duration;
/// # #[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// # struct Key(u32);
/// # impl Request for Key {
/// #     type Value = String;
/// #     type Error = String;
/// # }
/// let cache = make_cache::<Key>(16, Duration::from_secs(60)).unwrap();
/// if let Some(entry) = cache.view().get(&Key(1)) {
///     entry.succeed("forged".to_string());
/// }
/// ```
///
/// [`RequestCache::get`]: crate::cache::RequestCache::get
pub struct Completion<A, E> {
    slot: Arc<watch::Sender<Slot<A, E>>>,
}

impl<A, E> Clone for Completion<A, E> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<A, E> Completion<A, E>
where
    A: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a new pending channel.
    pub(crate) fn new() -> Self {
        let (slot, _) = watch::channel(Slot::Pending);
        Self {
            slot: Arc::new(slot),
        }
    }

    /// Writes the outcome.
    ///
    /// Returns `false` without changing anything if the channel was already
    /// completed or abandoned.
    pub(crate) fn complete(&self, result: Result<A, E>) -> bool {
        self.slot.send_if_modified(move |slot| {
            if slot.is_pending() {
                *slot = Slot::Completed(result);
                true
            } else {
                false
            }
        })
    }

    /// Completes the channel successfully.
    pub(crate) fn succeed(&self, value: A) -> bool {
        self.complete(Ok(value))
    }

    /// Completes the channel with a failure.
    pub(crate) fn fail(&self, error: E) -> bool {
        self.complete(Err(error))
    }

    /// Marks a still-pending channel as abandoned.
    pub(crate) fn abandon(&self) -> bool {
        self.slot.send_if_modified(|slot| {
            if slot.is_pending() {
                *slot = Slot::Abandoned;
                true
            } else {
                false
            }
        })
    }

    /// Returns true while no outcome has been written.
    pub fn is_pending(&self) -> bool {
        self.slot.borrow().is_pending()
    }

    /// Returns true once an outcome has been written.
    pub fn is_completed(&self) -> bool {
        matches!(*self.slot.borrow(), Slot::Completed(_))
    }

    /// Returns true if the writer went away without completing.
    pub fn is_abandoned(&self) -> bool {
        matches!(*self.slot.borrow(), Slot::Abandoned)
    }

    /// Returns the outcome if one has been written.
    pub fn peek(&self) -> Option<Result<A, E>> {
        match &*self.slot.borrow() {
            Slot::Completed(result) => Some(result.clone()),
            _ => None,
        }
    }

    /// Waits for the channel to leave the pending state.
    ///
    /// Returns `None` if the channel was abandoned.
    pub async fn wait(&self) -> Option<Result<A, E>> {
        let mut receiver = self.slot.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let slot = receiver.wait_for(|slot| !slot.is_pending()).await.ok()?;
        match &*slot {
            Slot::Completed(result) => Some(result.clone()),
            _ => None,
        }
    }

    /// Returns true if both handles refer to the same cell.
    pub fn same_channel(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<A, E> fmt::Debug for Completion<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.slot.borrow() {
            Slot::Pending => "pending",
            Slot::Completed(Ok(_)) => "succeeded",
            Slot::Completed(Err(_)) => "failed",
            Slot::Abandoned => "abandoned",
        };
        f.debug_struct("Completion").field("state", &state).finish()
    }
}
