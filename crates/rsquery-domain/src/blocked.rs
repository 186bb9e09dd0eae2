//! Blocked requests: the request set a suspended query is waiting on.
//!
//! Requests are grouped by resolver identity. Merging two request sets is a
//! union of groups keyed by [`ResolverId`], so combining the suspensions of
//! any number of sibling branches costs O(groups) per merge and yields one
//! flat batch per resolver. Groups keep first-seen order and entries keep
//! enqueue order, which makes the merge associative and the order a resolver
//! observes deterministic.
//!
//! Requests issued while batching is disabled are kept as single-request
//! units that never merge with anything.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use futures::future::BoxFuture;

use crate::cache::RequestCache;
use crate::completion::Completion;
use crate::dispatcher::round;
use crate::error::ProtocolViolation;
use crate::request::Request;
use crate::resolver::{Resolver, ResolverId};

/// What dispatching one group cost.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct GroupReport {
    /// Number of `run_batch` invocations.
    pub(crate) resolver_calls: usize,
    /// Requests handed to the resolver.
    pub(crate) resolved: usize,
    /// Requests answered from a shared cache entry.
    pub(crate) cache_hits: usize,
}

/// A request waiting for dispatch, with the channel its continuation reads.
pub(crate) struct PendingRequest<R: Request> {
    pub(crate) request: R,
    pub(crate) completion: Completion<R::Value, R::Error>,
    pub(crate) cache: Option<RequestCache<R>>,
}

/// All pending requests for one resolver.
pub(crate) struct RequestGroup<R: Request> {
    pub(crate) resolver: Resolver<R>,
    pub(crate) entries: Vec<PendingRequest<R>>,
}

/// Type-erased view of a [`RequestGroup`].
pub(crate) trait BlockedGroup: Send {
    fn resolver_id(&self) -> ResolverId;

    fn resolver_name(&self) -> &str;

    fn len(&self) -> usize;

    /// Debug rendering of the queued requests, in enqueue order.
    fn describe(&self) -> Vec<String>;

    /// Appends the entries of `other` if it belongs to the same resolver.
    fn absorb(&mut self, other: Box<dyn BlockedGroup>) -> Result<(), Box<dyn BlockedGroup>>;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;

    fn dispatch(self: Box<Self>) -> BoxFuture<'static, Result<GroupReport, ProtocolViolation>>;
}

impl<R: Request> BlockedGroup for RequestGroup<R> {
    fn resolver_id(&self) -> ResolverId {
        self.resolver.id()
    }

    fn resolver_name(&self) -> &str {
        self.resolver.name()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn describe(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|entry| format!("{:?}", entry.request))
            .collect()
    }

    fn absorb(&mut self, other: Box<dyn BlockedGroup>) -> Result<(), Box<dyn BlockedGroup>> {
        if other.resolver_id() != self.resolver.id() {
            return Err(other);
        }
        match other.into_any().downcast::<RequestGroup<R>>() {
            Ok(group) => {
                self.entries.extend(group.entries);
                Ok(())
            }
            // ResolverId carries the request TypeId.
            Err(_) => unreachable!("resolver identity matched a group of another request type"),
        }
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }

    fn dispatch(self: Box<Self>) -> BoxFuture<'static, Result<GroupReport, ProtocolViolation>> {
        Box::pin(round::resolve_group(*self))
    }
}

/// The request set of a suspended query.
///
/// Every request carries a fresh, still-pending completion channel that the
/// query's continuation reads once the dispatcher has resolved the set.
#[derive(Default)]
pub struct BlockedRequests {
    groups: Vec<Box<dyn BlockedGroup>>,
    index: HashMap<ResolverId, usize>,
    singles: Vec<Box<dyn BlockedGroup>>,
}

impl BlockedRequests {
    /// Creates an empty request set.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn single<R: Request>(
        resolver: Resolver<R>,
        pending: PendingRequest<R>,
        batching: bool,
    ) -> Self {
        let group: Box<dyn BlockedGroup> = Box::new(RequestGroup {
            resolver,
            entries: vec![pending],
        });
        let mut blocked = Self::new();
        if batching {
            blocked.push_group(group);
        } else {
            blocked.singles.push(group);
        }
        blocked
    }

    fn push_group(&mut self, group: Box<dyn BlockedGroup>) {
        match self.index.get(&group.resolver_id()) {
            Some(&position) => {
                if let Err(group) = self.groups[position].absorb(group) {
                    self.singles.push(group);
                }
            }
            None => {
                self.index.insert(group.resolver_id(), self.groups.len());
                self.groups.push(group);
            }
        }
    }

    /// Combines two request sets.
    ///
    /// Groups with the same resolver identity are concatenated, `self`'s
    /// entries first. Duplicate requests are kept.
    pub fn merge(mut self, other: BlockedRequests) -> BlockedRequests {
        for group in other.groups {
            self.push_group(group);
        }
        self.singles.extend(other.singles);
        self
    }

    /// Total number of queued requests.
    pub fn request_count(&self) -> usize {
        self.groups
            .iter()
            .chain(self.singles.iter())
            .map(|group| group.len())
            .sum()
    }

    /// Number of resolver calls a dispatch of this set will make, before
    /// cache hits are taken into account.
    pub fn batch_count(&self) -> usize {
        self.groups.len() + self.singles.len()
    }

    /// Returns true if no request is queued.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.singles.is_empty()
    }

    /// Per-batch rendering of the queued requests: resolver name and the
    /// requests in the order the resolver will receive them.
    pub fn batches(&self) -> Vec<(String, Vec<String>)> {
        self.groups
            .iter()
            .chain(self.singles.iter())
            .map(|group| (group.resolver_name().to_string(), group.describe()))
            .collect()
    }

    pub(crate) fn into_units(self) -> Vec<Box<dyn BlockedGroup>> {
        let mut units = self.groups;
        units.extend(self.singles);
        units
    }
}

impl fmt::Debug for BlockedRequests {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockedRequests")
            .field("batches", &self.batch_count())
            .field("requests", &self.request_count())
            .finish()
    }
}
