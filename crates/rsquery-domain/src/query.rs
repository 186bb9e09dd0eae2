//! Composable queries with explicit continuations.
//!
//! A [`Query`] is a deferred computation that may need external requests
//! resolved before it can finish. Stepping a query runs its pure parts
//! until it either finishes or reaches a request boundary, in which case it
//! returns [`Step::Blocked`] with the pending requests and a continuation
//! query that picks up where it left off. Pure steps never yield.
//!
//! Parallel combinators ([`Query::zip_par`], [`Query::collect_par`]) step
//! every branch and merge the request sets of all branches that blocked, so
//! requests issued from sibling branches end up in the same dispatch round
//! and therefore in the same resolver batch. Sequential combinators
//! ([`Query::and_then`], [`Query::collect_seq`]) only reach the next request
//! after the previous one resolved.
//!
//! Internally a query is a head plus a list of continuation frames. Chaining
//! a combinator appends a frame, and stepping unwinds the frames in a loop,
//! so arbitrarily deep chains run in constant call-stack depth.
//!
//! # Example
//!
//! ```rust,ignore
//! let notify_all = Query::fetch(GetTodos, &todos)
//!     .and_then(move |todos| {
//!         Query::for_each_par(todos, move |todo| {
//!             Query::fetch_cached(GetUserById(todo.owner_id), &users, &user_cache)
//!                 .and_then(move |user| Query::fetch(SendEmail::to(&user), &emails))
//!         })
//!     });
//!
//! let sent = Dispatcher::default().run(notify_all).await?;
//! ```

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;

use crate::blocked::{BlockedRequests, PendingRequest};
use crate::cache::RequestCache;
use crate::completion::Completion;
use crate::request::Request;
use crate::resolver::Resolver;

/// Execution settings visible while a query is being stepped.
#[derive(Debug, Clone)]
pub struct StepContext {
    batching: bool,
}

impl StepContext {
    /// Creates a context with the given batching default.
    pub fn new(batching_enabled: bool) -> Self {
        Self {
            batching: batching_enabled,
        }
    }

    /// Whether requests issued in the current region may be batched.
    pub fn batching_enabled(&self) -> bool {
        self.batching
    }

    fn replace_batching(&mut self, enabled: bool) -> bool {
        std::mem::replace(&mut self.batching, enabled)
    }
}

impl Default for StepContext {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Outcome of stepping a query.
pub enum Step<A, E> {
    /// The query finished with a value.
    Done(A),
    /// The query failed.
    Failed(E),
    /// The query is waiting on requests; the continuation resumes it once
    /// every request has completed.
    Blocked(BlockedRequests, Query<A, E>),
}

impl<A, E> fmt::Debug for Step<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Done(_) => f.write_str("Done"),
            Step::Failed(_) => f.write_str("Failed"),
            Step::Blocked(blocked, _) => f.debug_tuple("Blocked").field(blocked).finish(),
        }
    }
}

type Value = Box<dyn Any + Send>;
type Outcome = Result<Value, Value>;

/// What a program evaluates before applying its frames.
enum Head {
    Ready(Outcome),
    Leaf(Box<dyn FnOnce(&mut StepContext) -> Progress + Send>),
}

/// A continuation waiting for the outcome of everything above it.
enum Frame {
    OnValue(Box<dyn FnOnce(Value) -> Program + Send>),
    OnError(Box<dyn FnOnce(Value) -> Program + Send>),
    OnOutcome(Box<dyn FnOnce(Outcome) -> Program + Send>),
    EnterScope(bool),
    ExitScope,
}

enum Progress {
    Finished(Outcome),
    Blocked(BlockedRequests, Program),
}

/// Type-erased query: a head and the frames applied to its outcome, first
/// frame first.
struct Program {
    head: Head,
    frames: Vec<Frame>,
}

impl Program {
    fn ready(outcome: Outcome) -> Self {
        Self {
            head: Head::Ready(outcome),
            frames: Vec::new(),
        }
    }

    fn value<T: Send + 'static>(value: T) -> Self {
        Self::ready(Ok(Box::new(value)))
    }

    fn error<T: Send + 'static>(error: T) -> Self {
        Self::ready(Err(Box::new(error)))
    }

    fn then(mut self, frame: Frame) -> Self {
        self.frames.push(frame);
        self
    }

    /// Evaluates the program until it finishes or blocks.
    ///
    /// Pending frames live on a heap stack, so neither long combinator
    /// chains nor queries recursing through `and_then` grow the call stack.
    fn drive(self, cx: &mut StepContext) -> Progress {
        let base = cx.batching_enabled();
        let mut scopes: Vec<bool> = Vec::new();
        let mut stack: Vec<Frame> = Vec::new();
        let Program { mut head, frames } = self;
        stack.extend(frames.into_iter().rev());

        loop {
            let mut outcome = match head {
                Head::Ready(outcome) => outcome,
                Head::Leaf(run) => match run(cx) {
                    Progress::Finished(outcome) => outcome,
                    Progress::Blocked(blocked, next) => {
                        cx.replace_batching(base);
                        return Progress::Blocked(blocked, suspend(next, scopes, stack));
                    }
                },
            };

            head = loop {
                let Some(frame) = stack.pop() else {
                    cx.replace_batching(base);
                    return Progress::Finished(outcome);
                };
                let next = match (frame, outcome) {
                    (Frame::OnValue(f), Ok(value)) => f(value),
                    (Frame::OnError(f), Err(error)) => f(error),
                    (Frame::OnOutcome(f), result) => f(result),
                    (Frame::EnterScope(enabled), result) => {
                        scopes.push(enabled);
                        cx.replace_batching(enabled);
                        outcome = result;
                        continue;
                    }
                    (Frame::ExitScope, result) => {
                        scopes.pop();
                        cx.replace_batching(scopes.last().copied().unwrap_or(base));
                        outcome = result;
                        continue;
                    }
                    (_, result) => {
                        outcome = result;
                        continue;
                    }
                };
                stack.extend(next.frames.into_iter().rev());
                break next.head;
            };
        }
    }
}

/// Packs an interrupted evaluation into a program that resumes with `next`
/// inside the batching scopes that were open when it blocked.
fn suspend(next: Program, scopes: Vec<bool>, stack: Vec<Frame>) -> Program {
    let mut program = if scopes.is_empty() {
        next
    } else {
        let mut frames: Vec<Frame> = scopes.into_iter().map(Frame::EnterScope).collect();
        frames.push(Frame::OnValue(Box::new(move |_: Value| next)));
        Program {
            head: Head::Ready(Ok(Box::new(()))),
            frames,
        }
    };
    program.frames.extend(stack.into_iter().rev());
    program
}

fn downcast<T: 'static>(value: Value) -> T {
    match value.downcast::<T>() {
        Ok(value) => *value,
        Err(_) => unreachable!("query value does not match its declared type"),
    }
}

/// A deferred computation producing `A` or failing with `E`.
pub struct Query<A, E> {
    program: Program,
    _types: PhantomData<fn() -> (A, E)>,
}

impl<A, E> fmt::Debug for Query<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("frames", &self.program.frames.len())
            .finish_non_exhaustive()
    }
}

impl<A, E> Query<A, E> {
    fn from_program(program: Program) -> Self {
        Self {
            program,
            _types: PhantomData,
        }
    }

    fn then<B, E2>(self, frame: Frame) -> Query<B, E2> {
        Query::from_program(self.program.then(frame))
    }
}

/// Issues `request` against `resolver`, optionally memoized in `cache`.
///
/// Without a cache every call site resolves its own request, although
/// requests for the same resolver are still batched together. With a cache
/// identical requests share one resolution for the cache's TTL.
pub fn submit<R: Request>(
    request: R,
    resolver: &Resolver<R>,
    cache: Option<&RequestCache<R>>,
) -> Query<R::Value, R::Error> {
    fetch_step(request, resolver.clone(), cache.cloned())
}

fn fetch_step<R: Request>(
    request: R,
    resolver: Resolver<R>,
    cache: Option<RequestCache<R>>,
) -> Query<R::Value, R::Error> {
    Query::new(move |cx| {
        let completion = Completion::new();
        let blocked = BlockedRequests::single(
            resolver.clone(),
            PendingRequest {
                request: request.clone(),
                completion: completion.clone(),
                cache: cache.clone(),
            },
            cx.batching_enabled(),
        );
        let resume = Query::new(move |cx| match completion.peek() {
            Some(Ok(value)) => Step::Done(value),
            Some(Err(error)) => Step::Failed(error),
            // Abandoned before it could complete: issue the request again.
            None => fetch_step(request, resolver, cache).step(cx),
        });
        Step::Blocked(blocked, resume)
    })
}

impl<A, E> Query<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    fn new(run: impl FnOnce(&mut StepContext) -> Step<A, E> + Send + 'static) -> Self {
        Self::from_program(Program {
            head: Head::Leaf(Box::new(move |cx: &mut StepContext| match run(cx) {
                Step::Done(value) => Progress::Finished(Ok(Box::new(value))),
                Step::Failed(error) => Progress::Finished(Err(Box::new(error))),
                Step::Blocked(blocked, next) => Progress::Blocked(blocked, next.program),
            })),
            frames: Vec::new(),
        })
    }

    /// A query that finishes immediately with `value`.
    pub fn succeed(value: A) -> Self {
        Self::from_program(Program::value(value))
    }

    /// A query that fails immediately with `error`.
    pub fn fail(error: E) -> Self {
        Self::from_program(Program::error(error))
    }

    /// A query that finishes with the given result.
    pub fn from_result(result: Result<A, E>) -> Self {
        match result {
            Ok(value) => Self::succeed(value),
            Err(error) => Self::fail(error),
        }
    }

    /// Issues `request` against `resolver` without caching.
    pub fn fetch<R>(request: R, resolver: &Resolver<R>) -> Self
    where
        R: Request<Value = A, Error = E>,
    {
        submit(request, resolver, None)
    }

    /// Issues `request` against `resolver`, memoized in `cache`.
    pub fn fetch_cached<R>(request: R, resolver: &Resolver<R>, cache: &RequestCache<R>) -> Self
    where
        R: Request<Value = A, Error = E>,
    {
        submit(request, resolver, Some(cache))
    }

    /// Runs the query until it finishes or blocks on requests.
    pub fn step(self, cx: &mut StepContext) -> Step<A, E> {
        match self.program.drive(cx) {
            Progress::Finished(Ok(value)) => Step::Done(downcast(value)),
            Progress::Finished(Err(error)) => Step::Failed(downcast(error)),
            Progress::Blocked(blocked, next) => Step::Blocked(blocked, Query::from_program(next)),
        }
    }

    /// Transforms the value.
    pub fn map<B, F>(self, f: F) -> Query<B, E>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        self.then(Frame::OnValue(Box::new(move |value: Value| {
            Program::value(f(downcast(value)))
        })))
    }

    /// Transforms the failure.
    pub fn map_err<E2, F>(self, f: F) -> Query<A, E2>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        self.then(Frame::OnError(Box::new(move |error: Value| {
            Program::error(f(downcast(error)))
        })))
    }

    /// Continues with a query built from the value.
    pub fn and_then<B, F>(self, f: F) -> Query<B, E>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Query<B, E> + Send + 'static,
    {
        self.then(Frame::OnValue(Box::new(move |value: Value| f(downcast(value)).program)))
    }

    /// Recovers from a failure with a query built from the error.
    pub fn or_else<E2, F>(self, f: F) -> Query<A, E2>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> Query<A, E2> + Send + 'static,
    {
        self.then(Frame::OnError(Box::new(move |error: Value| f(downcast(error)).program)))
    }

    /// Turns a failure into a value so that it cannot abort sibling
    /// branches.
    pub fn attempt<E2>(self) -> Query<Result<A, E>, E2>
    where
        E2: Send + 'static,
    {
        self.then(Frame::OnOutcome(Box::new(|outcome: Outcome| {
            Program::value(match outcome {
                Ok(value) => Ok::<A, E>(downcast(value)),
                Err(error) => Err(downcast(error)),
            })
        })))
    }

    /// Runs `self`, then `other`.
    ///
    /// Requests of `other` are only issued after `self` finished, so the two
    /// never share a batch.
    pub fn zip<B>(self, other: Query<B, E>) -> Query<(A, B), E>
    where
        B: Send + 'static,
    {
        self.and_then(move |a| other.map(move |b| (a, b)))
    }

    /// Runs `self` and `other` as concurrent branches.
    ///
    /// When both block, their request sets are merged into one round. A
    /// failure of either branch fails the pair; use [`Query::attempt`] on a
    /// branch to keep its failure local.
    pub fn zip_par<B>(self, other: Query<B, E>) -> Query<(A, B), E>
    where
        B: Send + 'static,
    {
        Query::new(move |cx| match (self.step(cx), other.step(cx)) {
            (Step::Failed(error), _) | (_, Step::Failed(error)) => Step::Failed(error),
            (Step::Done(a), Step::Done(b)) => Step::Done((a, b)),
            (Step::Done(a), Step::Blocked(blocked, next)) => {
                Step::Blocked(blocked, next.map(move |b| (a, b)))
            }
            (Step::Blocked(blocked, next), Step::Done(b)) => {
                Step::Blocked(blocked, next.map(move |a| (a, b)))
            }
            (Step::Blocked(left, left_next), Step::Blocked(right, right_next)) => {
                Step::Blocked(left.merge(right), left_next.zip_par(right_next))
            }
        })
    }

    /// Runs every query as a concurrent branch and collects the values in
    /// input order.
    ///
    /// All branches that block in a round contribute to one merged request
    /// set. The first failing branch (in input order) fails the collection.
    pub fn collect_par(queries: Vec<Query<A, E>>) -> Query<Vec<A>, E> {
        Query::new(move |cx| {
            let mut blocked: Option<BlockedRequests> = None;
            let mut branches: Vec<Branch<A, E>> = Vec::with_capacity(queries.len());
            for query in queries {
                match query.step(cx) {
                    Step::Done(value) => branches.push(Branch::Ready(value)),
                    Step::Failed(error) => return Step::Failed(error),
                    Step::Blocked(requests, next) => {
                        blocked = Some(match blocked {
                            Some(acc) => acc.merge(requests),
                            None => requests,
                        });
                        branches.push(Branch::Waiting(next));
                    }
                }
            }
            match blocked {
                None => Step::Done(
                    branches
                        .into_iter()
                        .filter_map(|branch| match branch {
                            Branch::Ready(value) => Some(value),
                            Branch::Waiting(_) => None,
                        })
                        .collect(),
                ),
                Some(requests) => {
                    let remaining = branches
                        .into_iter()
                        .map(|branch| match branch {
                            Branch::Ready(value) => Query::succeed(value),
                            Branch::Waiting(next) => next,
                        })
                        .collect();
                    Step::Blocked(requests, Query::collect_par(remaining))
                }
            }
        })
    }

    /// Applies `f` to every item and runs the resulting queries as
    /// concurrent branches.
    pub fn for_each_par<T, I, F>(items: I, f: F) -> Query<Vec<A>, E>
    where
        I: IntoIterator<Item = T>,
        F: FnMut(T) -> Query<A, E>,
    {
        Query::collect_par(items.into_iter().map(f).collect())
    }

    /// Runs the queries one after another and collects the values.
    pub fn collect_seq(queries: Vec<Query<A, E>>) -> Query<Vec<A>, E> {
        let capacity = queries.len();
        sequence(Vec::with_capacity(capacity), queries.into())
    }

    /// Applies `f` to every item and runs the resulting queries one after
    /// another.
    pub fn for_each_seq<T, I, F>(items: I, f: F) -> Query<Vec<A>, E>
    where
        I: IntoIterator<Item = T>,
        F: FnMut(T) -> Query<A, E>,
    {
        Query::collect_seq(items.into_iter().map(f).collect())
    }

    /// Scopes batching for every request issued by this query.
    ///
    /// With batching disabled each request is dispatched on its own, even
    /// when sibling branches issue requests for the same resolver in the
    /// same round. The innermost scope wins.
    pub fn with_batching(self, enabled: bool) -> Self {
        let program = self.program;
        Query::from_program(Program {
            head: Head::Ready(Ok(Box::new(()))),
            frames: vec![
                Frame::EnterScope(enabled),
                Frame::OnValue(Box::new(move |_: Value| program)),
                Frame::ExitScope,
            ],
        })
    }
}

enum Branch<A, E> {
    Ready(A),
    Waiting(Query<A, E>),
}

/// Steps queries in order, suspending at the first one that blocks.
fn sequence<A, E>(mut done: Vec<A>, mut rest: VecDeque<Query<A, E>>) -> Query<Vec<A>, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    Query::new(move |cx| loop {
        let Some(query) = rest.pop_front() else {
            return Step::Done(done);
        };
        match query.step(cx) {
            Step::Done(value) => done.push(value),
            Step::Failed(error) => return Step::Failed(error),
            Step::Blocked(blocked, next) => {
                rest.push_front(next);
                return Step::Blocked(blocked, sequence(done, rest));
            }
        }
    })
}
