//! Dispatcher driving queries to completion.
//!
//! The dispatcher is a trampoline over [`Query::step`]:
//!
//! ```text
//!            step                       dispatch round
//! Running ──────────► Blocked ───────────────────────────► Running
//!    │                  (group by resolver, consult caches,
//!    │                   call resolvers concurrently,
//!    │                   await every channel, resume)
//!    ├──► Succeeded
//!    └──► Failed
//! ```
//!
//! Each round dispatches every resolver group of the blocked request set
//! concurrently; a slow resolver does not hold back the others within the
//! round. The continuation only resumes once every channel of the round is
//! complete.
//!
//! # Timeouts
//!
//! The core imposes no timeout. [`DispatcherConfig::round_timeout`] bounds
//! each round; an expired round fails the run with
//! [`QueryError::Timeout`]. Resolver calls that fill cache entries keep
//! running, so other runs waiting on those entries are unaffected.

pub(crate) mod round;

#[cfg(test)]
mod tests;

use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, trace, Instrument};

use crate::blocked::BlockedRequests;
use crate::error::QueryError;
use crate::query::{Query, Step, StepContext};

/// Configuration for a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Whether requests issued outside an explicit batching scope may be
    /// batched.
    pub batching_enabled: bool,
    /// Optional upper bound on the duration of a single dispatch round.
    pub round_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batching_enabled: true,
            round_timeout: None,
        }
    }
}

impl DispatcherConfig {
    /// Enables or disables batching by default.
    pub fn with_batching(mut self, enabled: bool) -> Self {
        self.batching_enabled = enabled;
        self
    }

    /// Bounds the duration of every dispatch round.
    pub fn with_round_timeout(mut self, timeout: Duration) -> Self {
        self.round_timeout = Some(timeout);
        self
    }
}

/// State of a query run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    /// Pure computation is being stepped.
    Running,
    /// Waiting on a dispatch round.
    Blocked,
    /// Finished with a value.
    Succeeded,
    /// Finished with an error.
    Failed,
}

/// Counters collected over one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    /// Number of dispatch rounds.
    pub rounds: usize,
    /// Requests issued by the query, duplicates included.
    pub requests: usize,
    /// Requests handed to resolvers after cache deduplication.
    pub resolved: usize,
    /// Requests answered from a shared cache entry.
    pub cache_hits: usize,
    /// Number of `run_batch` invocations.
    pub resolver_calls: usize,
    /// State the run ended in.
    pub final_state: DispatchState,
}

impl Default for RunStats {
    fn default() -> Self {
        Self {
            rounds: 0,
            requests: 0,
            resolved: 0,
            cache_hits: 0,
            resolver_calls: 0,
            final_state: DispatchState::Running,
        }
    }
}

/// Runs queries by repeatedly stepping them and resolving their requests.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Creates a dispatcher with the given configuration.
    pub fn new(config: DispatcherConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration of this dispatcher.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Runs `query` to completion.
    pub async fn run<A, E>(&self, query: Query<A, E>) -> Result<A, QueryError<E>>
    where
        A: Send + 'static,
        E: Send + 'static,
    {
        self.run_with_stats(query).await.0
    }

    /// Runs `query` to completion and reports what it cost.
    pub async fn run_with_stats<A, E>(
        &self,
        query: Query<A, E>,
    ) -> (Result<A, QueryError<E>>, RunStats)
    where
        A: Send + 'static,
        E: Send + 'static,
    {
        let mut stats = RunStats::default();
        let mut cx = StepContext::new(self.config.batching_enabled);
        let mut current = query;

        let result = loop {
            trace!(state = ?DispatchState::Running, round = stats.rounds, "stepping query");
            match current.step(&mut cx) {
                Step::Done(value) => break Ok(value),
                Step::Failed(error) => break Err(QueryError::Request(error)),
                Step::Blocked(blocked, next) => {
                    stats.rounds += 1;
                    trace!(
                        state = ?DispatchState::Blocked,
                        round = stats.rounds,
                        requests = blocked.request_count(),
                        batches = blocked.batch_count(),
                        "query blocked on requests"
                    );
                    let span = tracing::debug_span!("dispatch_round", round = stats.rounds);
                    if let Err(error) = self
                        .dispatch_round(blocked, &mut stats)
                        .instrument(span)
                        .await
                    {
                        break Err(error);
                    }
                    current = next;
                }
            }
        };

        stats.final_state = if result.is_ok() {
            DispatchState::Succeeded
        } else {
            DispatchState::Failed
        };
        debug!(
            state = ?stats.final_state,
            rounds = stats.rounds,
            requests = stats.requests,
            resolver_calls = stats.resolver_calls,
            "query finished"
        );
        (result, stats)
    }

    async fn dispatch_round<E>(
        &self,
        blocked: BlockedRequests,
        stats: &mut RunStats,
    ) -> Result<(), QueryError<E>> {
        stats.requests += blocked.request_count();
        let work = join_all(blocked.into_units().into_iter().map(|unit| unit.dispatch()));

        let reports = match self.config.round_timeout {
            Some(limit) => tokio::time::timeout(limit, work).await.map_err(|_| {
                QueryError::Timeout {
                    timeout_ms: limit.as_millis() as u64,
                }
            })?,
            None => work.await,
        };

        for report in reports {
            let report = report?;
            stats.resolved += report.resolved;
            stats.cache_hits += report.cache_hits;
            stats.resolver_calls += report.resolver_calls;
        }
        Ok(())
    }
}
