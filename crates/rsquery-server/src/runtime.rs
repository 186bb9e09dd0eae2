//! Runtime facade wiring configuration into the query engine.
//!
//! # Example
//!
//! ```ignore
//! use rsquery_server::{QueryRuntime, ServerConfig};
//!
//! let runtime = QueryRuntime::new(ServerConfig::load("rsquery.yaml")?)?;
//! runtime.init_observability();
//!
//! let users = runtime.make_cache::<GetUser>()?;
//! let user = runtime.run(Query::fetch_cached(GetUser(1), &resolver, &users)).await?;
//! ```

use rsquery_domain::{
    CacheConfigError, Dispatcher, Query, QueryError, Request, RequestCache, RunStats,
};
use tracing::info;

use crate::config::{ConfigLoadError, ServerConfig};
use crate::observability::{init_logging, register_cache_metrics, LoggingConfig};

/// Dispatcher and cache factory built from a [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct QueryRuntime {
    config: ServerConfig,
    dispatcher: Dispatcher,
}

impl QueryRuntime {
    /// Validates `config` and builds the dispatcher it describes.
    pub fn new(config: ServerConfig) -> Result<Self, ConfigLoadError> {
        config.validate()?;
        let dispatcher = Dispatcher::new(config.dispatcher.to_dispatcher_config());
        info!(
            batching_enabled = config.dispatcher.batching_enabled,
            round_timeout_ms = ?config.dispatcher.round_timeout_ms,
            cache_capacity = config.cache.capacity,
            cache_ttl_ms = config.cache.ttl_ms,
            "query runtime configured"
        );
        Ok(Self { config, dispatcher })
    }

    /// Builds a runtime from defaults and `RSQUERY_` environment variables.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        Self::new(ServerConfig::from_env()?)
    }

    /// Installs the global log subscriber and describes the cache metrics.
    ///
    /// Returns false if a subscriber was already installed.
    pub fn init_observability(&self) -> bool {
        register_cache_metrics();
        init_logging(LoggingConfig::from_settings(&self.config.logging))
    }

    /// Builds an empty cache sized from the `cache` section.
    pub fn make_cache<R: Request>(&self) -> Result<RequestCache<R>, CacheConfigError> {
        RequestCache::new(self.config.cache.to_cache_config())
    }

    /// Runs `query` to completion.
    pub async fn run<A, E>(&self, query: Query<A, E>) -> Result<A, QueryError<E>>
    where
        A: Send + 'static,
        E: Send + 'static,
    {
        self.dispatcher.run(query).await
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
        self.dispatcher.run_with_stats(query).await
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsquery_domain::Resolver;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    struct Double(u32);

    impl Request for Double {
        type Value = u32;
        type Error = String;
    }

    #[test]
    fn test_runtime_rejects_invalid_config() {
        let mut config = ServerConfig::default();
        config.cache.capacity = 0;

        let result = QueryRuntime::new(config);

        assert!(matches!(result, Err(ConfigLoadError::Invalid { .. })));
    }

    #[test]
    fn test_runtime_applies_dispatcher_settings() {
        let mut config = ServerConfig::default();
        config.dispatcher.batching_enabled = false;
        config.dispatcher.round_timeout_ms = Some(300);

        let runtime = QueryRuntime::new(config).unwrap();

        assert!(!runtime.dispatcher().config().batching_enabled);
        assert_eq!(
            runtime.dispatcher().config().round_timeout,
            Some(Duration::from_millis(300))
        );
    }

    #[test]
    fn test_caches_are_sized_from_config() {
        let mut config = ServerConfig::default();
        config.cache.capacity = 16;
        config.cache.ttl_ms = 2_000;
        let runtime = QueryRuntime::new(config).unwrap();

        let cache = runtime.make_cache::<Double>().unwrap();

        assert_eq!(cache.config().capacity, 16);
        assert_eq!(cache.config().ttl, Duration::from_secs(2));
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test]
    async fn test_runtime_runs_queries() {
        let runtime = QueryRuntime::new(ServerConfig::default()).unwrap();
        let resolver = Resolver::from_fn("double", |request: Double| async move {
            Ok::<_, String>(request.0 * 2)
        });
        let query = Query::for_each_par(1..4, |n| Query::fetch(Double(n), &resolver));

        let (result, stats) = runtime.run_with_stats(query).await;

        assert_eq!(result.unwrap(), vec![2, 4, 6]);
        assert_eq!(stats.resolver_calls, 1);
    }
}
