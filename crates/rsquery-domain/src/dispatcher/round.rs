//! Resolution of one request group within a dispatch round.
//!
//! For every pending request the group either hands a channel to the
//! resolver (no cache, or a cache miss) or links the request to a shared
//! cache entry (a hit, possibly still in flight elsewhere). Requests handed
//! to the resolver go out in a single `run_batch` call in enqueue order.
//! Linked requests then copy the shared outcome into their own channel.
//!
//! A batch that creates cache entries runs on its own task. Other runs may
//! already be waiting on those entries, so cancelling the round that issued
//! the call only drops its interest in the result, never the call itself.

use tracing::{debug, error, warn, Instrument};

use crate::blocked::{GroupReport, RequestGroup};
use crate::cache::RequestCache;
use crate::completion::Completion;
use crate::error::ProtocolViolation;
use crate::request::Request;
use crate::resolver::{BatchEntry, Resolver};

/// A request answered through a cache entry.
struct Link<R: Request> {
    request: R,
    own: Completion<R::Value, R::Error>,
    shared: Completion<R::Value, R::Error>,
    cache: RequestCache<R>,
}

/// Marks every still-pending channel of a batch as abandoned when dropped.
///
/// After a normal resolver call it only finds channels left pending by a
/// misbehaving resolver. It also runs when the resolver panics or the call
/// is cancelled, so waiters sharing those channels never hang.
struct AbandonGuard<'a, R: Request> {
    batch: &'a [BatchEntry<R>],
}

impl<R: Request> Drop for AbandonGuard<'_, R> {
    fn drop(&mut self) {
        for entry in self.batch {
            entry.completion().abandon();
        }
    }
}

pub(crate) async fn resolve_group<R: Request>(
    group: RequestGroup<R>,
) -> Result<GroupReport, ProtocolViolation> {
    let RequestGroup { resolver, entries } = group;
    let mut report = GroupReport::default();
    let mut batch: Vec<BatchEntry<R>> = Vec::with_capacity(entries.len());
    let mut links: Vec<Link<R>> = Vec::new();
    let mut creates_entries = false;

    for pending in entries {
        match pending.cache {
            None => batch.push(BatchEntry::new(pending.request, pending.completion)),
            Some(cache) => {
                let lookup = cache.get_or_create(&pending.request);
                if lookup.created {
                    creates_entries = true;
                    batch.push(BatchEntry::new(
                        pending.request.clone(),
                        lookup.completion.clone(),
                    ));
                } else {
                    report.cache_hits += 1;
                }
                links.push(Link {
                    request: pending.request,
                    own: pending.completion,
                    shared: lookup.completion,
                    cache,
                });
            }
        }
    }

    if !batch.is_empty() {
        report.resolved += batch.len();
        report.resolver_calls += 1;
        if creates_entries {
            run_detached(&resolver, batch).await?;
        } else {
            run_batch(&resolver, &batch).await?;
        }
    }

    for link in links {
        forward(&resolver, link, &mut report).await?;
    }

    Ok(report)
}

/// Runs a batch on its own task and waits for it.
///
/// Dropping the returned future detaches the task; the batch still runs to
/// completion and fills the cache entries it owns.
async fn run_detached<R: Request>(
    resolver: &Resolver<R>,
    batch: Vec<BatchEntry<R>>,
) -> Result<(), ProtocolViolation> {
    let owner = resolver.clone();
    let task = tokio::spawn(async move { run_batch(&owner, &batch).await }.in_current_span());

    match task.await {
        Ok(result) => result,
        Err(failure) if failure.is_panic() => std::panic::resume_unwind(failure.into_panic()),
        Err(_) => {
            // Runtime shutdown. The guard already abandoned the channels.
            warn!(resolver = resolver.name(), "resolver task cancelled");
            Ok(())
        }
    }
}
/// Invokes the resolver once and enforces the completion contract.
async fn run_batch<R: Request>(
    resolver: &Resolver<R>,
    batch: &[BatchEntry<R>],
) -> Result<(), ProtocolViolation> {
    let _guard = AbandonGuard { batch };
    debug!(
        resolver = resolver.name(),
        batch_size = batch.len(),
        "invoking resolver"
    );

    if let Err(failure) = resolver.run_batch(batch).await {
        warn!(
            resolver = resolver.name(),
            batch_size = batch.len(),
            "resolver failed the whole batch"
        );
        for entry in batch {
            entry.fail(failure.clone());
        }
    }

    let unresolved = batch.iter().filter(|entry| entry.is_pending()).count();
    if unresolved > 0 {
        error!(
            resolver = resolver.name(),
            unresolved, "resolver returned without completing every request"
        );
        return Err(ProtocolViolation {
            resolver: resolver.name().to_string(),
            unresolved,
        });
    }
    Ok(())
}

/// Waits for the shared entry and copies its outcome into the request's
/// own channel.
///
/// An entry is only abandoned when its resolver call panicked or left it
/// unresolved. This request then takes over: the next lookup misses and
/// the request is resolved again.
async fn forward<R: Request>(
    resolver: &Resolver<R>,
    link: Link<R>,
    report: &mut GroupReport,
) -> Result<(), ProtocolViolation> {
    let Link {
        request,
        own,
        mut shared,
        cache,
    } = link;

    loop {
        if let Some(result) = shared.wait().await {
            own.complete(result);
            return Ok(());
        }
        debug!(
            resolver = resolver.name(),
            request = ?request,
            "shared entry abandoned, resolving again"
        );
        let lookup = cache.get_or_create(&request);
        if lookup.created {
            let batch = vec![BatchEntry::new(request.clone(), lookup.completion.clone())];
            report.resolved += 1;
            report.resolver_calls += 1;
            run_detached(resolver, batch).await?;
        }
        shared = lookup.completion;
    }
}
