//! Internal load dispatch.
//!
//! The facade funnels every miss through an [`InternalLoader`]: either the
//! sharded [`SingleflightLoader`] that coalesces concurrent loads per key,
//! or the [`DirectLoader`] that runs every fetch on the caller itself.

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::error::{CacheEntry, CacheError};

mod singleflight;

pub(crate) use singleflight::SingleflightLoader;

/// The future produced by a fetch closure.
pub(crate) type LoadFuture<V> = BoxFuture<'static, CacheEntry<V>>;

/// A one-shot fetch. The token it receives is the cancellation scope the
/// fetch runs under: the flight's detached token for coalesced loads, the
/// caller's own token for direct loads.
pub(crate) type LoadFn<V> = Box<dyn FnOnce(CancellationToken) -> LoadFuture<V> + Send>;

/// Dispatches a fetch for a key and resolves with the outcome and whether
/// this caller led the fetch (as opposed to joining one already running).
pub(crate) trait InternalLoader<V>: Send + Sync {
    fn load<'a>(
        &'a self,
        ctx: &'a CancellationToken,
        key: &'a str,
        fetch: LoadFn<V>,
    ) -> BoxFuture<'a, (CacheEntry<V>, bool)>;
}

/// Runs every fetch inline on the caller, with the caller's own token.
///
/// No coalescing: concurrent callers for the same key each execute their
/// fetch, and every caller reports as leader. Opting out of singleflight
/// also opts out of the configured maximum load timeout.
pub(crate) struct DirectLoader;

impl<V> InternalLoader<V> for DirectLoader
where
    V: Send + 'static,
{
    fn load<'a>(
        &'a self,
        ctx: &'a CancellationToken,
        _key: &'a str,
        fetch: LoadFn<V>,
    ) -> BoxFuture<'a, (CacheEntry<V>, bool)> {
        Box::pin(async move {
            let fut = fetch(ctx.clone());
            tokio::select! {
                () = ctx.cancelled() => (Err(CacheError::Cancelled), true),
                result = fut => (result, true),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures::FutureExt;

    use super::*;

    #[tokio::test]
    async fn direct_loader_never_coalesces() {
        let loader = DirectLoader;
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = CancellationToken::new();

        let mut outcomes = Vec::new();
        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            let fetch: LoadFn<u32> = Box::new(move |_token| {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
                .boxed()
            });
            outcomes.push(loader.load(&ctx, "key", fetch).await);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        for (entry, leader) in outcomes {
            assert_eq!(entry.unwrap(), 42);
            assert!(leader);
        }
    }

    #[tokio::test]
    async fn direct_loader_honors_caller_cancellation() {
        let loader = DirectLoader;
        let ctx = CancellationToken::new();
        ctx.cancel();

        let fetch: LoadFn<u32> = Box::new(|_token| futures::future::pending().boxed());
        let (entry, leader) = loader.load(&ctx, "key", fetch).await;

        assert_eq!(entry.unwrap_err(), CacheError::Cancelled);
        assert!(leader);
    }
}
