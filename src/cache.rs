//! The typed cache facade: binds a provider, a codec, an internal loader,
//! and the revalidation policy, and drives metrics on every decision.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::codec::CacheCodec;
use crate::error::CacheEntry;
use crate::loader::{DirectLoader, InternalLoader, LoadFn, SingleflightLoader};
use crate::metrics::{self, MetricsSink};
use crate::object::{unix_millis, CacheObject};
use crate::provider::CacheProvider;
use crate::revalidate::{EarlyRefreshPolicy, RevalidationConfig};

/// The injectable wall clock; defaults to [`SystemTime::now`].
pub type Clock = Arc<dyn Fn() -> SystemTime + Send + Sync>;

/// Which internal loader dispatches cache misses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoaderMode {
    /// Coalesce concurrent loads per key; at most one fetch runs at a time
    /// for any key.
    #[default]
    Singleflight,
    /// Run every fetch on the caller, without coalescing. Also opts out of
    /// the maximum load timeout.
    Direct,
}

/// A read-through cache over a [`CacheProvider`] and a [`CacheCodec`].
///
/// `get_or_load` is the primary operation: a hit inside its freshness
/// window is served directly, everything else funnels through the
/// configured internal loader, which computes the value (at most once per
/// key when coalescing), stores it, and fans it out to every waiting
/// caller.
pub struct Cache<V, C, P>
where
    C: CacheCodec<V>,
    P: CacheProvider<Stored = C::Stored>,
{
    provider: Arc<P>,
    codec: Arc<C>,
    loader: Box<dyn InternalLoader<V>>,
    metrics: Arc<dyn MetricsSink>,
    policy: Option<EarlyRefreshPolicy>,
    clock: Clock,
}

impl<V, C, P> Cache<V, C, P>
where
    V: Clone + Send + Sync + 'static,
    C: CacheCodec<V> + 'static,
    P: CacheProvider<Stored = C::Stored> + 'static,
{
    /// Starts building a cache over the given provider and codec.
    pub fn builder(provider: P, codec: C) -> CacheBuilder<V, C, P> {
        CacheBuilder {
            provider,
            codec,
            loader_mode: LoaderMode::default(),
            max_load_timeout: None,
            revalidation: RevalidationConfig::default(),
            metrics: metrics::default_sink(),
            clock: Arc::new(SystemTime::now),
            _value: PhantomData,
        }
    }

    /// Returns the cached value for `key`, or loads it via `loader`.
    ///
    /// The loaded value is stamped with `now + ttl`, encoded, and stored;
    /// storage failures are recorded and swallowed, the value is still
    /// returned. `ctx` bounds only this caller's wait: cancelling it
    /// abandons the wait without cancelling a fetch other callers may be
    /// joined to.
    pub async fn get_or_load<F, Fut>(
        &self,
        ctx: &CancellationToken,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> CacheEntry<V>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = CacheEntry<V>> + Send + 'static,
    {
        if let Some(value) = self.lookup(key, true).await {
            self.metrics.record_hit();
            return Ok(value);
        }
        self.metrics.record_miss();

        let fetch = self.store_through(key, ttl, loader);
        let (entry, _leader) = self.loader.load(ctx, key, fetch).await;
        entry
    }

    /// Returns the cached value for `key` without ever loading.
    ///
    /// `Ok(None)` on a clean miss or an expired entry. Since there is no
    /// loader to run, the revalidation policy does not apply; entries
    /// inside the refresh window are still served.
    pub async fn get(&self, key: &str) -> CacheEntry<Option<V>> {
        match self.lookup(key, false).await {
            Some(value) => {
                self.metrics.record_hit();
                Ok(Some(value))
            }
            None => {
                self.metrics.record_miss();
                Ok(None)
            }
        }
    }

    /// Encodes and stores `value` under `key` with the given TTL.
    pub async fn set(&self, key: &str, value: V, ttl: Duration) -> CacheEntry<()> {
        let object = CacheObject::new(value, self.stamp(ttl));
        let stored = self
            .codec
            .encode(&object)
            .inspect_err(|_| self.metrics.record_codec_error())?;
        self.provider
            .set(key, stored, ttl)
            .await
            .inspect_err(|_| self.metrics.record_provider_error())
    }

    /// Removes `key` from the backend. Deleting a missing key succeeds.
    pub async fn delete(&self, key: &str) -> CacheEntry<()> {
        self.provider
            .delete(key)
            .await
            .inspect_err(|_| self.metrics.record_provider_error())
    }

    /// The hit path: provider get, decode, freshness.
    ///
    /// Provider and decode failures are recorded and degrade to a miss;
    /// the facade never retries them. With `allow_refresh`, a hit inside
    /// the refresh window may be probabilistically declared a miss so the
    /// caller refreshes it before it expires.
    async fn lookup(&self, key: &str, allow_refresh: bool) -> Option<V> {
        let stored = match self.provider.get(key).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return None,
            Err(err) => {
                self.metrics.record_provider_error();
                tracing::error!(error = %err, key = %key, "provider lookup failed, treating as miss");
                return None;
            }
        };

        let object = match self.codec.decode(stored) {
            Ok(object) => object,
            Err(err) => {
                self.metrics.record_codec_error();
                tracing::error!(error = %err, key = %key, "cached value failed to decode, treating as miss");
                return None;
            }
        };

        let now = (self.clock)();
        if object.is_expired(now) {
            tracing::trace!(key = %key, "cached value expired");
            return None;
        }

        if allow_refresh {
            if let (Some(policy), Some(expires_at)) = (&self.policy, object.expires_at()) {
                let remaining = expires_at.duration_since(now).unwrap_or_default();
                if policy.should_refresh(remaining) {
                    tracing::trace!(key = %key, "refreshing cached value early");
                    return None;
                }
            }
        }

        Some(object.value)
    }

    /// Wraps the user loader into the fetch the internal loader dispatches:
    /// load, stamp expiry, encode, store. Encode and store failures are
    /// recorded and swallowed so the freshly loaded value still reaches
    /// every caller.
    fn store_through<F, Fut>(&self, key: &str, ttl: Duration, loader: F) -> LoadFn<V>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = CacheEntry<V>> + Send + 'static,
    {
        let provider = Arc::clone(&self.provider);
        let codec = Arc::clone(&self.codec);
        let metrics = Arc::clone(&self.metrics);
        let clock = Arc::clone(&self.clock);
        let key = key.to_owned();

        Box::new(move |token| {
            async move {
                let value = loader(token).await?;

                let expire_at_millis = stamp(&clock, ttl);
                let object = CacheObject::new(value.clone(), expire_at_millis);
                match codec.encode(&object) {
                    Ok(stored) => {
                        if let Err(err) = provider.set(&key, stored, ttl).await {
                            metrics.record_provider_error();
                            tracing::error!(error = %err, key = %key, "failed to store loaded value");
                        }
                    }
                    Err(err) => {
                        metrics.record_codec_error();
                        tracing::error!(error = %err, key = %key, "failed to encode loaded value");
                    }
                }

                Ok(value)
            }
            .boxed()
        })
    }

    fn stamp(&self, ttl: Duration) -> i64 {
        stamp(&self.clock, ttl)
    }
}

/// The absolute expiry for a value stored now with `ttl`; `0` (no expiry
/// metadata) when the TTL is zero.
fn stamp(clock: &Clock, ttl: Duration) -> i64 {
    if ttl.is_zero() {
        return 0;
    }
    unix_millis(clock()) + ttl.as_millis() as i64
}

/// Configures and constructs a [`Cache`].
pub struct CacheBuilder<V, C, P> {
    provider: P,
    codec: C,
    loader_mode: LoaderMode,
    max_load_timeout: Option<Duration>,
    revalidation: RevalidationConfig,
    metrics: Arc<dyn MetricsSink>,
    clock: Clock,
    _value: PhantomData<fn() -> V>,
}

impl<V, C, P> CacheBuilder<V, C, P>
where
    V: Clone + Send + Sync + 'static,
    C: CacheCodec<V> + 'static,
    P: CacheProvider<Stored = C::Stored> + 'static,
{
    /// Selects the internal loader; defaults to singleflight.
    pub fn loader_mode(mut self, mode: LoaderMode) -> Self {
        self.loader_mode = mode;
        self
    }

    /// Bounds the execution time of coalesced leader fetches.
    ///
    /// Ignored by [`LoaderMode::Direct`], which runs fetches under the
    /// caller's own token.
    pub fn max_load_timeout(mut self, timeout: Duration) -> Self {
        self.max_load_timeout = Some(timeout);
        self
    }

    /// Configures probabilistic early revalidation.
    pub fn revalidation(mut self, config: RevalidationConfig) -> Self {
        self.revalidation = config;
        self
    }

    /// Installs a metrics sink; defaults to a no-op sink.
    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = sink;
        self
    }

    /// Replaces the wall clock, for tests.
    pub fn clock(mut self, clock: impl Fn() -> SystemTime + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Builds the cache.
    ///
    /// # Panics
    ///
    /// Panics if the revalidation configuration is enabled with a zero
    /// window or a non-positive beta.
    pub fn build(self) -> Cache<V, C, P> {
        let loader: Box<dyn InternalLoader<V>> = match self.loader_mode {
            LoaderMode::Singleflight => Box::new(SingleflightLoader::new(
                Arc::clone(&self.metrics),
                self.max_load_timeout,
            )),
            LoaderMode::Direct => Box::new(DirectLoader),
        };

        Cache {
            provider: Arc::new(self.provider),
            codec: Arc::new(self.codec),
            loader,
            metrics: self.metrics,
            policy: self.revalidation.policy(),
            clock: self.clock,
        }
    }
}
