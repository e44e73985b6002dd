use std::sync::Arc;

/// Fire-and-forget observation hooks driven by the cache facade and the
/// singleflight loader.
///
/// Implementations must be cheap and non-blocking; they are invoked inline
/// on cache hot paths. The default sink is [`NoopMetrics`].
pub trait MetricsSink: Send + Sync {
    /// A lookup was served from the cache.
    fn record_hit(&self) {}

    /// A lookup missed: nothing stored, the entry expired, it failed to
    /// decode, or the revalidation policy elected an early refresh.
    fn record_miss(&self) {}

    /// A leader fetch started executing.
    fn record_load(&self) {}

    /// A fetch completed; `refs` is the number of callers still joined to
    /// the flight at completion time.
    fn record_load_concurrency(&self, refs: usize) {
        let _ = refs;
    }

    /// The storage backend returned an error that was recovered as a miss
    /// or swallowed after a load.
    fn record_provider_error(&self) {}

    /// A codec failed to encode or decode a cache object.
    fn record_codec_error(&self) {}
}

/// A [`MetricsSink`] that discards every observation.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

pub(crate) fn default_sink() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetrics)
}
