//! Sharded, reference-counted load coalescing.
//!
//! Concurrent loads for the same key are folded into one flight: the first
//! caller becomes the leader and spawns the fetch on a detached task, later
//! callers join as followers and await the broadcast result. A flight's
//! record lives in one of a fixed set of hash shards while at least one
//! caller holds a reference to it; the last reference out cancels the
//! flight's detached token and makes the record eligible for reuse.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{CacheEntry, CacheError};
use crate::loader::{InternalLoader, LoadFn};
use crate::metrics::MetricsSink;

const MIN_SHARDS: usize = 8;
const MAX_SHARDS: usize = 32;
const SHARD_MULTIPLIER: usize = 2;

/// Upper bound on recycled flight records kept around for reuse.
const INFLIGHT_POOL_LIMIT: usize = 64;

/// The process-wide hasher for shard selection: randomly seeded once,
/// immutable afterwards, so a key maps to the same shard for the lifetime
/// of the process.
static SHARD_HASHER: OnceLock<ahash::RandomState> = OnceLock::new();

fn hash_key(key: &str) -> u64 {
    SHARD_HASHER
        .get_or_init(ahash::RandomState::new)
        .hash_one(key)
}

fn default_shard_count() -> usize {
    let parallelism = std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1);
    (parallelism * SHARD_MULTIPLIER).clamp(MIN_SHARDS, MAX_SHARDS)
}

/// The broadcast side of a flight: every waiter holds a clone and receives
/// the same result.
type ResultChannel<V> = Shared<oneshot::Receiver<CacheEntry<V>>>;

struct InflightState<V> {
    /// Callers (leader included) currently awaiting the result.
    refs: usize,
    /// Set exactly once, at completion, under the shard lock.
    done: bool,
    /// Set at most once; guards against recycling a record twice.
    pooled: bool,
    /// Consumed by the completion path to broadcast the result.
    sender: Option<oneshot::Sender<CacheEntry<V>>>,
    receiver: ResultChannel<V>,
    /// Cancellation scope of the fetch, detached from every caller.
    /// Cancelled when the last reference is released.
    load_token: CancellationToken,
}

/// A per-key coordination record for one outstanding load.
struct Inflight<V> {
    // The record outlives lock scopes (waiters and the leader task hold it
    // across awaits), so its mutable state carries its own mutex. It is
    // locked strictly after the shard lock.
    state: Mutex<InflightState<V>>,
}

impl<V> Inflight<V>
where
    V: Clone,
{
    fn new() -> Arc<Self> {
        let (sender, receiver) = oneshot::channel();
        Arc::new(Inflight {
            state: Mutex::new(InflightState {
                refs: 1,
                done: false,
                pooled: false,
                sender: Some(sender),
                receiver: receiver.shared(),
                load_token: CancellationToken::new(),
            }),
        })
    }

    /// Makes a recycled record indistinguishable from a fresh one.
    fn reset(&self) {
        let (sender, receiver) = oneshot::channel();
        let mut state = self.state.lock();
        state.refs = 1;
        state.done = false;
        state.pooled = false;
        state.sender = Some(sender);
        state.receiver = receiver.shared();
        state.load_token = CancellationToken::new();
    }
}

struct Shard<V> {
    entries: Mutex<HashMap<String, Arc<Inflight<V>>>>,
}

struct Flights<V> {
    shards: Box<[Shard<V>]>,
    pool: Mutex<Vec<Arc<Inflight<V>>>>,
    metrics: Arc<dyn MetricsSink>,
    max_load_timeout: Option<Duration>,
}

/// The coalescing [`InternalLoader`].
pub(crate) struct SingleflightLoader<V> {
    flights: Arc<Flights<V>>,
}

impl<V> SingleflightLoader<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(metrics: Arc<dyn MetricsSink>, max_load_timeout: Option<Duration>) -> Self {
        Self::with_shards(default_shard_count(), metrics, max_load_timeout)
    }

    fn with_shards(
        shard_count: usize,
        metrics: Arc<dyn MetricsSink>,
        max_load_timeout: Option<Duration>,
    ) -> Self {
        let shards = (0..shard_count)
            .map(|_| Shard {
                entries: Mutex::new(HashMap::new()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        SingleflightLoader {
            flights: Arc::new(Flights {
                shards,
                pool: Mutex::new(Vec::new()),
                metrics,
                max_load_timeout,
            }),
        }
    }

    /// Spawns the leader fetch on a detached task.
    ///
    /// The fetch runs under the flight's own token, bounded by the
    /// configured maximum load timeout if there is one. Cancelling the
    /// token (last reference released, or the deadline firing) drops the
    /// fetch future; the completion path runs either way.
    fn spawn_leader(&self, key: &str, record: &Arc<Inflight<V>>, fetch: LoadFn<V>) {
        let flights = Arc::clone(&self.flights);
        let record = Arc::clone(record);
        let key = key.to_owned();
        let load_token = record.state.lock().load_token.clone();

        tokio::spawn(async move {
            flights.metrics.record_load();
            let fut = fetch(load_token.clone());

            let result = match flights.max_load_timeout {
                Some(timeout) => tokio::select! {
                    () = load_token.cancelled() => Err(CacheError::Cancelled),
                    outcome = tokio::time::timeout(timeout, fut) => match outcome {
                        Ok(result) => result,
                        Err(_elapsed) => {
                            load_token.cancel();
                            Err(CacheError::DeadlineExceeded(timeout))
                        }
                    },
                },
                None => tokio::select! {
                    () = load_token.cancelled() => Err(CacheError::Cancelled),
                    result = fut => result,
                },
            };

            flights.finish(&key, &record, result);
        });
    }
}

impl<V> Flights<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn shard(&self, key: &str) -> &Shard<V> {
        let index = (hash_key(key) % self.shards.len() as u64) as usize;
        &self.shards[index]
    }

    /// Registers a caller for `key`.
    ///
    /// Joins the running flight if there is one. A record whose flight has
    /// already completed but which the last releaser has not evicted yet is
    /// superseded: the caller installs a fresh record and leads a new
    /// flight instead of serving the memoized result.
    fn acquire(&self, key: &str) -> (Arc<Inflight<V>>, ResultChannel<V>, bool) {
        let shard = self.shard(key);
        let mut entries = shard.entries.lock();

        if let Some(existing) = entries.get(key) {
            let mut state = existing.state.lock();
            if !state.done {
                state.refs += 1;
                let receiver = state.receiver.clone();
                drop(state);
                return (Arc::clone(existing), receiver, false);
            }
        }

        let record = self.new_inflight();
        let receiver = record.state.lock().receiver.clone();
        entries.insert(key.to_owned(), Arc::clone(&record));
        (record, receiver, true)
    }

    /// Drops one reference. The last one out evicts the record (unless a
    /// successor already replaced it), cancels the flight token, and
    /// recycles the record if its flight has completed.
    fn release(&self, key: &str, record: &Arc<Inflight<V>>) {
        let shard = self.shard(key);
        let mut entries = shard.entries.lock();
        let mut state = record.state.lock();

        state.refs = state.refs.saturating_sub(1);
        if state.refs > 0 {
            return;
        }

        if entries
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, record))
        {
            entries.remove(key);
        }
        state.load_token.cancel();

        if state.done && !state.pooled {
            state.pooled = true;
            drop(state);
            self.recycle(record);
        }
    }

    /// Completes a flight: broadcasts the result, marks the record done,
    /// and recycles it right away when every waiter already left.
    fn finish(&self, key: &str, record: &Arc<Inflight<V>>, result: CacheEntry<V>) {
        let refs_at_completion;
        {
            let shard = self.shard(key);
            let _entries = shard.entries.lock();
            let mut state = record.state.lock();

            refs_at_completion = state.refs;
            state.done = true;
            if let Some(sender) = state.sender.take() {
                sender.send(result).ok();
            }

            if state.refs == 0 && !state.pooled {
                state.pooled = true;
                drop(state);
                self.recycle(record);
            }
        }
        self.metrics.record_load_concurrency(refs_at_completion);
    }

    fn new_inflight(&self) -> Arc<Inflight<V>> {
        let recycled = self.pool.lock().pop();
        match recycled {
            Some(record) => {
                record.reset();
                record
            }
            None => Inflight::new(),
        }
    }

    fn recycle(&self, record: &Arc<Inflight<V>>) {
        let mut pool = self.pool.lock();
        if pool.len() < INFLIGHT_POOL_LIMIT {
            pool.push(Arc::clone(record));
        }
    }
}

/// Releases the caller's reference on every exit path, including drop of
/// the waiting future.
struct ReleaseGuard<'a, V>
where
    V: Clone + Send + Sync + 'static,
{
    flights: &'a Flights<V>,
    key: &'a str,
    record: &'a Arc<Inflight<V>>,
}

impl<V> Drop for ReleaseGuard<'_, V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.flights.release(self.key, self.record);
    }
}

impl<V> InternalLoader<V> for SingleflightLoader<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn load<'a>(
        &'a self,
        ctx: &'a CancellationToken,
        key: &'a str,
        fetch: LoadFn<V>,
    ) -> futures::future::BoxFuture<'a, (CacheEntry<V>, bool)> {
        Box::pin(async move {
            let (record, receiver, leader) = self.flights.acquire(key);
            if leader {
                self.spawn_leader(key, &record, fetch);
            }

            let _release = ReleaseGuard {
                flights: &self.flights,
                key,
                record: &record,
            };

            tokio::select! {
                () = ctx.cancelled() => (Err(CacheError::Cancelled), leader),
                result = receiver => {
                    let entry = result.unwrap_or_else(|_dropped| {
                        Err(CacheError::LoadFailed("flight result channel dropped".into()))
                    });
                    (entry, leader)
                }
            }
        })
    }
}

#[cfg(test)]
impl<V> SingleflightLoader<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn refs(&self, key: &str) -> Option<usize> {
        let shard = self.flights.shard(key);
        let entries = shard.entries.lock();
        entries.get(key).map(|record| record.state.lock().refs)
    }

    fn contains(&self, key: &str) -> bool {
        self.flights.shard(key).entries.lock().contains_key(key)
    }

    fn pool_len(&self) -> usize {
        self.flights.pool.lock().len()
    }
}
