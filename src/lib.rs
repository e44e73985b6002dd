//! # crema
//!
//! An in-process caching core that layers load coalescing, probabilistic
//! early revalidation, and a framed storage codec over a pluggable
//! storage backend.
//!
//! ## Layers
//!
//! - A [`CacheProvider`] persists encoded entries: a narrow, concurrent
//!   `get`/`set`/`delete` contract with TTL support. In-process backends
//!   ship with the crate; network backends plug in from outside.
//! - A [`CacheCodec`] translates between [`CacheObject`]s (the user payload
//!   plus its absolute expiry) and the provider's storage representation.
//!   [`FramedCompressionCodec`] adds a self-describing frame with
//!   conditional zlib compression for byte-string backends.
//! - The [`Cache`] facade binds both together and deduplicates concurrent
//!   loads per key via singleflight: one caller leads the fetch on a
//!   detached task, everyone else joins and receives the same result. Use
//!   [`CacheBuilder::max_load_timeout`] to cap the execution time of
//!   coalesced fetches. With [`LoaderMode::Direct`] loads run on the
//!   caller instead, without coalescing, and the maximum load timeout does
//!   not apply.
//!
//! ## Early revalidation
//!
//! Entries approaching expiry can be refreshed before their TTL runs out:
//! inside a configured window before expiry, a hit is probabilistically
//! declared a miss, and the resulting reload (coalesced like any other)
//! replaces the entry. This spreads refresh load over the window instead
//! of letting every caller stampede the backend the moment an entry
//! expires. See [`RevalidationConfig`].
//!
//! ## Observability
//!
//! Every cache decision is reported to an injectable [`MetricsSink`]
//! (hits, misses, fetches, coalescing fan-in, swallowed provider and codec
//! failures); swallowed failures are additionally logged via `tracing`.

mod cache;
mod codec;
mod error;
mod loader;
mod metrics;
mod object;
mod provider;
mod revalidate;


pub use cache::{Cache, CacheBuilder, Clock, LoaderMode};
pub use codec::{
    ByteCodec, CacheCodec, FramedCompressionCodec, JsonCodec, PassthroughCodec,
    COMPRESSION_TYPE_NONE, COMPRESSION_TYPE_ZLIB, DEFAULT_COMPRESS_THRESHOLD,
};
pub use error::{CacheEntry, CacheError};
pub use metrics::{MetricsSink, NoopMetrics};
pub use object::CacheObject;
pub use provider::{CacheProvider, MemoryProvider, NoopProvider};
pub use revalidate::{EarlyRefreshPolicy, RevalidationConfig};
