use std::time::Duration;

use thiserror::Error;

/// An error produced while reading from, writing to, or populating the cache.
///
/// This enum is intended for fan-out: when a coalesced load fails, every
/// caller joined to the flight receives its own copy of the error, which is
/// why all variants are cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The storage backend failed a `get`, `set`, or `delete`.
    ///
    /// The attached string contains the backend's error message.
    #[error("provider error: {0}")]
    Provider(String),
    /// A cache object could not be encoded to or decoded from its storage
    /// representation.
    #[error("codec error: {0}")]
    Codec(String),
    /// A framed blob was empty. Frames always carry at least the
    /// compression tag byte.
    #[error("invalid data for decompression")]
    DecompressZeroLengthData,
    /// A framed blob carried a compression tag this build does not know.
    #[error("unsupported compression type ID: {0:#04x}")]
    UnsupportedCompressionTypeId(u8),
    /// The user-supplied loader failed. The message is propagated verbatim
    /// to every caller joined to the flight.
    #[error("load failed: {0}")]
    LoadFailed(String),
    /// The caller's cancellation token fired while waiting, or the flight
    /// itself was abandoned by all of its waiters.
    #[error("operation cancelled")]
    Cancelled,
    /// The leader's detached execution exceeded the configured maximum
    /// load timeout.
    #[error("load timed out after {0:?}")]
    DeadlineExceeded(Duration),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}

/// The outcome of a cache operation, either `Ok(T)` or a [`CacheError`].
pub type CacheEntry<T = ()> = Result<T, CacheError>;
