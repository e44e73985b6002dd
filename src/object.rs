use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// The logical unit carried end-to-end through the cache: a user payload
/// together with its absolute expiry.
///
/// This is the only thing ever handed to a codec. The expiry is wall-clock
/// milliseconds since the Unix epoch; `0` means the object carries no
/// expiry metadata and is treated as fresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheObject<V> {
    /// The user payload.
    pub value: V,
    /// Absolute wall-clock expiry in milliseconds since the Unix epoch,
    /// or `0` for no expiry metadata.
    pub expire_at_millis: i64,
}

impl<V> CacheObject<V> {
    pub fn new(value: V, expire_at_millis: i64) -> Self {
        CacheObject {
            value,
            expire_at_millis,
        }
    }

    /// The absolute expiry instant, or `None` when the object carries no
    /// expiry metadata.
    pub fn expires_at(&self) -> Option<SystemTime> {
        if self.expire_at_millis <= 0 {
            return None;
        }
        Some(UNIX_EPOCH + Duration::from_millis(self.expire_at_millis as u64))
    }

    /// Whether the object has passed its expiry relative to `now`.
    ///
    /// Objects without expiry metadata never expire.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        match self.expires_at() {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }
}

/// Converts a wall-clock instant to milliseconds since the Unix epoch.
pub(crate) fn unix_millis(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
