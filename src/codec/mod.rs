//! Codecs translate between [`CacheObject`]s and the storage representation
//! a [`CacheProvider`](crate::CacheProvider) persists.
//!
//! Two seams exist: [`CacheCodec`] is the polymorphic encode/decode pair the
//! facade drives, generic over an arbitrary storage type. [`ByteCodec`] is
//! the slice-level contract for byte-string backends; it additionally
//! declares, at compile time, whether its decoder is safe to run against a
//! transient buffer. [`FramedCompressionCodec`] composes on top of any
//! `ByteCodec`.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CacheEntry;
use crate::object::CacheObject;

mod framed;

pub use framed::{
    FramedCompressionCodec, COMPRESSION_TYPE_NONE, COMPRESSION_TYPE_ZLIB,
    DEFAULT_COMPRESS_THRESHOLD,
};

/// Encodes and decodes cache objects to storage values.
///
/// Implementations must be safe for concurrent use. Decoders must
/// reconstruct exactly the tuple that was encoded; encoders never see
/// storage framing, only the cache object itself.
pub trait CacheCodec<V>: Send + Sync {
    /// The storage representation this codec produces.
    type Stored: Send + 'static;

    /// Encodes the cache object into its storage value.
    fn encode(&self, object: &CacheObject<V>) -> CacheEntry<Self::Stored>;

    /// Decodes a storage value back into a cache object.
    fn decode(&self, data: Self::Stored) -> CacheEntry<CacheObject<V>>;
}

/// A codec whose storage representation is a byte string.
///
/// `encode_bytes` appends to a caller-provided buffer so that composing
/// codecs can stage the inner encoding in reusable scratch space.
pub trait ByteCodec<V>: Send + Sync {
    /// Whether [`decode_bytes`](Self::decode_bytes) retains no references
    /// into its input after returning.
    ///
    /// Composing codecs use this to decide whether a scratch buffer that
    /// backed the input may be recycled after the decode returns.
    const BUFFER_RELEASE_SAFE: bool;

    /// Encodes the cache object, appending to `buf`.
    fn encode_bytes(&self, object: &CacheObject<V>, buf: &mut Vec<u8>) -> CacheEntry<()>;

    /// Decodes a cache object from a byte slice.
    fn decode_bytes(&self, data: &[u8]) -> CacheEntry<CacheObject<V>>;
}

/// Passes cache objects through without encoding.
///
/// For in-process backends that hold typed objects directly; the storage
/// representation is the cache object itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughCodec;

impl PassthroughCodec {
    pub fn new() -> Self {
        PassthroughCodec
    }
}

impl<V> CacheCodec<V> for PassthroughCodec
where
    V: Clone + Send + Sync + 'static,
{
    type Stored = CacheObject<V>;

    fn encode(&self, object: &CacheObject<V>) -> CacheEntry<Self::Stored> {
        Ok(object.clone())
    }

    fn decode(&self, data: Self::Stored) -> CacheEntry<CacheObject<V>> {
        Ok(data)
    }
}

/// Serializes cache objects as compact JSON.
///
/// The wire form is `{"Value": <payload>, "ExpireAtMillis": <int64>}` with
/// no trailing newline and no HTML escaping. Unknown fields are accepted on
/// decode. The decoder copies everything it needs out of the input, so the
/// codec is buffer-release-safe.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        JsonCodec
    }
}

impl<V> ByteCodec<V> for JsonCodec
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    const BUFFER_RELEASE_SAFE: bool = true;

    fn encode_bytes(&self, object: &CacheObject<V>, buf: &mut Vec<u8>) -> CacheEntry<()> {
        serde_json::to_writer(&mut *buf, object)?;
        Ok(())
    }

    fn decode_bytes(&self, data: &[u8]) -> CacheEntry<CacheObject<V>> {
        Ok(serde_json::from_slice(data)?)
    }
}

impl<V> CacheCodec<V> for JsonCodec
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Stored = Vec<u8>;

    fn encode(&self, object: &CacheObject<V>) -> CacheEntry<Vec<u8>> {
        let mut buf = Vec::new();
        ByteCodec::encode_bytes(self, object, &mut buf)?;
        Ok(buf)
    }

    fn decode(&self, data: Vec<u8>) -> CacheEntry<CacheObject<V>> {
        ByteCodec::decode_bytes(self, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;

    #[test]
    fn passthrough_round_trip() {
        let codec = PassthroughCodec::new();
        let object = CacheObject::new(vec![1u8, 2, 3], 99);

        let stored = codec.encode(&object).unwrap();
        assert_eq!(codec.decode(stored).unwrap(), object);
    }

    #[test]
    fn json_round_trip() {
        let codec = JsonCodec::new();
        let object = CacheObject::new("hello".to_string(), 1234);

        let stored = CacheCodec::encode(&codec, &object).unwrap();
        assert_eq!(stored, br#"{"Value":"hello","ExpireAtMillis":1234}"#);
        assert_eq!(CacheCodec::decode(&codec, stored).unwrap(), object);
    }

    #[test]
    fn json_no_trailing_newline() {
        let codec = JsonCodec::new();
        let stored = CacheCodec::encode(&codec, &CacheObject::new(1u8, 0)).unwrap();
        assert_ne!(stored.last(), Some(&b'\n'));
    }

    #[test]
    fn json_decode_rejects_garbage() {
        let codec = JsonCodec::new();
        let err = ByteCodec::<String>::decode_bytes(&codec, b"not json").unwrap_err();
        assert!(matches!(err, CacheError::Codec(_)));
    }
}
