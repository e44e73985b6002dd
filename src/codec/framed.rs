//! The framed storage representation for byte-string backends: one leading
//! compression-tag byte followed by the payload, with conditional zlib
//! compression staged through a process-wide scratch-buffer pool.

use std::io::{Read, Write};
use std::ops::{Deref, DerefMut};

use flate2::write::ZlibEncoder;
use flate2::read::ZlibDecoder;
use flate2::Compression;
use parking_lot::Mutex;

use crate::codec::{ByteCodec, CacheCodec};
use crate::error::{CacheEntry, CacheError};
use crate::object::CacheObject;

/// Tag byte of an uncompressed frame.
pub const COMPRESSION_TYPE_NONE: u8 = 0x00;
/// Tag byte of a zlib-compressed frame.
pub const COMPRESSION_TYPE_ZLIB: u8 = 0x01;

/// Default size in bytes at which encoded values are compressed.
pub const DEFAULT_COMPRESS_THRESHOLD: i64 = 2 * 1024;

const MAX_POOLED_BUFFERS: usize = 16;

static BUFFER_POOL: Mutex<Vec<Vec<u8>>> = Mutex::new(Vec::new());

/// A scratch buffer borrowed from the process-wide pool.
///
/// The buffer is empty on acquisition and is cleared and returned to the
/// pool when the guard drops, unless it [escapes](Self::escape) first.
struct PooledBuffer {
    buf: Option<Vec<u8>>,
}

impl PooledBuffer {
    fn acquire() -> Self {
        let mut buf = BUFFER_POOL.lock().pop().unwrap_or_default();
        buf.clear();
        PooledBuffer { buf: Some(buf) }
    }

    /// Detaches the buffer from the pool; it drops as a plain allocation.
    ///
    /// Used when the bytes were handed to a decoder that does not declare
    /// buffer-release safety and the storage must not be reused.
    fn escape(mut self) {
        self.buf = None;
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        self.buf.as_ref().expect("buffer escaped")
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Vec<u8> {
        self.buf.as_mut().expect("buffer escaped")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            let mut pool = BUFFER_POOL.lock();
            if pool.len() < MAX_POOLED_BUFFERS {
                pool.push(buf);
            }
        }
    }
}

/// Wraps a byte codec in a self-describing frame with conditional zlib
/// compression.
///
/// The threshold controls when the inner encoding is compressed:
/// a negative threshold never compresses, zero always compresses, and a
/// positive threshold compresses once the inner encoding reaches it.
/// Returned frames never share storage with the pool.
#[derive(Debug, Clone)]
pub struct FramedCompressionCodec<C> {
    inner: C,
    threshold: i64,
}

impl<C> FramedCompressionCodec<C> {
    pub fn new(inner: C, threshold: i64) -> Self {
        FramedCompressionCodec { inner, threshold }
    }

    /// Constructs the codec with [`DEFAULT_COMPRESS_THRESHOLD`].
    pub fn with_default_threshold(inner: C) -> Self {
        Self::new(inner, DEFAULT_COMPRESS_THRESHOLD)
    }

    fn should_compress(&self, inner_len: usize) -> bool {
        self.threshold >= 0 && inner_len as i64 >= self.threshold
    }
}

impl<V, C> CacheCodec<V> for FramedCompressionCodec<C>
where
    C: ByteCodec<V>,
    V: Send + Sync + 'static,
{
    type Stored = Vec<u8>;

    fn encode(&self, object: &CacheObject<V>) -> CacheEntry<Vec<u8>> {
        let mut inner_buf = PooledBuffer::acquire();
        self.inner.encode_bytes(object, &mut inner_buf)?;

        if !self.should_compress(inner_buf.len()) {
            let mut framed = Vec::with_capacity(1 + inner_buf.len());
            framed.push(COMPRESSION_TYPE_NONE);
            framed.extend_from_slice(&inner_buf);
            return Ok(framed);
        }

        let mut compress_buf = PooledBuffer::acquire();
        compress_zlib(&inner_buf, &mut compress_buf)?;

        let mut framed = Vec::with_capacity(1 + compress_buf.len());
        framed.push(COMPRESSION_TYPE_ZLIB);
        framed.extend_from_slice(&compress_buf);
        Ok(framed)
    }

    fn decode(&self, data: Vec<u8>) -> CacheEntry<CacheObject<V>> {
        let Some((&tag, payload)) = data.split_first() else {
            return Err(CacheError::DecompressZeroLengthData);
        };

        match tag {
            COMPRESSION_TYPE_NONE => self.inner.decode_bytes(payload),
            COMPRESSION_TYPE_ZLIB => {
                let mut scratch = PooledBuffer::acquire();
                decompress_zlib(payload, &mut scratch)?;
                let decoded = self.inner.decode_bytes(&scratch);
                if !C::BUFFER_RELEASE_SAFE {
                    scratch.escape();
                }
                decoded
            }
            other => Err(CacheError::UnsupportedCompressionTypeId(other)),
        }
    }
}

fn compress_zlib(data: &[u8], buf: &mut Vec<u8>) -> CacheEntry<()> {
    let mut encoder = ZlibEncoder::new(&mut *buf, Compression::default());
    encoder.write_all(data)?;
    encoder.finish()?;
    Ok(())
}

fn decompress_zlib(data: &[u8], buf: &mut Vec<u8>) -> CacheEntry<()> {
    let mut decoder = ZlibDecoder::new(data);
    decoder.read_to_end(buf)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;

    fn codec(threshold: i64) -> FramedCompressionCodec<JsonCodec> {
        FramedCompressionCodec::new(JsonCodec::new(), threshold)
    }

    #[test]
    fn always_compress_round_trip() {
        let codec = codec(0);
        let object = CacheObject::new("hello".to_string(), 1234);

        let framed = codec.encode(&object).unwrap();
        assert_eq!(framed[0], COMPRESSION_TYPE_ZLIB);
        assert_eq!(codec.decode(framed).unwrap(), object);
    }

    #[test]
    fn below_threshold_stays_plain() {
        let codec = codec(1 << 20);
        let object = CacheObject::new("hello".to_string(), 1234);

        let framed = codec.encode(&object).unwrap();
        assert_eq!(framed[0], COMPRESSION_TYPE_NONE);
        assert_eq!(
            &framed[1..],
            br#"{"Value":"hello","ExpireAtMillis":1234}"#
        );
        assert_eq!(codec.decode(framed).unwrap(), object);
    }

    #[test]
    fn negative_threshold_never_compresses() {
        let codec = codec(-1);
        let object = CacheObject::new("x".repeat(64 * 1024), 0);

        let framed = codec.encode(&object).unwrap();
        assert_eq!(framed[0], COMPRESSION_TYPE_NONE);
        assert_eq!(codec.decode(framed).unwrap(), object);
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let object = CacheObject::new("hello".to_string(), 1234);
        let inner_len = CacheCodec::encode(&JsonCodec::new(), &object).unwrap().len();

        let at = codec(inner_len as i64).encode(&object).unwrap();
        assert_eq!(at[0], COMPRESSION_TYPE_ZLIB);

        let above = codec(inner_len as i64 + 1).encode(&object).unwrap();
        assert_eq!(above[0], COMPRESSION_TYPE_NONE);
    }

    #[test]
    fn compression_shrinks_repetitive_payloads() {
        let codec = codec(0);
        let object = CacheObject::new("na".repeat(4096), 0);

        let framed = codec.encode(&object).unwrap();
        assert_eq!(framed[0], COMPRESSION_TYPE_ZLIB);
        assert!(framed.len() < 8192);
        assert_eq!(codec.decode(framed).unwrap(), object);
    }

    #[test]
    fn empty_frame_is_rejected() {
        let err = CacheCodec::<String>::decode(&codec(0), Vec::new()).unwrap_err();
        assert_eq!(err, CacheError::DecompressZeroLengthData);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = CacheCodec::<String>::decode(&codec(0), vec![0xff, 0x00]).unwrap_err();
        assert_eq!(err, CacheError::UnsupportedCompressionTypeId(0xff));
    }

    #[test]
    fn corrupt_zlib_payload_is_rejected() {
        let err =
            CacheCodec::<String>::decode(&codec(0), vec![COMPRESSION_TYPE_ZLIB, 1, 2, 3])
                .unwrap_err();
        assert!(matches!(err, CacheError::Codec(_)));
    }

    #[test]
    fn unsafe_inner_codec_still_decodes() {
        // A codec that refuses the transient-buffer contract; the scratch
        // buffer escapes the pool instead of being recycled.
        #[derive(Clone, Copy)]
        struct OwningJson;

        impl ByteCodec<String> for OwningJson {
            const BUFFER_RELEASE_SAFE: bool = false;

            fn encode_bytes(
                &self,
                object: &CacheObject<String>,
                buf: &mut Vec<u8>,
            ) -> CacheEntry<()> {
                JsonCodec::new().encode_bytes(object, buf)
            }

            fn decode_bytes(&self, data: &[u8]) -> CacheEntry<CacheObject<String>> {
                JsonCodec::new().decode_bytes(data)
            }
        }

        let codec = FramedCompressionCodec::new(OwningJson, 0);
        let object = CacheObject::new("hello".to_string(), 7);

        let framed = codec.encode(&object).unwrap();
        assert_eq!(framed[0], COMPRESSION_TYPE_ZLIB);
        assert_eq!(codec.decode(framed).unwrap(), object);
    }

    #[test]
    fn pooled_buffers_are_reset_on_acquire() {
        {
            let mut buf = PooledBuffer::acquire();
            buf.extend_from_slice(b"scratch");
        }
        let buf = PooledBuffer::acquire();
        assert!(buf.is_empty());
    }
}
