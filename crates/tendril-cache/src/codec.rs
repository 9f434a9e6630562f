//! Payload framing and zstd compression for stored values.
//!
//! Every stored blob starts with a one-byte marker:
//!
//! | Marker | Body |
//! |--------|------|
//! | `0x00` | raw serialised bytes |
//! | `0x1F` | zstd frame of the serialised bytes |
//!
//! Payloads at or above the threshold are compressed, smaller ones are kept
//! raw. Readers never need out-of-band metadata.

use std::io::Cursor;

use tracing::debug;

use crate::error::CacheError;

pub const MARKER_RAW: u8 = 0x00;
pub const MARKER_ZSTD: u8 = 0x1F;

/// Default size at which payloads are compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Default zstd compression level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Encoder/decoder for stored payloads.
#[derive(Debug, Clone, Copy)]
pub struct PayloadCodec {
    threshold: usize,
    level: i32,
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new(DEFAULT_COMPRESSION_THRESHOLD, DEFAULT_COMPRESSION_LEVEL)
    }
}

impl PayloadCodec {
    pub const fn new(threshold: usize, level: i32) -> Self {
        Self { threshold, level }
    }

    pub const fn threshold(&self) -> usize {
        self.threshold
    }

    /// Frame a serialised payload, compressing it if large enough.
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, CacheError> {
        if payload.len() < self.threshold {
            let mut out = Vec::with_capacity(payload.len() + 1);
            out.push(MARKER_RAW);
            out.extend_from_slice(payload);
            return Ok(out);
        }

        let compressed = zstd::encode_all(Cursor::new(payload), self.level)
            .map_err(|e| CacheError::Codec(format!("compression failed: {e}")))?;

        debug!(
            uncompressed_size = payload.len(),
            compressed_size = compressed.len(),
            "compressed cache payload"
        );

        let mut out = Vec::with_capacity(compressed.len() + 1);
        out.push(MARKER_ZSTD);
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    /// Strip the marker and decompress if needed.
    pub fn decode(&self, blob: &[u8]) -> Result<Vec<u8>, CacheError> {
        let (marker, body) = blob
            .split_first()
            .ok_or_else(|| CacheError::Codec("empty payload".to_string()))?;

        match *marker {
            MARKER_RAW => Ok(body.to_vec()),
            MARKER_ZSTD => zstd::decode_all(Cursor::new(body))
                .map_err(|e| CacheError::Codec(format!("decompression failed: {e}"))),
            other => Err(CacheError::Codec(format!(
                "unknown payload marker 0x{other:02x}"
            ))),
        }
    }
}
