//! Wire codec for request-context headers.
//!
//! Payload frame layout:
//!
//! ```text
//! +---------+------------------+---------------------------+
//! | version | raw_len (u32 BE) | deflate(MsgPack payload)  |
//! +---------+------------------+---------------------------+
//!   1 byte       4 bytes              variable
//! ```
//!
//! `raw_len` is the exact length of the serialized payload before
//! compression. Decoding checks it against the decompressed output, so a
//! truncated or padded stream is rejected instead of yielding a partial value.

use std::io::Write;

use flate2::write::DeflateEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use serde::Deserialize;

use crate::correlation::CorrelationId;
use crate::error::{DecodeError, EncodeError};
use crate::payload::ContextPayload;

/// Current payload frame version.
pub const FRAME_VERSION: u8 = 1;

/// Version byte plus the big-endian `u32` length.
const FRAME_HEADER_LEN: usize = 5;

/// Tuning knobs for [`PayloadCodec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    /// Deflate level, 0 (store) to 9 (best). Values above 9 are clamped.
    pub compression_level: u32,
    /// Upper bound on the serialized payload size, enforced on both encode and
    /// decode so a hostile header cannot trigger an oversized inflate.
    pub max_payload_len: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            compression_level: 6,
            max_payload_len: 64 * 1024,
        }
    }
}

/// Encodes and decodes [`ContextPayload`] header values.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadCodec {
    config: CodecConfig,
}

impl PayloadCodec {
    /// Creates a codec with the given tuning.
    #[must_use]
    pub const fn new(config: CodecConfig) -> Self {
        Self { config }
    }

    /// The tuning this codec was built with.
    #[must_use]
    pub const fn config(&self) -> &CodecConfig {
        &self.config
    }

    /// Serializes `payload` with named `MsgPack` fields and compresses it into
    /// a versioned frame.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if serialization or compression fails, or the
    /// serialized payload is larger than `max_payload_len`.
    pub fn encode(&self, payload: &ContextPayload) -> Result<Vec<u8>, EncodeError> {
        let raw = rmp_serde::to_vec_named(payload)?;
        let limit = self.config.max_payload_len;
        let raw_len = u32::try_from(raw.len())
            .ok()
            .filter(|_| raw.len() <= limit)
            .ok_or(EncodeError::PayloadTooLarge {
                len: raw.len(),
                limit,
            })?;

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + raw.len());
        frame.push(FRAME_VERSION);
        frame.extend_from_slice(&raw_len.to_be_bytes());

        let level = Compression::new(self.config.compression_level.min(9));
        let mut encoder = DeflateEncoder::new(frame, level);
        encoder.write_all(&raw).map_err(EncodeError::Compress)?;
        encoder.finish().map_err(EncodeError::Compress)
    }

    /// Inverse of [`PayloadCodec::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] for truncated frames, unknown versions,
    /// oversized declarations, corrupt compressed data, length mismatches,
    /// malformed `MsgPack`, or bytes left over after the payload.
    pub fn decode(&self, bytes: &[u8]) -> Result<ContextPayload, DecodeError> {
        let Some((header, body)) = bytes.split_first_chunk::<FRAME_HEADER_LEN>() else {
            return Err(DecodeError::Truncated {
                needed: FRAME_HEADER_LEN,
                actual: bytes.len(),
            });
        };

        let [version, len @ ..] = *header;
        if version != FRAME_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }

        let declared = u32::from_be_bytes(len) as usize;
        let limit = self.config.max_payload_len;
        if declared > limit {
            return Err(DecodeError::PayloadTooLarge { declared, limit });
        }

        // One byte of headroom so an over-long stream shows up as a length
        // mismatch instead of being cut off silently.
        let mut raw = Vec::with_capacity(declared + 1);
        let mut inflater = Decompress::new(false);
        let status = inflater.decompress_vec(body, &mut raw, FlushDecompress::Finish)?;
        if raw.len() != declared {
            return Err(DecodeError::LengthMismatch {
                declared,
                actual: raw.len(),
            });
        }
        if status != Status::StreamEnd {
            return Err(DecodeError::UnterminatedStream);
        }
        let consumed = usize::try_from(inflater.total_in()).unwrap_or(usize::MAX);
        if consumed < body.len() {
            return Err(DecodeError::TrailingFrameBytes(body.len() - consumed));
        }

        let mut cursor = raw.as_slice();
        let payload = ContextPayload::deserialize(&mut rmp_serde::Deserializer::new(&mut cursor))?;
        if !cursor.is_empty() {
            return Err(DecodeError::TrailingBytes(cursor.len()));
        }
        Ok(payload)
    }
}

/// Fixed 16-byte wire form of a correlation id.
#[must_use]
pub const fn encode_correlation_id(id: CorrelationId) -> [u8; 16] {
    id.to_bytes()
}

/// Decodes a correlation id header value.
///
/// An empty value yields [`CorrelationId::EMPTY`].
///
/// # Errors
///
/// Returns [`DecodeError::InvalidCorrelationId`] if the value is neither
/// empty nor exactly 16 bytes long.
pub fn decode_correlation_id(bytes: &[u8]) -> Result<CorrelationId, DecodeError> {
    if bytes.is_empty() {
        return Ok(CorrelationId::EMPTY);
    }
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| DecodeError::InvalidCorrelationId { len: bytes.len() })?;
    Ok(CorrelationId::from_bytes(raw))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
