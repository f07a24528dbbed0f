//! Codec error types.

/// Header bytes were present but do not form a valid payload or id.
///
/// A decode error means the peer speaks a different protocol. It is never
/// replaced by a default value.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("payload frame truncated: need at least {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },
    #[error("unsupported payload frame version {0}")]
    UnsupportedVersion(u8),
    #[error("declared payload length {declared} exceeds limit of {limit} bytes")]
    PayloadTooLarge { declared: usize, limit: usize },
    #[error("decompressed {actual} bytes, frame declared {declared}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("corrupt compressed payload: {0}")]
    Corrupt(#[from] flate2::DecompressError),
    #[error("compressed payload ends before the end-of-stream marker")]
    UnterminatedStream,
    #[error("malformed payload: {0}")]
    Malformed(#[from] rmp_serde::decode::Error),
    #[error("{0} bytes follow the end of the compressed stream")]
    TrailingFrameBytes(usize),
    #[error("{0} trailing bytes after payload")]
    TrailingBytes(usize),
    #[error("correlation id must be 16 bytes, got {len}")]
    InvalidCorrelationId { len: usize },
}

/// Failure while encoding a payload for the wire.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] rmp_serde::encode::Error),
    #[error("failed to compress payload: {0}")]
    Compress(#[source] std::io::Error),
    #[error("serialized payload of {len} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { len: usize, limit: usize },
}
