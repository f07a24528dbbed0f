//! `callscope` core: the request-context payload, its wire codec, and the
//! task-scoped ambient store that makes it visible to a logical call.

pub mod ambient;
pub mod codec;
pub mod correlation;
pub mod error;
pub mod payload;

pub use ambient::AmbientContext;
pub use codec::{decode_correlation_id, encode_correlation_id, CodecConfig, PayloadCodec};
pub use correlation::CorrelationId;
pub use error::{DecodeError, EncodeError};
pub use payload::{ContextPayload, DEFAULT_LANGUAGE};
