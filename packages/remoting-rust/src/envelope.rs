//! Request/response envelopes and the context header accessors.
//!
//! Only headers matter to this crate; the business body is opaque bytes
//! serialized by the (out-of-scope) transport.

use std::collections::HashMap;

use bytes::Bytes;
use callscope_core::{
    decode_correlation_id, encode_correlation_id, ContextPayload, CorrelationId, DecodeError,
    EncodeError, PayloadCodec,
};

/// Header carrying the 16-byte correlation id.
pub const CORRELATION_ID_HEADER: &str = "correlation-id";

/// Header carrying the encoded [`ContextPayload`] frame.
pub const REQUEST_CONTEXT_HEADER: &str = "request-context";

// ---------------------------------------------------------------------------
// HeaderSet
// ---------------------------------------------------------------------------

/// Named binary headers of one envelope. Setting a key replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    entries: HashMap<String, Bytes>,
}

impl HeaderSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn try_get(&self, key: &str) -> Option<&[u8]> {
        self.entries.get(key).map(Bytes::as_ref)
    }

    /// Sets `key`, returning the value it replaced.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Option<Bytes> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn remove(&mut self, key: &str) -> Option<Bytes> {
        self.entries.remove(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Anything that carries a [`HeaderSet`].
pub trait HasHeaders {
    fn headers(&self) -> &HeaderSet;
    fn headers_mut(&mut self) -> &mut HeaderSet;
}

/// Outgoing/incoming request envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMessage {
    pub headers: HeaderSet,
    /// Target service name, used by [`crate::dispatch::MethodRouter`].
    pub service: String,
    pub method: String,
    pub body: Bytes,
}

impl RequestMessage {
    #[must_use]
    pub fn new(service: impl Into<String>, method: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            headers: HeaderSet::new(),
            service: service.into(),
            method: method.into(),
            body: body.into(),
        }
    }
}

impl HasHeaders for RequestMessage {
    fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderSet {
        &mut self.headers
    }
}

/// Response envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMessage {
    pub headers: HeaderSet,
    pub body: Bytes,
}

impl ResponseMessage {
    #[must_use]
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            headers: HeaderSet::new(),
            body: body.into(),
        }
    }

    /// A response with no headers and no body.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}

impl HasHeaders for ResponseMessage {
    fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderSet {
        &mut self.headers
    }
}

/// Transport-level facts about an inbound call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub call_id: u64,
    pub listener_name: String,
    /// Free-form caller description (address, peer name), if known.
    pub caller: Option<String>,
}

/// Unit of work handed to a request dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundCall {
    pub context: RequestContext,
    pub message: RequestMessage,
}

impl InboundCall {
    #[must_use]
    pub fn new(context: RequestContext, message: RequestMessage) -> Self {
        Self { context, message }
    }
}

// ---------------------------------------------------------------------------
// ContextHeadersExt
// ---------------------------------------------------------------------------

/// Reads and writes the two context headers on any envelope.
pub trait ContextHeadersExt: HasHeaders {
    /// Correlation id header, or [`CorrelationId::EMPTY`] when absent.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the header is not 16 bytes.
    fn correlation_id(&self) -> Result<CorrelationId, DecodeError> {
        decode_correlation_id(self.headers().try_get(CORRELATION_ID_HEADER).unwrap_or_default())
    }

    fn set_correlation_id(&mut self, id: CorrelationId) {
        self.headers_mut()
            .set(CORRELATION_ID_HEADER, encode_correlation_id(id).to_vec());
    }

    /// Decoded payload header, or `None` when absent.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the header is present but not a valid frame.
    fn context_payload(&self, codec: &PayloadCodec) -> Result<Option<ContextPayload>, DecodeError> {
        self.headers()
            .try_get(REQUEST_CONTEXT_HEADER)
            .map(|bytes| codec.decode(bytes))
            .transpose()
    }

    /// Encodes `payload` into the payload header, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError`] if the payload cannot be encoded; the headers
    /// are left untouched in that case.
    fn set_context_payload(
        &mut self,
        codec: &PayloadCodec,
        payload: &ContextPayload,
    ) -> Result<(), EncodeError> {
        let bytes = codec.encode(payload)?;
        self.headers_mut().set(REQUEST_CONTEXT_HEADER, bytes);
        Ok(())
    }

    fn clear_context_payload(&mut self) {
        self.headers_mut().remove(REQUEST_CONTEXT_HEADER);
    }
}

impl<T: HasHeaders + ?Sized> ContextHeadersExt for T {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
