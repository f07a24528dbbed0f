//! Client decorator that stamps the ambient request context onto every
//! outgoing envelope.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use callscope_core::{ambient, PayloadCodec};

use crate::envelope::{ContextHeadersExt, RequestMessage, ResponseMessage};
use crate::error::RemotingError;
use crate::transport::{RemotingClient, ResolvedEndpoint, ResolvedPartition};

/// Wraps a transport client and injects the caller's ambient context.
///
/// Holds one `Arc` of the inner client: the inner client is released exactly
/// once, when its last owner (this wrapper or anyone else) lets go of it.
pub struct ContextClient {
    inner: Arc<dyn RemotingClient>,
    codec: PayloadCodec,
}

impl ContextClient {
    #[must_use]
    pub fn new(inner: Arc<dyn RemotingClient>, codec: PayloadCodec) -> Self {
        Self { inner, codec }
    }

    /// The wrapped transport client.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn RemotingClient> {
        &self.inner
    }

    /// Writes the current binding into `request`'s headers, replacing any
    /// same-named headers already there. Without a binding the request is
    /// left untouched.
    fn inject(&self, request: &mut RequestMessage) -> Result<(), RemotingError> {
        let Some(ctx) = ambient::current() else {
            tracing::trace!(
                service = %request.service,
                method = %request.method,
                "no ambient context, forwarding without context headers"
            );
            return Ok(());
        };

        // Payload first: if encoding fails the headers stay as they were.
        match ctx.payload() {
            Some(payload) => request.set_context_payload(&self.codec, payload)?,
            None => request.clear_context_payload(),
        }
        request.set_correlation_id(ctx.correlation_id());

        tracing::debug!(
            correlation_id = %ctx.correlation_id(),
            service = %request.service,
            method = %request.method,
            "injected request context"
        );
        Ok(())
    }
}

impl fmt::Debug for ContextClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextClient")
            .field("listener_name", &self.inner.listener_name())
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemotingClient for ContextClient {
    async fn send_one_way(&self, mut request: RequestMessage) -> Result<(), RemotingError> {
        self.inject(&mut request)?;
        self.inner.send_one_way(request).await
    }

    async fn request_response(
        &self,
        mut request: RequestMessage,
    ) -> Result<ResponseMessage, RemotingError> {
        self.inject(&mut request)?;
        self.inner.request_response(request).await
    }

    fn resolved_partition(&self) -> Option<ResolvedPartition> {
        self.inner.resolved_partition()
    }

    fn set_resolved_partition(&self, partition: Option<ResolvedPartition>) {
        self.inner.set_resolved_partition(partition);
    }

    fn listener_name(&self) -> Option<String> {
        self.inner.listener_name()
    }

    fn set_listener_name(&self, name: Option<String>) {
        self.inner.set_listener_name(name);
    }

    fn endpoint(&self) -> Option<ResolvedEndpoint> {
        self.inner.endpoint()
    }

    fn set_endpoint(&self, endpoint: Option<ResolvedEndpoint>) {
        self.inner.set_endpoint(endpoint);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
