//! Call tracing middleware.
//!
//! Records call duration and outcome with `tracing`, tagged with the
//! correlation id of the ambient context the call runs under.

use std::task::{Context, Poll};
use std::time::Instant;

use callscope_core::ambient;
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use super::DispatchFuture;
use crate::envelope::{InboundCall, ResponseMessage};
use crate::error::RemotingError;

// ---------------------------------------------------------------------------
// CallTraceLayer
// ---------------------------------------------------------------------------

/// Tower layer that logs timing and outcome of every inbound call.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallTraceLayer;

impl<S> Layer<S> for CallTraceLayer {
    type Service = CallTraceService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CallTraceService { inner }
    }
}

// ---------------------------------------------------------------------------
// CallTraceService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CallTraceService<S> {
    inner: S,
}

impl<S> Service<InboundCall> for CallTraceService<S>
where
    S: Service<InboundCall, Response = ResponseMessage, Error = RemotingError> + Send,
    S::Future: Send + 'static,
{
    type Response = ResponseMessage;
    type Error = RemotingError;
    type Future = DispatchFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: InboundCall) -> Self::Future {
        let service = call.message.service.clone();
        let method = call.message.method.clone();
        let call_id = call.context.call_id;
        let correlation_id = ambient::current_correlation_id()
            .map(|id| id.to_string())
            .unwrap_or_default();

        let span = info_span!(
            "dispatch",
            call_id = call_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(call);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(_) => "error",
                };
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                match &result {
                    Ok(_) => tracing::info!(
                        %service,
                        %method,
                        call_id,
                        %correlation_id,
                        duration_ms,
                        outcome,
                        "call complete"
                    ),
                    Err(err) => tracing::info!(
                        %service,
                        %method,
                        call_id,
                        %correlation_id,
                        duration_ms,
                        outcome,
                        error = %err,
                        "call complete"
                    ),
                }

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
