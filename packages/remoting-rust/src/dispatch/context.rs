//! Inbound context middleware.
//!
//! Reads the caller's correlation id and context payload from the request
//! headers and runs the wrapped dispatcher with them installed as the ambient
//! binding. The binding is removed again however the call ends.

use std::task::{Context, Poll};

use callscope_core::{
    ambient, AmbientContext, ContextPayload, CorrelationId, DecodeError, PayloadCodec,
};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use super::DispatchFuture;
use crate::config::{ContextConfig, EdgePolicy};
use crate::envelope::{ContextHeadersExt, InboundCall, RequestMessage, ResponseMessage};
use crate::error::RemotingError;

// ---------------------------------------------------------------------------
// ContextLayer
// ---------------------------------------------------------------------------

/// Tower layer that scopes each inbound call to the context it carried.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextLayer {
    codec: PayloadCodec,
    edge_policy: EdgePolicy,
}

impl ContextLayer {
    #[must_use]
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            codec: PayloadCodec::new(config.codec),
            edge_policy: config.edge_policy,
        }
    }
}

impl<S> Layer<S> for ContextLayer {
    type Service = ContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContextService {
            inner,
            codec: self.codec,
            edge_policy: self.edge_policy,
        }
    }
}

// ---------------------------------------------------------------------------
// ContextService
// ---------------------------------------------------------------------------

/// Service wrapper produced by [`ContextLayer`].
#[derive(Debug, Clone)]
pub struct ContextService<S> {
    inner: S,
    codec: PayloadCodec,
    edge_policy: EdgePolicy,
}

impl<S> ContextService<S> {
    /// Builds the binding for `message`. Absent headers are not an error;
    /// unreadable ones are.
    fn binding_for(&self, message: &RequestMessage) -> Result<AmbientContext, DecodeError> {
        let mut correlation_id = message.correlation_id()?;
        let mut payload = message.context_payload(&self.codec)?;

        if self.edge_policy == EdgePolicy::Originate {
            if correlation_id.is_empty() {
                correlation_id = CorrelationId::new();
            }
            if payload.is_none() {
                payload = Some(ContextPayload::default());
            }
        }

        Ok(AmbientContext::new(correlation_id, payload))
    }
}

impl<S> Service<InboundCall> for ContextService<S>
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
        let binding = match self.binding_for(&call.message) {
            Ok(binding) => binding,
            Err(err) => {
                tracing::warn!(
                    service = %call.message.service,
                    method = %call.message.method,
                    call_id = call.context.call_id,
                    error = %err,
                    "rejecting call with unreadable context headers"
                );
                return Box::pin(async move { Err(RemotingError::Decode(err)) });
            }
        };

        let span = info_span!(
            "remoting_call",
            correlation_id = %binding.correlation_id(),
            service = %call.message.service,
            method = %call.message.method,
            call_id = call.context.call_id,
        );
        tracing::debug!(
            parent: &span,
            has_payload = binding.payload().is_some(),
            "installed request context"
        );

        // The synchronous part of the handler runs inside the scope as well.
        let inner = &mut self.inner;
        let fut = ambient::run_scoped_sync(binding.clone(), || inner.call(call));
        Box::pin(ambient::run_scoped(binding, fut).instrument(span))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use bytes::Bytes;
    use parking_lot::Mutex;
    use tower::{service_fn, ServiceExt};

    use super::*;
    use crate::envelope::{RequestContext, REQUEST_CONTEXT_HEADER};

    type Seen = Arc<Mutex<Vec<Option<AmbientContext>>>>;

    /// Handler that records the binding it observes before and after a
    /// suspension point.
    #[derive(Clone)]
    struct Recorder {
        seen: Seen,
    }

    impl Service<InboundCall> for Recorder {
        type Response = ResponseMessage;
        type Error = RemotingError;
        type Future = DispatchFuture;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _call: InboundCall) -> Self::Future {
            self.seen.lock().push(ambient::current());
            let seen = Arc::clone(&self.seen);
            Box::pin(async move {
                tokio::task::yield_now().await;
                seen.lock().push(ambient::current());
                Ok(ResponseMessage::empty())
            })
        }
    }

    fn recorder(seen: Seen) -> Recorder {
        Recorder { seen }
    }

    fn call_with(message: RequestMessage) -> InboundCall {
        InboundCall::new(
            RequestContext {
                call_id: 7,
                listener_name: "remoting".to_string(),
                caller: None,
            },
            message,
        )
    }

    fn alice() -> AmbientContext {
        AmbientContext::new(
            "11111111-1111-1111-1111-111111111111".parse().unwrap(),
            Some(ContextPayload::new("fr", "fr-FR", "alice")),
        )
    }

    fn stamped(ctx: &AmbientContext) -> RequestMessage {
        let mut message = RequestMessage::new("two", "service_two_method", Bytes::new());
        message.set_correlation_id(ctx.correlation_id());
        if let Some(payload) = ctx.payload() {
            message
                .set_context_payload(&PayloadCodec::default(), payload)
                .unwrap();
        }
        message
    }

    #[tokio::test]
    async fn handler_observes_caller_context_across_suspension() {
        let seen = Seen::default();
        let svc = ContextLayer::default().layer(recorder(seen.clone()));
        let ctx = alice();

        svc.oneshot(call_with(stamped(&ctx))).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].as_ref(), Some(&ctx));
        assert_eq!(seen[1].as_ref(), Some(&ctx));
    }

    #[tokio::test]
    async fn absent_headers_install_empty_context() {
        let seen = Seen::default();
        let svc = ContextLayer::default().layer(recorder(seen.clone()));

        let message = RequestMessage::new("two", "service_two_method", Bytes::new());
        svc.oneshot(call_with(message)).await.unwrap();

        let observed = seen.lock()[1].clone().unwrap();
        assert_eq!(observed.correlation_id(), CorrelationId::EMPTY);
        assert!(observed.payload().is_none());
        let fallback = observed.payload_or_default();
        assert_eq!(fallback.ui_language(), Some("en"));
        assert_eq!(fallback.culture_code(), Some("en"));
        assert_eq!(fallback.user_id(), Some(""));
    }

    #[tokio::test]
    async fn originate_policy_fills_missing_context() {
        let seen = Seen::default();
        let layer = ContextLayer::new(&ContextConfig {
            edge_policy: EdgePolicy::Originate,
            ..ContextConfig::default()
        });
        let mut svc = layer.layer(recorder(seen.clone()));

        let message = RequestMessage::new("one", "service_one_method", Bytes::new());
        ServiceExt::ready(&mut svc)
            .await
            .unwrap()
            .call(call_with(message))
            .await
            .unwrap();

        let observed = seen.lock()[0].clone().unwrap();
        assert!(!observed.correlation_id().is_empty());
        assert_eq!(observed.payload(), Some(&ContextPayload::default()));

        // Context that did arrive is kept as is.
        let ctx = alice();
        ServiceExt::ready(&mut svc)
            .await
            .unwrap()
            .call(call_with(stamped(&ctx)))
            .await
            .unwrap();
        assert_eq!(seen.lock()[2].as_ref(), Some(&ctx));
    }

    #[tokio::test]
    async fn corrupt_headers_fail_without_running_handler() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let svc = ContextLayer::default().layer(service_fn(move |_call: InboundCall| {
            flag.store(true, Ordering::SeqCst);
            async { Ok::<_, RemotingError>(ResponseMessage::empty()) }
        }));

        let mut message = RequestMessage::new("two", "m", Bytes::new());
        message
            .headers
            .set(REQUEST_CONTEXT_HEADER, Bytes::from_static(&[0x9c, 0x01, 0xff]));

        let err = svc.oneshot(call_with(message)).await.unwrap_err();
        assert!(matches!(err, RemotingError::Decode(_)));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn handler_errors_pass_through_unchanged() {
        let svc = ContextLayer::default().layer(service_fn(|_call: InboundCall| async {
            Err::<ResponseMessage, _>(RemotingError::Handler(anyhow::anyhow!("order not found")))
        }));

        let err = svc.oneshot(call_with(stamped(&alice()))).await.unwrap_err();
        match err {
            RemotingError::Handler(inner) => assert_eq!(inner.to_string(), "order not found"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(ambient::current().is_none());
    }

    #[tokio::test]
    async fn previous_binding_is_restored_after_dispatch() {
        let outer = AmbientContext::originate();
        let inbound = alice();

        let observed = ambient::run_scoped(outer.clone(), async {
            let seen = Seen::default();
            let svc = ContextLayer::default().layer(recorder(seen.clone()));
            svc.oneshot(call_with(stamped(&inbound))).await.unwrap();
            assert_eq!(seen.lock()[1].as_ref(), Some(&inbound));
            ambient::current()
        })
        .await;

        assert_eq!(observed, Some(outer));
        assert!(ambient::current().is_none());
    }

    #[tokio::test]
    async fn dropping_a_call_mid_handler_restores_the_caller_binding() {
        let outer = AmbientContext::originate();
        let inbound = alice();
        let seen = Seen::default();
        let entered = Arc::new(tokio::sync::Notify::new());

        let sink = Arc::clone(&seen);
        let signal = Arc::clone(&entered);
        let mut svc = ContextLayer::default().layer(service_fn(move |_call: InboundCall| {
            let sink = Arc::clone(&sink);
            let signal = Arc::clone(&signal);
            async move {
                sink.lock().push(ambient::current());
                signal.notify_one();
                std::future::pending::<()>().await;
                Ok::<_, RemotingError>(ResponseMessage::empty())
            }
        }));

        let after = ambient::run_scoped(outer.clone(), async {
            let call = ServiceExt::ready(&mut svc)
                .await
                .unwrap()
                .call(call_with(stamped(&inbound)));
            tokio::select! {
                _ = call => unreachable!("handler never completes"),
                () = entered.notified() => {}
            }
            ambient::current()
        })
        .await;

        assert_eq!(seen.lock().as_slice(), &[Some(inbound)]);
        assert_eq!(after, Some(outer));
        assert!(ambient::current().is_none());
    }
}
