//! Call routing: dispatches an `InboundCall` to a handler service by the
//! service name in its envelope.

use std::collections::HashMap;
use std::task::{ready, Context, Poll};

use tower::util::BoxService;
use tower::Service;

use super::DispatchFuture;
use crate::envelope::{InboundCall, ResponseMessage};
use crate::error::RemotingError;

type Handler = BoxService<InboundCall, ResponseMessage, RemotingError>;

// ---------------------------------------------------------------------------
// MethodRouter
// ---------------------------------------------------------------------------

/// Routes calls to the handler registered for `RequestMessage::service`.
///
/// Calls naming an unregistered service fail with
/// `RemotingError::UnknownService`.
pub struct MethodRouter {
    services: HashMap<String, Handler>,
}

impl MethodRouter {
    /// Creates a router with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    /// Register the handler for `name`, replacing any earlier one.
    pub fn register<S>(&mut self, name: impl Into<String>, service: S)
    where
        S: Service<InboundCall, Response = ResponseMessage, Error = RemotingError> + Send + 'static,
        S::Future: Send + 'static,
    {
        self.services.insert(name.into(), BoxService::new(service));
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn route<S>(mut self, name: impl Into<String>, service: S) -> Self
    where
        S: Service<InboundCall, Response = ResponseMessage, Error = RemotingError> + Send + 'static,
        S::Future: Send + 'static,
    {
        self.register(name, service);
        self
    }

    /// Whether a handler is registered for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }
}

impl Default for MethodRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MethodRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodRouter")
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Service<InboundCall> for MethodRouter {
    type Response = ResponseMessage;
    type Error = RemotingError;
    type Future = DispatchFuture;

    /// Ready once every registered handler is: the next call may target any
    /// of them, and a handler must not be called before it reports ready.
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        for handler in self.services.values_mut() {
            ready!(handler.poll_ready(cx))?;
        }
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: InboundCall) -> Self::Future {
        match self.services.get_mut(&call.message.service) {
            Some(handler) => handler.call(call),
            None => {
                let name = call.message.service;
                Box::pin(async move { Err(RemotingError::UnknownService { name }) })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tower::{service_fn, ServiceExt};

    use super::*;
    use crate::envelope::{RequestContext, RequestMessage};

    fn named(name: &'static str) -> impl Service<
        InboundCall,
        Response = ResponseMessage,
        Error = RemotingError,
        Future = DispatchFuture,
    > + Send {
        service_fn(move |_call: InboundCall| -> DispatchFuture {
            Box::pin(async move { Ok(ResponseMessage::new(Bytes::from_static(name.as_bytes()))) })
        })
    }

    fn call_to(service: &str) -> InboundCall {
        InboundCall::new(
            RequestContext::default(),
            RequestMessage::new(service, "m", Bytes::new()),
        )
    }

    #[tokio::test]
    async fn routes_to_registered_service() {
        let router = MethodRouter::new().route("one", named("one"));

        let resp = router.oneshot(call_to("one")).await.unwrap();
        assert_eq!(resp.body, Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn unknown_service_returns_error() {
        let router = MethodRouter::new().route("one", named("one"));

        let err = router.oneshot(call_to("nonexistent")).await.unwrap_err();
        assert!(matches!(
            err,
            RemotingError::UnknownService { name } if name == "nonexistent"
        ));
    }

    #[tokio::test]
    async fn routes_to_correct_service_among_multiple() {
        let mut router = MethodRouter::new();
        router.register("one", named("one"));
        router.register("two", named("two"));
        assert!(router.contains("two"));
        assert!(!router.contains("three"));

        let resp = ServiceExt::ready(&mut router)
            .await
            .unwrap()
            .call(call_to("two"))
            .await
            .unwrap();
        assert_eq!(resp.body, Bytes::from_static(b"two"));

        let resp = ServiceExt::ready(&mut router)
            .await
            .unwrap()
            .call(call_to("one"))
            .await
            .unwrap();
        assert_eq!(resp.body, Bytes::from_static(b"one"));
    }
}
