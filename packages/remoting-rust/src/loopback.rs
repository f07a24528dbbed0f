//! In-process transport.
//!
//! `LoopbackNetwork` maps service URIs to inbound dispatch pipelines;
//! `LoopbackClientFactory` hands out clients that deliver envelopes to those
//! pipelines. Only the envelope crosses over: each delivery runs with the
//! caller's ambient binding masked, the same as a call arriving from another
//! process.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use callscope_core::ambient;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tower::util::BoxService;
use tower::{Service, ServiceExt};

use crate::envelope::{InboundCall, RequestContext, RequestMessage, ResponseMessage};
use crate::error::RemotingError;
use crate::events::ClientEventListeners;
use crate::transport::{
    ClientEvent, ClientEventKind, ClientEventListener, ClientFactory, ClientTarget, EndpointRole,
    FailureInfo, RemotingClient, ResolvedEndpoint, ResolvedPartition, RetryDecision, RetrySettings,
    SubscriptionId,
};

type BoxedPipeline = BoxService<InboundCall, ResponseMessage, RemotingError>;

// ---------------------------------------------------------------------------
// LoopbackNetwork
// ---------------------------------------------------------------------------

/// Registry of in-process listeners, keyed by service URI.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    listeners: Arc<DashMap<String, Arc<Mutex<BoxedPipeline>>>>,
    next_call_id: Arc<AtomicU64>,
}

impl LoopbackNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts serving `service_uri` with `pipeline`, replacing any previous
    /// listener for the same URI.
    pub fn listen<S>(&self, service_uri: impl Into<String>, pipeline: S)
    where
        S: Service<InboundCall, Response = ResponseMessage, Error = RemotingError> + Send + 'static,
        S::Future: Send + 'static,
    {
        let service_uri = service_uri.into();
        tracing::info!(%service_uri, "loopback listener started");
        self.listeners
            .insert(service_uri, Arc::new(Mutex::new(BoxService::new(pipeline))));
    }

    /// Stops serving `service_uri`. Returns whether a listener was removed.
    pub fn close(&self, service_uri: &str) -> bool {
        let removed = self.listeners.remove(service_uri).is_some();
        if removed {
            tracing::info!(%service_uri, "loopback listener closed");
        }
        removed
    }

    #[must_use]
    pub fn is_listening(&self, service_uri: &str) -> bool {
        self.listeners.contains_key(service_uri)
    }

    /// Hands `message` to the listener for `service_uri` and waits for its
    /// response.
    async fn deliver(
        &self,
        service_uri: &str,
        listener_name: String,
        message: RequestMessage,
    ) -> Result<ResponseMessage, RemotingError> {
        let pipeline = self
            .listeners
            .get(service_uri)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RemotingError::ServiceUnavailable {
                service_uri: service_uri.to_string(),
            })?;

        let context = RequestContext {
            call_id: self.next_call_id.fetch_add(1, Ordering::Relaxed),
            listener_name,
            caller: Some("loopback".to_string()),
        };
        let call = InboundCall::new(context, message);

        ambient::run_detached(async move {
            // Held only while handing the call over, not while it runs.
            let fut = {
                let mut pipeline = pipeline.lock().await;
                pipeline.ready().await?.call(call)
            };
            fut.await
        })
        .await
    }
}

impl fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackNetwork")
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// LoopbackClient
// ---------------------------------------------------------------------------

/// Client bound to one loopback service URI.
pub struct LoopbackClient {
    network: LoopbackNetwork,
    service_uri: String,
    listener_name: ArcSwapOption<String>,
    endpoint: ArcSwapOption<ResolvedEndpoint>,
    partition: ArcSwapOption<ResolvedPartition>,
}

impl LoopbackClient {
    fn new(network: LoopbackNetwork, target: &ClientTarget) -> Self {
        let service_uri = target.service_uri().to_string();
        let partition_key = match target {
            ClientTarget::Service { partition_key, .. } => partition_key.clone(),
            ClientTarget::Resolved { previous, .. } => previous.partition_key.clone(),
        };
        let version = match target {
            ClientTarget::Service { .. } => 1,
            ClientTarget::Resolved { previous, .. } => previous.version + 1,
        };
        let endpoint = ResolvedEndpoint {
            address: format!("loopback://{service_uri}"),
            role: EndpointRole::Stateless,
        };
        let partition = ResolvedPartition {
            service_uri: service_uri.clone(),
            partition_key,
            endpoints: vec![endpoint.clone()],
            version,
        };

        let listener_name = target.listener_name().map(str::to_owned);

        Self {
            network,
            service_uri,
            listener_name: ArcSwapOption::from_pointee(listener_name),
            endpoint: ArcSwapOption::from_pointee(endpoint),
            partition: ArcSwapOption::from_pointee(partition),
        }
    }

    #[must_use]
    pub fn service_uri(&self) -> &str {
        &self.service_uri
    }

    fn listener_name_or_default(&self) -> String {
        self.listener_name().unwrap_or_default()
    }
}

impl fmt::Debug for LoopbackClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackClient")
            .field("service_uri", &self.service_uri)
            .field("listener_name", &self.listener_name())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemotingClient for LoopbackClient {
    async fn send_one_way(&self, request: RequestMessage) -> Result<(), RemotingError> {
        if !self.network.is_listening(&self.service_uri) {
            return Err(RemotingError::ServiceUnavailable {
                service_uri: self.service_uri.clone(),
            });
        }

        let network = self.network.clone();
        let service_uri = self.service_uri.clone();
        let listener_name = self.listener_name_or_default();
        tokio::spawn(async move {
            let method = request.method.clone();
            if let Err(err) = network.deliver(&service_uri, listener_name, request).await {
                tracing::warn!(%service_uri, %method, error = %err, "one-way delivery failed");
            }
        });
        Ok(())
    }

    async fn request_response(
        &self,
        request: RequestMessage,
    ) -> Result<ResponseMessage, RemotingError> {
        self.network
            .deliver(&self.service_uri, self.listener_name_or_default(), request)
            .await
    }

    fn resolved_partition(&self) -> Option<ResolvedPartition> {
        self.partition.load_full().map(|partition| partition.as_ref().clone())
    }

    fn set_resolved_partition(&self, partition: Option<ResolvedPartition>) {
        self.partition.store(partition.map(Arc::new));
    }

    fn listener_name(&self) -> Option<String> {
        self.listener_name.load_full().map(|name| name.as_ref().clone())
    }

    fn set_listener_name(&self, name: Option<String>) {
        self.listener_name.store(name.map(Arc::new));
    }

    fn endpoint(&self) -> Option<ResolvedEndpoint> {
        self.endpoint.load_full().map(|endpoint| endpoint.as_ref().clone())
    }

    fn set_endpoint(&self, endpoint: Option<ResolvedEndpoint>) {
        self.endpoint.store(endpoint.map(Arc::new));
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// LoopbackClientFactory
// ---------------------------------------------------------------------------

/// [`ClientFactory`] over a [`LoopbackNetwork`].
///
/// Publishes `Connected` for every client it creates and `Disconnected` when a
/// non-transient failure is reported for one of them.
#[derive(Debug)]
pub struct LoopbackClientFactory {
    network: LoopbackNetwork,
    listeners: ClientEventListeners,
}

impl LoopbackClientFactory {
    #[must_use]
    pub fn new(network: LoopbackNetwork) -> Self {
        Self {
            network,
            listeners: ClientEventListeners::new(),
        }
    }
}

#[async_trait]
impl ClientFactory for LoopbackClientFactory {
    async fn get_client(
        &self,
        target: ClientTarget,
        _retry: &RetrySettings,
    ) -> Result<Arc<dyn RemotingClient>, RemotingError> {
        if !self.network.is_listening(target.service_uri()) {
            return Err(RemotingError::ServiceUnavailable {
                service_uri: target.service_uri().to_string(),
            });
        }

        let client: Arc<dyn RemotingClient> =
            Arc::new(LoopbackClient::new(self.network.clone(), &target));
        tracing::debug!(service_uri = target.service_uri(), "loopback client connected");
        self.listeners.publish(&ClientEvent {
            kind: ClientEventKind::Connected,
            client: Arc::clone(&client),
        });
        Ok(client)
    }

    async fn report_operation_failure(
        &self,
        client: Arc<dyn RemotingClient>,
        failure: &FailureInfo,
        retry: &RetrySettings,
    ) -> Result<RetryDecision, RemotingError> {
        let Some(loopback) = client.as_any().downcast_ref::<LoopbackClient>() else {
            return Err(RemotingError::InvalidClientType {
                type_name: "foreign RemotingClient",
            });
        };

        tracing::debug!(
            service_uri = loopback.service_uri(),
            transient = failure.transient,
            message = %failure.message,
            "operation failure reported"
        );

        if failure.transient {
            return Ok(RetryDecision {
                should_retry: true,
                retry_delay: retry.transient_backoff,
                is_transient: true,
            });
        }

        self.listeners.publish(&ClientEvent {
            kind: ClientEventKind::Disconnected,
            client: Arc::clone(&client),
        });
        Ok(RetryDecision {
            should_retry: false,
            retry_delay: retry.non_transient_backoff,
            is_transient: false,
        })
    }

    fn subscribe(&self, listener: ClientEventListener) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use callscope_core::AmbientContext;
    use parking_lot::Mutex as SyncMutex;
    use tokio::sync::mpsc;
    use tower::service_fn;

    use super::*;
    use crate::dispatch::DispatchFuture;
    use crate::testing::RecordingClient;
    use crate::transport::{PartitionKey, ReplicaSelector};

    fn echo() -> impl Service<
        InboundCall,
        Response = ResponseMessage,
        Error = RemotingError,
        Future = DispatchFuture,
    > + Send {
        service_fn(|call: InboundCall| -> DispatchFuture {
            Box::pin(async move { Ok(ResponseMessage::new(call.message.body)) })
        })
    }

    fn request(body: &'static [u8]) -> RequestMessage {
        RequestMessage::new("echo", "echo", Bytes::from_static(body))
    }

    #[tokio::test]
    async fn request_response_reaches_listener() {
        let network = LoopbackNetwork::new();
        network.listen("svc://echo", echo());
        let factory = LoopbackClientFactory::new(network);

        let client = factory
            .get_client(ClientTarget::service("svc://echo"), &RetrySettings::default())
            .await
            .unwrap();
        let resp = client.request_response(request(b"hello")).await.unwrap();
        assert_eq!(resp.body, Bytes::from_static(b"hello"));

        let endpoint = client.endpoint().unwrap();
        assert_eq!(endpoint.address, "loopback://svc://echo");
        assert_eq!(client.resolved_partition().unwrap().version, 1);
    }

    #[tokio::test]
    async fn unknown_service_is_unavailable() {
        let factory = LoopbackClientFactory::new(LoopbackNetwork::new());
        let Err(err) = factory
            .get_client(ClientTarget::service("svc://nowhere"), &RetrySettings::default())
            .await
        else {
            panic!("unknown service handed out a client");
        };
        assert!(matches!(err, RemotingError::ServiceUnavailable { .. }));
    }

    #[tokio::test]
    async fn closed_listener_fails_later_calls() {
        let network = LoopbackNetwork::new();
        network.listen("svc://echo", echo());
        let factory = LoopbackClientFactory::new(network.clone());
        let client = factory
            .get_client(ClientTarget::service("svc://echo"), &RetrySettings::default())
            .await
            .unwrap();

        assert!(network.close("svc://echo"));
        assert!(!network.close("svc://echo"));
        let err = client.request_response(request(b"x")).await.unwrap_err();
        assert!(matches!(
            err,
            RemotingError::ServiceUnavailable { service_uri } if service_uri == "svc://echo"
        ));
    }

    #[tokio::test]
    async fn delivery_masks_caller_binding() {
        let network = LoopbackNetwork::new();
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        network.listen(
            "svc://raw",
            service_fn(move |call: InboundCall| {
                sink.lock().push((ambient::current(), call.context.clone()));
                async { Ok::<_, RemotingError>(ResponseMessage::empty()) }
            }),
        );
        let factory = LoopbackClientFactory::new(network);
        let target = ClientTarget::Service {
            service_uri: "svc://raw".to_string(),
            partition_key: PartitionKey::Int64(3),
            replica: ReplicaSelector::Primary,
            listener_name: Some("remoting".to_string()),
        };
        let client = factory
            .get_client(target, &RetrySettings::default())
            .await
            .unwrap();

        ambient::run_scoped(
            AmbientContext::originate(),
            client.request_response(request(b"")),
        )
        .await
        .unwrap();

        let seen = seen.lock();
        assert!(seen[0].0.is_none());
        assert_eq!(seen[0].1.listener_name, "remoting");
        assert_eq!(seen[0].1.caller.as_deref(), Some("loopback"));
    }

    #[tokio::test]
    async fn one_way_sends_are_delivered_in_background() {
        let network = LoopbackNetwork::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        network.listen(
            "svc://sink",
            service_fn(move |call: InboundCall| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(call.message.body);
                    Ok::<_, RemotingError>(ResponseMessage::empty())
                }
            }),
        );
        let factory = LoopbackClientFactory::new(network);
        let client = factory
            .get_client(ClientTarget::service("svc://sink"), &RetrySettings::default())
            .await
            .unwrap();

        client.send_one_way(request(b"fire")).await.unwrap();
        let body = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(body, Bytes::from_static(b"fire"));
    }

    #[tokio::test]
    async fn failure_reports_drive_events_and_decisions() {
        let network = LoopbackNetwork::new();
        network.listen("svc://echo", echo());
        let factory = LoopbackClientFactory::new(network);

        let events = Arc::new(SyncMutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        factory.subscribe(Arc::new(move |event: &ClientEvent| sink.lock().push(event.kind)));

        let retry = RetrySettings::default();
        let client = factory
            .get_client(ClientTarget::service("svc://echo"), &retry)
            .await
            .unwrap();

        let transient = factory
            .report_operation_failure(
                Arc::clone(&client),
                &FailureInfo {
                    message: "timeout".to_string(),
                    transient: true,
                },
                &retry,
            )
            .await
            .unwrap();
        assert!(transient.should_retry);
        assert_eq!(transient.retry_delay, retry.transient_backoff);

        let fatal = factory
            .report_operation_failure(
                client,
                &FailureInfo {
                    message: "service deleted".to_string(),
                    transient: false,
                },
                &retry,
            )
            .await
            .unwrap();
        assert!(!fatal.should_retry);

        assert_eq!(
            *events.lock(),
            vec![ClientEventKind::Connected, ClientEventKind::Disconnected]
        );
    }

    #[tokio::test]
    async fn foreign_clients_are_rejected() {
        let factory = LoopbackClientFactory::new(LoopbackNetwork::new());
        let err = factory
            .report_operation_failure(
                Arc::new(RecordingClient::default()),
                &FailureInfo {
                    message: "boom".to_string(),
                    transient: true,
                },
                &RetrySettings::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RemotingError::InvalidClientType { .. }));
    }

    #[test]
    fn metadata_setters_replace_values() {
        let target = ClientTarget::service("svc://x");
        let client = LoopbackClient::new(LoopbackNetwork::new(), &target);
        assert!(client.listener_name().is_none());

        client.set_listener_name(Some("secure".to_string()));
        client.set_endpoint(None);
        assert_eq!(client.listener_name().as_deref(), Some("secure"));
        assert!(client.endpoint().is_none());
        assert_eq!(client.service_uri(), "svc://x");
    }
}
