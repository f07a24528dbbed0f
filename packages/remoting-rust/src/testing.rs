//! Shared stubs for unit tests.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::envelope::{RequestMessage, ResponseMessage};
use crate::error::RemotingError;
use crate::events::ClientEventListeners;
use crate::transport::{
    ClientEvent, ClientEventKind, ClientEventListener, ClientFactory, ClientTarget, FailureInfo,
    RemotingClient, ResolvedEndpoint, ResolvedPartition, RetryDecision, RetrySettings,
    SubscriptionId,
};

/// Client that records every request it is asked to send.
#[derive(Default)]
pub(crate) struct RecordingClient {
    pub sent: Mutex<Vec<RequestMessage>>,
    pub one_way: Mutex<Vec<RequestMessage>>,
    pub listener: Mutex<Option<String>>,
    pub endpoint: Mutex<Option<ResolvedEndpoint>>,
    pub partition: Mutex<Option<ResolvedPartition>>,
    /// Incremented when the client is dropped.
    pub drops: Option<Arc<AtomicUsize>>,
}

impl RecordingClient {
    pub fn with_drop_counter(drops: Arc<AtomicUsize>) -> Self {
        let mut client = Self::default();
        client.drops = Some(drops);
        client
    }

    pub fn last_sent(&self) -> RequestMessage {
        self.sent.lock().last().cloned().expect("nothing sent")
    }
}

impl Drop for RecordingClient {
    fn drop(&mut self) {
        if let Some(drops) = &self.drops {
            drops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl RemotingClient for RecordingClient {
    async fn send_one_way(&self, request: RequestMessage) -> Result<(), RemotingError> {
        self.one_way.lock().push(request);
        Ok(())
    }

    async fn request_response(
        &self,
        request: RequestMessage,
    ) -> Result<ResponseMessage, RemotingError> {
        let body = request.body.clone();
        self.sent.lock().push(request);
        Ok(ResponseMessage::new(body))
    }

    fn resolved_partition(&self) -> Option<ResolvedPartition> {
        self.partition.lock().clone()
    }

    fn set_resolved_partition(&self, partition: Option<ResolvedPartition>) {
        *self.partition.lock() = partition;
    }

    fn listener_name(&self) -> Option<String> {
        self.listener.lock().clone()
    }

    fn set_listener_name(&self, name: Option<String>) {
        *self.listener.lock() = name;
    }

    fn endpoint(&self) -> Option<ResolvedEndpoint> {
        self.endpoint.lock().clone()
    }

    fn set_endpoint(&self, endpoint: Option<ResolvedEndpoint>) {
        *self.endpoint.lock() = endpoint;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory handing out [`RecordingClient`]s and recording failure reports.
#[derive(Default)]
pub(crate) struct StubFactory {
    pub listeners: ClientEventListeners,
    pub issued: Mutex<Vec<Arc<RecordingClient>>>,
    pub reported: Mutex<Vec<(Arc<dyn RemotingClient>, FailureInfo)>>,
}

impl StubFactory {
    pub fn emit(&self, kind: ClientEventKind, client: Arc<dyn RemotingClient>) {
        self.listeners.publish(&ClientEvent { kind, client });
    }
}

#[async_trait]
impl ClientFactory for StubFactory {
    async fn get_client(
        &self,
        target: ClientTarget,
        _retry: &RetrySettings,
    ) -> Result<Arc<dyn RemotingClient>, RemotingError> {
        let client = Arc::new(RecordingClient::default());
        client.set_listener_name(target.listener_name().map(str::to_owned));
        self.issued.lock().push(Arc::clone(&client));
        Ok(client)
    }

    async fn report_operation_failure(
        &self,
        client: Arc<dyn RemotingClient>,
        failure: &FailureInfo,
        _retry: &RetrySettings,
    ) -> Result<RetryDecision, RemotingError> {
        if client.as_any().downcast_ref::<RecordingClient>().is_none() {
            return Err(RemotingError::InvalidClientType {
                type_name: "foreign",
            });
        }
        self.reported.lock().push((client, failure.clone()));
        Ok(RetryDecision {
            should_retry: failure.transient,
            retry_delay: std::time::Duration::from_millis(5),
            is_transient: failure.transient,
        })
    }

    fn subscribe(&self, listener: ClientEventListener) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }
}
