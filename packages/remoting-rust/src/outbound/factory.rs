//! Client factory decorator: every client it hands out propagates context.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use callscope_core::PayloadCodec;

use super::client::ContextClient;
use crate::error::RemotingError;
use crate::events::ClientEventListeners;
use crate::transport::{
    ClientEventListener, ClientFactory, ClientTarget, FailureInfo, RemotingClient, RetryDecision,
    RetrySettings, SubscriptionId,
};

/// Wraps a transport [`ClientFactory`] so that each client it returns is a
/// [`ContextClient`].
///
/// Connect/disconnect events of the inner factory are re-published to this
/// factory's subscribers unchanged and in the same order. The forwarding
/// subscription is removed when the wrapper is dropped.
pub struct ContextClientFactory {
    inner: Arc<dyn ClientFactory>,
    codec: PayloadCodec,
    listeners: Arc<ClientEventListeners>,
    forwarding: SubscriptionId,
}

impl ContextClientFactory {
    #[must_use]
    pub fn new(inner: Arc<dyn ClientFactory>, codec: PayloadCodec) -> Self {
        let listeners = Arc::new(ClientEventListeners::new());
        let forward_to = Arc::clone(&listeners);
        let forwarding = inner.subscribe(Arc::new(move |event| forward_to.publish(event)));
        Self {
            inner,
            codec,
            listeners,
            forwarding,
        }
    }

    #[must_use]
    pub fn inner(&self) -> &Arc<dyn ClientFactory> {
        &self.inner
    }

    /// Recovers the transport client behind one of our wrappers.
    fn unwrap_client(
        client: &Arc<dyn RemotingClient>,
    ) -> Result<Arc<dyn RemotingClient>, RemotingError> {
        client
            .as_any()
            .downcast_ref::<ContextClient>()
            .map(|wrapper| Arc::clone(wrapper.inner()))
            .ok_or(RemotingError::InvalidClientType {
                type_name: "foreign RemotingClient",
            })
    }
}

impl Drop for ContextClientFactory {
    fn drop(&mut self) {
        self.inner.unsubscribe(self.forwarding);
    }
}

impl fmt::Debug for ContextClientFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextClientFactory")
            .field("codec", &self.codec)
            .field("listeners", &self.listeners)
            .field("forwarding", &self.forwarding)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ClientFactory for ContextClientFactory {
    async fn get_client(
        &self,
        target: ClientTarget,
        retry: &RetrySettings,
    ) -> Result<Arc<dyn RemotingClient>, RemotingError> {
        let client = self.inner.get_client(target, retry).await?;
        Ok(Arc::new(ContextClient::new(client, self.codec)))
    }

    async fn report_operation_failure(
        &self,
        client: Arc<dyn RemotingClient>,
        failure: &FailureInfo,
        retry: &RetrySettings,
    ) -> Result<RetryDecision, RemotingError> {
        let inner_client = Self::unwrap_client(&client)?;
        self.inner
            .report_operation_failure(inner_client, failure, retry)
            .await
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
