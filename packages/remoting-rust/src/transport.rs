//! Transport collaborator contracts.
//!
//! The real RPC transport (connections, endpoint resolution, retries, body
//! serialization) lives outside this crate. These traits are the minimal
//! surface the context decorators need from it.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::envelope::{RequestMessage, ResponseMessage};
use crate::error::RemotingError;

// ---------------------------------------------------------------------------
// Addressing
// ---------------------------------------------------------------------------

/// Partition selector for partitioned services.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum PartitionKey {
    #[default]
    Singleton,
    Int64(i64),
    Named(String),
}

/// Which replica of the target partition to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReplicaSelector {
    #[default]
    Default,
    Primary,
    RandomInstance,
    RandomSecondary,
}

/// Role of a resolved endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointRole {
    Stateless,
    Primary,
    Secondary,
}

/// A concrete address the transport resolved for a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    pub address: String,
    pub role: EndpointRole,
}

/// Result of resolving a service partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPartition {
    pub service_uri: String,
    pub partition_key: PartitionKey,
    pub endpoints: Vec<ResolvedEndpoint>,
    /// Bumped by the resolver each time the partition moves.
    pub version: u64,
}

/// Address selectors accepted by [`ClientFactory::get_client`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientTarget {
    /// Resolve from scratch.
    Service {
        service_uri: String,
        partition_key: PartitionKey,
        replica: ReplicaSelector,
        listener_name: Option<String>,
    },
    /// Re-resolve starting from a previous resolution (e.g. after a failure).
    Resolved {
        previous: ResolvedPartition,
        replica: ReplicaSelector,
        listener_name: Option<String>,
    },
}

impl ClientTarget {
    /// Singleton-partition target with default replica and listener.
    #[must_use]
    pub fn service(service_uri: impl Into<String>) -> Self {
        Self::Service {
            service_uri: service_uri.into(),
            partition_key: PartitionKey::Singleton,
            replica: ReplicaSelector::Default,
            listener_name: None,
        }
    }

    #[must_use]
    pub fn service_uri(&self) -> &str {
        match self {
            Self::Service { service_uri, .. } => service_uri,
            Self::Resolved { previous, .. } => &previous.service_uri,
        }
    }

    #[must_use]
    pub fn listener_name(&self) -> Option<&str> {
        match self {
            Self::Service { listener_name, .. } | Self::Resolved { listener_name, .. } => {
                listener_name.as_deref()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Retry plumbing (forwarded untouched)
// ---------------------------------------------------------------------------

/// Retry policy handed through to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySettings {
    pub max_retry_count: u32,
    pub transient_backoff: Duration,
    pub non_transient_backoff: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retry_count: 10,
            transient_backoff: Duration::from_millis(250),
            non_transient_backoff: Duration::from_secs(2),
        }
    }
}

/// What went wrong with a call, as reported back to the factory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureInfo {
    pub message: String,
    pub transient: bool,
}

/// The transport's verdict on a reported failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub retry_delay: Duration,
    pub is_transient: bool,
}

// ---------------------------------------------------------------------------
// RemotingClient
// ---------------------------------------------------------------------------

/// A connected client for one resolved service partition.
#[async_trait]
pub trait RemotingClient: Send + Sync {
    /// Fire-and-forget send.
    async fn send_one_way(&self, request: RequestMessage) -> Result<(), RemotingError>;

    /// Request/response round trip.
    async fn request_response(&self, request: RequestMessage)
        -> Result<ResponseMessage, RemotingError>;

    fn resolved_partition(&self) -> Option<ResolvedPartition>;

    fn set_resolved_partition(&self, partition: Option<ResolvedPartition>);

    fn listener_name(&self) -> Option<String>;

    fn set_listener_name(&self, name: Option<String>);

    fn endpoint(&self) -> Option<ResolvedEndpoint>;

    fn set_endpoint(&self, endpoint: Option<ResolvedEndpoint>);

    /// Enables decorators to recognise their own wrappers.
    fn as_any(&self) -> &dyn Any;
}

// ---------------------------------------------------------------------------
// Client events
// ---------------------------------------------------------------------------

/// Connectivity transition reported by a [`ClientFactory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEventKind {
    Connected,
    Disconnected,
}

/// A connect/disconnect notification. `client` is whatever the publishing
/// factory handed out.
#[derive(Clone)]
pub struct ClientEvent {
    pub kind: ClientEventKind,
    pub client: Arc<dyn RemotingClient>,
}

impl fmt::Debug for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientEvent")
            .field("kind", &self.kind)
            .field("listener_name", &self.client.listener_name())
            .finish_non_exhaustive()
    }
}

/// Callback registered with [`ClientFactory::subscribe`].
pub type ClientEventListener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

/// Handle returned by [`ClientFactory::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

// ---------------------------------------------------------------------------
// ClientFactory
// ---------------------------------------------------------------------------

/// Produces [`RemotingClient`]s and receives failure reports about them.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn get_client(
        &self,
        target: ClientTarget,
        retry: &RetrySettings,
    ) -> Result<Arc<dyn RemotingClient>, RemotingError>;

    /// Reports a failed operation on `client`, which must have come from this
    /// factory.
    async fn report_operation_failure(
        &self,
        client: Arc<dyn RemotingClient>,
        failure: &FailureInfo,
        retry: &RetrySettings,
    ) -> Result<RetryDecision, RemotingError>;

    /// Registers a connect/disconnect listener.
    fn subscribe(&self, listener: ClientEventListener) -> SubscriptionId;

    /// Removes a listener. Returns `false` if it was not registered.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}
