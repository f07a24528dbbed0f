//! Callscope remoting: carries the ambient request context across RPC hops.
//!
//! Outbound, [`ContextClientFactory`] hands out [`ContextClient`]s that stamp
//! the caller's correlation id and context payload onto every envelope.
//! Inbound, [`ContextLayer`] reads them back and runs the dispatcher inside
//! that context.

pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod events;
pub mod loopback;
pub mod outbound;
pub mod telemetry;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{ContextConfig, EdgePolicy};
pub use dispatch::{
    build_dispatch_pipeline, CallTraceLayer, ContextLayer, ContextService, MethodRouter,
};
pub use envelope::{
    ContextHeadersExt, HasHeaders, HeaderSet, InboundCall, RequestContext, RequestMessage,
    ResponseMessage, CORRELATION_ID_HEADER, REQUEST_CONTEXT_HEADER,
};
pub use error::RemotingError;
pub use loopback::{LoopbackClient, LoopbackClientFactory, LoopbackNetwork};
pub use outbound::{ContextClient, ContextClientFactory};
pub use telemetry::{init_tracing, LogFormat};
pub use transport::{
    ClientEvent, ClientEventKind, ClientEventListener, ClientFactory, ClientTarget, FailureInfo,
    RemotingClient, RetryDecision, RetrySettings, SubscriptionId,
};
