//! Inbound dispatch stack.
//!
//! - [`context`]: installs the caller's request context around each call
//! - [`trace`]: call timing and outcome via `tracing` spans
//! - [`router`]: routes calls to handler services by service name
//! - [`pipeline`]: composes the layers into a single service stack

use std::future::Future;
use std::pin::Pin;

use crate::envelope::ResponseMessage;
use crate::error::RemotingError;

pub mod context;
pub mod pipeline;
pub mod router;
pub mod trace;

pub use context::{ContextLayer, ContextService};
pub use pipeline::build_dispatch_pipeline;
pub use router::MethodRouter;
pub use trace::{CallTraceLayer, CallTraceService};

/// Future returned by every service in the dispatch stack.
pub type DispatchFuture =
    Pin<Box<dyn Future<Output = Result<ResponseMessage, RemotingError>> + Send>>;
