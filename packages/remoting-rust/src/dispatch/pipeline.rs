//! Pipeline composition: combines the dispatch layers into a single service stack.

use tower::ServiceBuilder;

use super::context::{ContextLayer, ContextService};
use super::router::MethodRouter;
use super::trace::{CallTraceLayer, CallTraceService};
use crate::config::ContextConfig;

/// Build the inbound pipeline by wrapping the `MethodRouter` with the
/// dispatch layers.
///
/// Layer order (outermost to innermost):
/// 1. `ContextLayer` -- install the caller's context for the whole call
/// 2. `CallTraceLayer` -- record timing and outcome under that context
///
/// The returned service implements `tower::Service<InboundCall>`.
#[must_use]
pub fn build_dispatch_pipeline(
    router: MethodRouter,
    config: &ContextConfig,
) -> ContextService<CallTraceService<MethodRouter>> {
    ServiceBuilder::new()
        .layer(ContextLayer::new(config))
        .layer(CallTraceLayer)
        .service(router)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
