//! Ambient context store: the request context of the logical call currently
//! executing, without threading it through every signature.
//!
//! Bindings live in a tokio task-local, so they follow a future across
//! suspension points and worker threads and are invisible to every other
//! task. A binding is installed only for the lifetime of a scope
//! ([`run_scoped`], [`run_scoped_sync`]); leaving the scope by return, error,
//! panic or cancellation restores whatever was visible before.

use std::future::Future;
use std::sync::Arc;

use crate::correlation::CorrelationId;
use crate::payload::ContextPayload;

tokio::task_local! {
    /// `None` inside a scope means "explicitly no binding" (see [`run_detached`]).
    static AMBIENT: Option<AmbientContext>;
}

/// The request context bound to one logical call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbientContext {
    correlation_id: CorrelationId,
    payload: Option<Arc<ContextPayload>>,
}

impl AmbientContext {
    /// Binds a correlation id and an optional payload.
    #[must_use]
    pub fn new(correlation_id: CorrelationId, payload: Option<ContextPayload>) -> Self {
        Self {
            correlation_id,
            payload: payload.map(Arc::new),
        }
    }

    /// A fresh correlation id with the default payload, for calls that
    /// originate at this process.
    #[must_use]
    pub fn originate() -> Self {
        Self::new(CorrelationId::new(), Some(ContextPayload::default()))
    }

    /// Correlation id of this binding.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// The payload the caller sent, if any.
    #[must_use]
    pub fn payload(&self) -> Option<&ContextPayload> {
        self.payload.as_deref()
    }

    /// The payload, or the edge default when the caller sent none.
    #[must_use]
    pub fn payload_or_default(&self) -> ContextPayload {
        self.payload().cloned().unwrap_or_default()
    }
}

/// Returns the binding of the calling logical call, if any.
///
/// Cheap: the payload is shared, not copied.
#[must_use]
pub fn current() -> Option<AmbientContext> {
    AMBIENT.try_with(Clone::clone).ok().flatten()
}

/// Correlation id of the current binding, if any.
#[must_use]
pub fn current_correlation_id() -> Option<CorrelationId> {
    AMBIENT
        .try_with(|slot| slot.as_ref().map(AmbientContext::correlation_id))
        .ok()
        .flatten()
}

/// Installs `binding` for every poll of `work`.
///
/// The previous binding is restored whenever `work` yields, completes, or is
/// dropped before completion.
pub fn run_scoped<F>(binding: AmbientContext, work: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    AMBIENT.scope(Some(binding), work)
}

/// Synchronous counterpart of [`run_scoped`].
pub fn run_scoped_sync<R>(binding: AmbientContext, f: impl FnOnce() -> R) -> R {
    AMBIENT.sync_scope(Some(binding), f)
}

/// Runs `work` with no binding visible, masking the caller's.
pub fn run_detached<F>(work: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    AMBIENT.scope(None, work)
}

/// Carries the caller's current binding (or its absence) into `work`.
///
/// Use this for futures that will be polled outside the current task.
pub fn propagate<F>(work: F) -> impl Future<Output = F::Output>
where
    F: Future,
{
    AMBIENT.scope(current(), work)
}

/// `tokio::spawn` that keeps the spawning call's binding.
///
/// Spawned tasks otherwise start with no binding.
pub fn spawn_propagated<F>(work: F) -> tokio::task::JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(propagate(work))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
