//! Listener list backing [`ClientFactory::subscribe`](crate::transport::ClientFactory::subscribe).

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::transport::{ClientEvent, ClientEventListener, SubscriptionId};

/// Registered connect/disconnect listeners, notified in registration order.
///
/// Listeners are invoked outside the lock, so a listener may subscribe or
/// unsubscribe without deadlocking.
#[derive(Default)]
pub struct ClientEventListeners {
    listeners: RwLock<Vec<(SubscriptionId, ClientEventListener)>>,
    next_id: AtomicU64,
}

impl ClientEventListeners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: ClientEventListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn publish(&self, event: &ClientEvent) {
        let snapshot: Vec<ClientEventListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }
}

impl std::fmt::Debug for ClientEventListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientEventListeners")
            .field("listeners", &self.len())
            .finish()
    }
}
