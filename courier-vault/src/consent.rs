//! User consent gate.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

/// Consent change listener.
pub type ConsentListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Handle returned by [`ConsentGate::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Whether the user has consented to data leaving the device.
///
/// No request is dispatched while consent is withheld. Withholding
/// consent pauses delivery without discarding stored work.
pub struct ConsentGate {
    consent: AtomicBool,
    next_id: AtomicU64,
    listeners: RwLock<Vec<(SubscriptionId, ConsentListener)>>,
}

impl ConsentGate {
    pub fn new(has_consent: bool) -> Self {
        Self {
            consent: AtomicBool::new(has_consent),
            next_id: AtomicU64::new(1),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// A gate that starts with consent given.
    pub fn granted() -> Self {
        Self::new(true)
    }

    /// A gate that starts with consent withheld.
    pub fn withheld() -> Self {
        Self::new(false)
    }

    pub fn has_consent(&self) -> bool {
        self.consent.load(Ordering::Acquire)
    }

    /// Update consent. Listeners run only when the value changes.
    pub fn set_consent(&self, has_consent: bool) {
        let previous = self.consent.swap(has_consent, Ordering::AcqRel);
        if previous == has_consent {
            return;
        }
        debug!(has_consent, "User consent changed");

        // Listeners may subscribe or unsubscribe from inside the callback.
        let listeners: Vec<ConsentListener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(has_consent);
        }
    }

    /// Register a listener called on every consent change.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Default for ConsentGate {
    fn default() -> Self {
        Self::granted()
    }
}

impl std::fmt::Debug for ConsentGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentGate")
            .field("consent", &self.has_consent())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
