//! Scan listener registry.
//!
//! Subscribers are called synchronously in registration order. A panicking
//! subscriber is caught, logged, and skipped; the rest still run and the
//! pipeline keeps going.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

use crate::dedup::DetectionResult;

/// Callback invoked with each accepted scan.
pub type ScanListener = Arc<dyn Fn(&DetectionResult) + Send + Sync>;

/// Opaque subscription token returned by [`ListenerRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Default)]
pub struct ListenerRegistry {
    next_id: u64,
    listeners: Vec<(ListenerId, ScanListener)>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, callback: F) -> ListenerId
    where
        F: Fn(&DetectionResult) + Send + Sync + 'static,
    {
        self.subscribe_arc(Arc::new(callback))
    }

    /// Register an already shared callback. The same `Arc` can later be
    /// removed with [`ListenerRegistry::unsubscribe_arc`].
    pub fn subscribe_arc(&mut self, callback: ScanListener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.listeners.push((id, callback));
        id
    }

    /// Remove a listener by token. Returns `false` if it wasn't registered.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Remove every registration of this exact callback (pointer identity).
    pub fn unsubscribe_arc(&mut self, callback: &ScanListener) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(_, cb)| !Arc::ptr_eq(cb, callback));
        self.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Call every listener with `result`. Returns how many completed.
    pub fn notify(&self, result: &DetectionResult) -> usize {
        let mut delivered = 0;
        for (id, callback) in &self.listeners {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(result))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    let reason = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(
                        listener = ?id,
                        barcode = %result.value,
                        reason = %reason,
                        "Scan listener failed"
                    );
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
