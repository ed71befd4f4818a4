//! Refresh broadcast bus.
//!
//! Zero-argument callbacks run whenever a new notification is stored, for
//! collaborators that only need to know "something changed". Registration
//! hands back a [`RefreshRegistration`]; dropping it (or calling
//! [`RefreshRegistration::unregister`]) removes exactly that callback.

use std::sync::{Arc, Mutex, Weak};

/// Callback type held by the bus.
pub type RefreshCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Callbacks {
    next_id: u64,
    entries: Vec<(u64, RefreshCallback)>,
}

/// Ordered list of refresh callbacks.
#[derive(Clone, Default)]
pub struct RefreshBus {
    inner: Arc<Mutex<Callbacks>>,
}

impl std::fmt::Debug for RefreshBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshBus")
            .field("callbacks", &self.len())
            .finish()
    }
}

impl RefreshBus {
    /// Append `callback`. It stays registered until the returned guard is
    /// dropped.
    pub fn register(&self, callback: RefreshCallback) -> RefreshRegistration {
        let mut callbacks = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        callbacks.next_id += 1;
        let id = callbacks.next_id;
        callbacks.entries.push((id, callback));
        RefreshRegistration {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Run every callback in registration order. Returns how many ran.
    pub fn notify(&self) -> usize {
        let snapshot: Vec<RefreshCallback> = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in &snapshot {
            callback();
        }
        snapshot.len()
    }

    /// Number of registered callbacks.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    /// `true` when no callbacks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps one callback registered on a [`RefreshBus`].
#[must_use = "dropping the registration unregisters the callback"]
pub struct RefreshRegistration {
    bus: Weak<Mutex<Callbacks>>,
    id: u64,
}

impl std::fmt::Debug for RefreshRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshRegistration")
            .field("id", &self.id)
            .finish()
    }
}

impl RefreshRegistration {
    /// Remove the callback now.
    pub fn unregister(self) {}
}

impl Drop for RefreshRegistration {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock()
                .unwrap_or_else(|e| e.into_inner())
                .entries
                .retain(|(id, _)| *id != self.id);
        }
    }
}
