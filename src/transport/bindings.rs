//! Event binding table.
//!
//! Maps `(channel, event)` pairs to ordered callback lists. The connection
//! task dispatches every application event through [`Dispatcher::dispatch`];
//! callbacks are cloned out of the table before they run, so a callback may
//! bind or unbind without deadlocking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

/// Callback invoked with the decoded event payload.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identity of one binding, used to remove exactly that binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(u64);

type Key = (String, String);

#[derive(Default)]
struct BindingTable {
    next_id: u64,
    by_key: HashMap<Key, Vec<(BindingId, EventCallback)>>,
    keys: HashMap<BindingId, Key>,
}

/// Shared binding table plus dispatch.
#[derive(Default)]
pub struct Dispatcher {
    table: Mutex<BindingTable>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("Dispatcher")
            .field("bindings", &table.keys.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Bind `callback` to `event` on `channel`.
    pub fn bind(&self, channel: &str, event: &str, callback: EventCallback) -> BindingId {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.next_id += 1;
        let id = BindingId(table.next_id);
        let key = (channel.to_string(), event.to_string());
        table
            .by_key
            .entry(key.clone())
            .or_default()
            .push((id, callback));
        table.keys.insert(id, key);
        id
    }

    /// Remove one binding. Returns `false` if it was already gone.
    pub fn unbind(&self, id: BindingId) -> bool {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let Some(key) = table.keys.remove(&id) else {
            return false;
        };
        if let Some(list) = table.by_key.get_mut(&key) {
            list.retain(|(bound, _)| *bound != id);
            if list.is_empty() {
                table.by_key.remove(&key);
            }
        }
        true
    }

    /// Remove every binding on `channel`, returning how many were removed.
    pub fn unbind_channel(&self, channel: &str) -> usize {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        let before = table.keys.len();
        table.keys.retain(|_, (bound, _)| bound != channel);
        table.by_key.retain(|(bound, _), _| bound != channel);
        before - table.keys.len()
    }

    /// Number of callbacks bound to `event` on `channel`.
    pub fn binding_count(&self, channel: &str, event: &str) -> usize {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table
            .by_key
            .get(&(channel.to_string(), event.to_string()))
            .map_or(0, Vec::len)
    }

    /// Drop all bindings.
    pub fn clear(&self) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table.by_key.clear();
        table.keys.clear();
    }

    /// Invoke every callback bound to `event` on `channel`, in binding
    /// order. Returns the number of callbacks invoked.
    pub fn dispatch(&self, channel: &str, event: &str, data: &Value) -> usize {
        let callbacks: Vec<EventCallback> = {
            let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table
                .by_key
                .get(&(channel.to_string(), event.to_string()))
                .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default()
        };

        for callback in &callbacks {
            callback(data);
        }
        callbacks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, EventCallback) {
        let hits = Arc::new(AtomicUsize::new(0));
        let cb_hits = Arc::clone(&hits);
        let cb: EventCallback = Arc::new(move |_| {
            cb_hits.fetch_add(1, Ordering::SeqCst);
        });
        (hits, cb)
    }

    #[test]
    fn test_dispatch_only_matching_pair() {
        let dispatcher = Dispatcher::default();
        let (hits, cb) = counter();
        dispatcher.bind("reports", "notification.sent", cb);

        assert_eq!(dispatcher.dispatch("reports", "notification.sent", &Value::Null), 1);
        assert_eq!(dispatcher.dispatch("reports", "points.updated", &Value::Null), 0);
        assert_eq!(dispatcher.dispatch("other", "notification.sent", &Value::Null), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_order_is_binding_order() {
        let dispatcher = Dispatcher::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = Arc::clone(&order);
            dispatcher.bind("c", "e", Arc::new(move |_| order.lock().unwrap().push(n)));
        }
        dispatcher.dispatch("c", "e", &Value::Null);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unbind_by_identity() {
        let dispatcher = Dispatcher::default();
        let (first_hits, first) = counter();
        let (second_hits, second) = counter();
        let first_id = dispatcher.bind("c", "e", first);
        dispatcher.bind("c", "e", second);

        assert!(dispatcher.unbind(first_id));
        assert!(!dispatcher.unbind(first_id));
        dispatcher.dispatch("c", "e", &Value::Null);

        assert_eq!(first_hits.load(Ordering::SeqCst), 0);
        assert_eq!(second_hits.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.binding_count("c", "e"), 1);
    }

    #[test]
    fn test_unbind_channel() {
        let dispatcher = Dispatcher::default();
        dispatcher.bind("a", "e1", counter().1);
        dispatcher.bind("a", "e2", counter().1);
        let keep = dispatcher.bind("b", "e1", counter().1);

        assert_eq!(dispatcher.unbind_channel("a"), 2);
        assert_eq!(dispatcher.binding_count("a", "e1"), 0);
        assert!(dispatcher.unbind(keep));
    }

    #[test]
    fn test_callback_may_bind_during_dispatch() {
        let dispatcher = Arc::new(Dispatcher::default());
        let inner = Arc::clone(&dispatcher);
        dispatcher.bind(
            "c",
            "e",
            Arc::new(move |_| {
                inner.bind("c", "late", Arc::new(|_| {}));
            }),
        );

        dispatcher.dispatch("c", "e", &Value::Null);
        assert_eq!(dispatcher.binding_count("c", "late"), 1);
    }
}
