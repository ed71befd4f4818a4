//! Channel subscription registry.
//!
//! Idempotent channel management on top of [`TransportClient`]. The
//! registry is the high-level channel abstraction: it hands out one
//! [`ChannelHandle`] per channel name, qualifies event names with the
//! configured namespace, and refuses to listen on channels that were never
//! subscribed.
//!
//! # Two delivery paths
//!
//! [`ChannelRegistry::listen`] binds through the high-level abstraction;
//! [`ChannelRegistry::listen_raw`] binds the exact event name directly on
//! the transport. The two can disagree about naming (namespace-qualified vs
//! exact event names), so consumers wire both to the same handler and
//! de-duplicate downstream.
//!
//! ```text
//!   listen(".report.status.updated")      listen_raw("report.status.updated")
//!              │ namespace format                     │ exact name
//!              ▼                                      ▼
//!        Dispatcher[(private-user.7, "report.status.updated")]  (2 callbacks)
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::pusher;
use crate::transport::{BindingId, EventCallback, TransportClient};

/// Contract violations surfaced to the calling collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// `listen` on a channel that was never subscribed.
    NotSubscribed {
        /// Channel name.
        channel: String,
    },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotSubscribed { channel } => {
                write!(f, "channel {channel} is not subscribed; subscribe before listening")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Whether a channel needs an authenticated subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelVisibility {
    /// Anyone may subscribe.
    Public,
    /// Subscription is signed by the auth endpoint.
    Private,
}

impl ChannelVisibility {
    /// Visibility implied by the channel name prefix.
    #[must_use]
    pub fn of(channel: &str) -> Self {
        if pusher::is_private(channel) {
            Self::Private
        } else {
            Self::Public
        }
    }
}

#[derive(Debug)]
struct ChannelInner {
    name: String,
    visibility: ChannelVisibility,
}

/// Handle for one subscribed channel. Clones share identity.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    inner: Arc<ChannelInner>,
}

impl ChannelHandle {
    fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                name: name.to_string(),
                visibility: ChannelVisibility::of(name),
            }),
        }
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Channel visibility.
    pub fn visibility(&self) -> ChannelVisibility {
        self.inner.visibility
    }

    /// Whether both handles refer to the same subscription.
    pub fn same_subscription(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Which path a listener was registered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryPath {
    /// High-level channel abstraction (namespace-formatted names).
    Channel,
    /// Raw transport binding (exact names).
    Raw,
}

/// Identity of one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId {
    binding: BindingId,
    path: DeliveryPath,
}

impl ListenerId {
    /// Path the listener was registered through.
    pub fn path(self) -> DeliveryPath {
        self.path
    }
}

#[derive(Debug)]
struct Listener {
    channel: String,
    event: String,
}

/// Qualifies high-level event names.
///
/// A leading `.` or `\` opts out of qualification. Otherwise the name is
/// prefixed with the namespace and `.` separators become `\`, so
/// `ReportStatusUpdated` in `App.Events` binds `App\Events\ReportStatusUpdated`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventNamespace(String);

impl EventNamespace {
    /// Namespace from its dotted form, e.g. `App.Events`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self(namespace.into())
    }

    /// Wire name for a high-level event name.
    #[must_use]
    pub fn format(&self, event: &str) -> String {
        if let Some(verbatim) = event.strip_prefix('.').or_else(|| event.strip_prefix('\\')) {
            return verbatim.to_string();
        }
        let qualified = if self.0.is_empty() {
            event.to_string()
        } else {
            format!("{}.{}", self.0, event)
        };
        qualified.replace('.', "\\")
    }
}

/// Idempotent channel registry over the transport.
#[derive(Debug)]
pub struct ChannelRegistry {
    transport: Arc<TransportClient>,
    namespace: EventNamespace,
    channels: Mutex<HashMap<String, ChannelHandle>>,
    listeners: Mutex<HashMap<ListenerId, Listener>>,
}

impl ChannelRegistry {
    /// Registry over `transport`, qualifying event names with `namespace`.
    pub fn new(transport: Arc<TransportClient>, namespace: EventNamespace) -> Self {
        Self {
            transport,
            namespace,
            channels: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to `channel`, or return the existing handle.
    ///
    /// Private channels (`private-` prefix) go through the authenticated
    /// path when the transport sends the subscription.
    pub fn subscribe(&self, channel: &str) -> ChannelHandle {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = channels.get(channel) {
            log::trace!("[Registry] Already subscribed to {}", channel);
            return existing.clone();
        }

        let handle = ChannelHandle::new(channel);
        self.transport.subscribe_raw(channel);
        log::debug!(
            "[Registry] Subscribed to {} ({:?})",
            channel,
            handle.visibility()
        );
        channels.insert(channel.to_string(), handle.clone());
        handle
    }

    /// Release `channel` and every listener on it, including channels
    /// opened only through [`Self::listen_raw`]. No-op if not subscribed.
    pub fn unsubscribe(&self, channel: &str) -> bool {
        let had_handle = self
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(channel)
            .is_some();
        let had_raw = self.transport.unsubscribe_raw(channel);
        if !had_handle && !had_raw {
            return false;
        }

        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|_, listener| listener.channel != channel);
        log::debug!("[Registry] Unsubscribed from {}", channel);
        true
    }

    /// Listen for `event` through the high-level channel.
    ///
    /// Fails with [`RegistryError::NotSubscribed`] unless [`Self::subscribe`]
    /// was called for `channel` first.
    pub fn listen(
        &self,
        channel: &str,
        event: &str,
        callback: EventCallback,
    ) -> Result<ListenerId, RegistryError> {
        if !self.is_subscribed(channel) {
            return Err(RegistryError::NotSubscribed {
                channel: channel.to_string(),
            });
        }

        let wire_event = self.namespace.format(event);
        let binding = self.transport.bind_raw(channel, &wire_event, callback);
        Ok(self.record(channel, event, binding, DeliveryPath::Channel))
    }

    /// Listen for the exact `event` name on the raw transport, subscribing
    /// the channel there if needed.
    pub fn listen_raw(&self, channel: &str, event: &str, callback: EventCallback) -> ListenerId {
        self.transport.subscribe_raw(channel);
        let binding = self.transport.bind_raw(channel, event, callback);
        self.record(channel, event, binding, DeliveryPath::Raw)
    }

    fn record(
        &self,
        channel: &str,
        event: &str,
        binding: BindingId,
        path: DeliveryPath,
    ) -> ListenerId {
        let id = ListenerId { binding, path };
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id,
                Listener {
                    channel: channel.to_string(),
                    event: event.to_string(),
                },
            );
        log::trace!("[Registry] {:?} listener for {} on {}", path, event, channel);
        id
    }

    /// Remove one listener. Returns `false` if it was already gone.
    pub fn stop_listening(&self, id: ListenerId) -> bool {
        let known = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some();
        self.transport.unbind(id.binding) && known
    }

    /// Listeners registered for `event` on `channel`, across both paths.
    pub fn listener_count(&self, channel: &str, event: &str) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|l| l.channel == channel && l.event == event)
            .count()
    }

    /// Whether `channel` has a high-level subscription.
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(channel)
    }

    /// Handle for `channel`, if subscribed.
    pub fn channel(&self, channel: &str) -> Option<ChannelHandle> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(channel)
            .cloned()
    }

    /// Forget every handle and listener. The transport side is cleared by
    /// [`TransportClient::disconnect`].
    pub fn clear(&self) {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<TransportClient> {
        &self.transport
    }
}
