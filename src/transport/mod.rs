//! Transport client: the one physical broker connection.
//!
//! [`TransportClient`] owns a single WebSocket connection to a
//! Pusher-protocol broker and the raw low-level primitives on top of it:
//! subscribe/unsubscribe by exact channel name and bind callbacks by exact
//! event name.
//!
//! # Architecture
//!
//! ```text
//!   TransportClient                        connection task
//!         │  connect()  ── handshake ──►   (owns the socket halves)
//!         │                                     │
//!         │  subscribe_raw(ch) ─ Command ──►    │ pusher:subscribe (+auth)
//!         │  unsubscribe_raw(ch) ─ Command ─►   │ pusher:unsubscribe
//!         │                                     │
//!         │  watch<TransportState>  ◄────────   │ connected / failed / ...
//!         │  Dispatcher             ◄────────   │ channel events
//! ```
//!
//! # Failure semantics
//!
//! Connection problems never surface as errors: a missing credential, an
//! unreachable broker or a rejected handshake are logged and leave the
//! transport in a non-connected [`TransportState`]. There is no reconnect
//! loop; callers reconnect by invoking [`TransportClient::connect`] again.

mod bindings;
mod connection;

pub use bindings::{BindingId, Dispatcher, EventCallback};

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::constants::HANDSHAKE_TIMEOUT;
use crate::credentials::{self, CredentialStore};
use crate::{pusher, ws};

/// Broker connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Never connected.
    Initialized,
    /// Handshake in progress or waiting for `connection_established`.
    Connecting,
    /// Broker assigned a socket id; subscriptions are live.
    Connected,
    /// Closed by either side.
    Disconnected,
    /// Broker unreachable or the connection errored.
    Unavailable,
    /// Broker refused the connection permanently (Pusher 4000-4099).
    Failed,
}

impl TransportState {
    /// Whether events can be received.
    #[must_use]
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }

    /// Lower-case name, matching the broker client state names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Unavailable => "unavailable",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`TransportClient::connect`]. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Handshake done; waiting for the broker to establish the session.
    Connecting,
    /// A connection is already connecting or connected.
    AlreadyConnected,
    /// No bearer credential is stored.
    MissingCredential,
    /// The broker could not be reached.
    Unavailable,
    /// `disconnect()` was called while the handshake was in flight.
    Cancelled,
}

/// Signs private-channel subscriptions.
#[async_trait]
pub trait ChannelAuthorizer: Send + Sync + std::fmt::Debug {
    /// Returns the `auth` string for subscribing `socket_id` to `channel`.
    async fn authorize(&self, socket_id: &str, channel: &str) -> anyhow::Result<String>;
}

/// Request from the client handle to the connection task.
#[derive(Debug)]
enum Command {
    Subscribe(String),
    Unsubscribe(String),
}

/// State shared between the client handle and the connection task.
#[derive(Debug)]
struct Shared {
    dispatcher: Dispatcher,
    state: watch::Sender<TransportState>,
    socket_id: Mutex<Option<String>>,
    /// Raw subscriptions in subscribe order; survive a dropped connection
    /// so an external reconnect resubscribes them.
    channels: Mutex<Vec<String>>,
    authorizer: Arc<dyn ChannelAuthorizer>,
}

impl Shared {
    fn set_state(&self, next: TransportState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            log::debug!("[Transport] State -> {}", next);
        }
    }

    fn set_socket_id(&self, socket_id: Option<String>) {
        *self.socket_id.lock().unwrap_or_else(|e| e.into_inner()) = socket_id;
    }

    fn channels(&self) -> Vec<String> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[derive(Debug)]
struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// The single physical broker connection.
#[derive(Debug)]
pub struct TransportClient {
    broker: BrokerConfig,
    credentials: Arc<dyn CredentialStore>,
    shared: Arc<Shared>,
    connection: Mutex<Option<ConnectionHandle>>,
}

impl TransportClient {
    /// Creates a disconnected client. Nothing is read until [`Self::connect`].
    pub fn new(
        broker: BrokerConfig,
        credentials: Arc<dyn CredentialStore>,
        authorizer: Arc<dyn ChannelAuthorizer>,
    ) -> Self {
        let (state, _) = watch::channel(TransportState::Initialized);
        Self {
            broker,
            credentials,
            shared: Arc::new(Shared {
                dispatcher: Dispatcher::default(),
                state,
                socket_id: Mutex::new(None),
                channels: Mutex::new(Vec::new()),
                authorizer,
            }),
            connection: Mutex::new(None),
        }
    }

    /// Open the connection.
    ///
    /// Idempotent while connecting or connected. The bearer credential is
    /// read now; without one the client stays disconnected.
    pub async fn connect(&self) -> ConnectOutcome {
        if matches!(
            self.state(),
            TransportState::Connecting | TransportState::Connected
        ) {
            return ConnectOutcome::AlreadyConnected;
        }

        let Some(token) = credentials::read_token(&self.credentials).await else {
            log::info!("[Transport] No credential stored, staying disconnected");
            return ConnectOutcome::MissingCredential;
        };

        let claimed = self.shared.state.send_if_modified(|state| {
            if matches!(
                *state,
                TransportState::Connecting | TransportState::Connected
            ) {
                false
            } else {
                *state = TransportState::Connecting;
                true
            }
        });
        if !claimed {
            return ConnectOutcome::AlreadyConnected;
        }

        // A previous connection that ended on its own leaves its handle here.
        let stale = self
            .connection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(stale) = stale {
            stale.cancel.cancel();
            let _ = stale.task.await;
        }

        let url = pusher::socket_url(&self.broker);
        log::info!("[Transport] Connecting to {}", url);

        let (writer, reader) = match ws::open(&url, &token, HANDSHAKE_TIMEOUT).await {
            Ok(pair) => pair,
            Err(e) => {
                log::warn!("[Transport] Connection failed: {:#}", e);
                self.shared.set_state(TransportState::Unavailable);
                return ConnectOutcome::Unavailable;
            }
        };

        let mut slot = self.connection.lock().unwrap_or_else(|e| e.into_inner());
        if self.state() != TransportState::Connecting {
            log::debug!("[Transport] Disconnected during handshake, dropping socket");
            return ConnectOutcome::Cancelled;
        }

        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(connection::run(
            Arc::clone(&self.shared),
            writer,
            reader,
            command_rx,
            cancel.clone(),
        ));
        *slot = Some(ConnectionHandle {
            commands,
            cancel,
            task,
        });

        ConnectOutcome::Connecting
    }

    /// Close the connection and forget every raw subscription and binding.
    ///
    /// Safe to call when not connected.
    pub async fn disconnect(&self) {
        let handle = {
            let mut slot = self.connection.lock().unwrap_or_else(|e| e.into_inner());
            let handle = slot.take();
            self.shared.set_state(TransportState::Disconnected);
            handle
        };

        self.shared
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.shared.dispatcher.clear();
        self.shared.set_socket_id(None);

        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.task.await {
                log::warn!("[Transport] Connection task ended abnormally: {}", e);
            }
            log::info!("[Transport] Disconnected");
        }
    }

    /// Subscribe to `channel` on the raw connection.
    ///
    /// Returns `false` if already subscribed (no second network
    /// subscription is issued). Subscriptions made before the broker
    /// establishes the session are sent once it does.
    pub fn subscribe_raw(&self, channel: &str) -> bool {
        let added = {
            let mut channels = self
                .shared
                .channels
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if channels.iter().any(|c| c == channel) {
                false
            } else {
                channels.push(channel.to_string());
                true
            }
        };

        if added {
            log::debug!("[Transport] Subscribing to {}", channel);
            self.send_command(Command::Subscribe(channel.to_string()));
        }
        added
    }

    /// Unsubscribe from `channel` and drop its bindings. No-op if not
    /// subscribed.
    pub fn unsubscribe_raw(&self, channel: &str) -> bool {
        let removed = {
            let mut channels = self
                .shared
                .channels
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let before = channels.len();
            channels.retain(|c| c != channel);
            channels.len() != before
        };

        if removed {
            let dropped = self.shared.dispatcher.unbind_channel(channel);
            log::debug!(
                "[Transport] Unsubscribing from {} ({} bindings dropped)",
                channel,
                dropped
            );
            self.send_command(Command::Unsubscribe(channel.to_string()));
        }
        removed
    }

    /// Bind `callback` to the exact `event` name on `channel`.
    pub fn bind_raw(&self, channel: &str, event: &str, callback: EventCallback) -> BindingId {
        self.shared.dispatcher.bind(channel, event, callback)
    }

    /// Remove one binding.
    pub fn unbind(&self, id: BindingId) -> bool {
        self.shared.dispatcher.unbind(id)
    }

    /// Current connection state.
    pub fn state(&self) -> TransportState {
        *self.shared.state.borrow()
    }

    /// `true` only while the broker session is established.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Receiver observing every state transition.
    pub fn watch_state(&self) -> watch::Receiver<TransportState> {
        self.shared.state.subscribe()
    }

    /// Socket id assigned by the broker for the current session.
    pub fn socket_id(&self) -> Option<String> {
        self.shared
            .socket_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Whether `channel` is subscribed on the raw connection.
    pub fn is_subscribed(&self, channel: &str) -> bool {
        self.shared.channels().iter().any(|c| c == channel)
    }

    /// Raw subscriptions in subscribe order.
    pub fn subscribed_channels(&self) -> Vec<String> {
        self.shared.channels()
    }

    /// The binding table events are dispatched through.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    fn send_command(&self, command: Command) {
        let slot = self.connection.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = slot.as_ref() {
            // A closed receiver means the task already ended; the channel
            // list still holds the subscription for the next connect.
            let _ = handle.commands.send(command);
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Authorizer that signs every channel with a fixed string.
    #[derive(Debug)]
    pub struct StaticAuthorizer;

    #[async_trait]
    impl ChannelAuthorizer for StaticAuthorizer {
        async fn authorize(&self, socket_id: &str, channel: &str) -> anyhow::Result<String> {
            Ok(format!("key:{socket_id}:{channel}"))
        }
    }

    /// Transport with no stored credential and an unreachable broker.
    pub fn offline_transport() -> TransportClient {
        TransportClient::new(
            BrokerConfig {
                port: 1,
                ..BrokerConfig::default()
            },
            Arc::new(crate::credentials::MemoryCredentialStore::default()),
            Arc::new(StaticAuthorizer),
        )
    }
}
