//! Connection context: the composition root for realtime delivery.
//!
//! Owns the single [`TransportClient`] and the [`ChannelRegistry`] over it,
//! and exposes the `connected` flag plus the four subscription primitives to
//! every collaborator. No other component opens a broker connection.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::Config;
use crate::credentials::CredentialStore;
use crate::registry::{ChannelHandle, ChannelRegistry, EventNamespace, ListenerId, RegistryError};
use crate::transport::{
    ChannelAuthorizer, ConnectOutcome, EventCallback, TransportClient, TransportState,
};

/// Result of [`ConnectionContext::start`]. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The realtime feature flag is off.
    Disabled,
    /// No bearer credential is stored.
    MissingCredential,
    /// Handshake done, waiting for the broker session.
    Connecting,
    /// Already connecting or connected.
    AlreadyConnected,
    /// Broker unreachable.
    Unavailable,
    /// Torn down while the handshake was in flight.
    Cancelled,
}

impl From<ConnectOutcome> for LifecycleOutcome {
    fn from(outcome: ConnectOutcome) -> Self {
        match outcome {
            ConnectOutcome::Connecting => Self::Connecting,
            ConnectOutcome::AlreadyConnected => Self::AlreadyConnected,
            ConnectOutcome::MissingCredential => Self::MissingCredential,
            ConnectOutcome::Unavailable => Self::Unavailable,
            ConnectOutcome::Cancelled => Self::Cancelled,
        }
    }
}

/// Single composition point for the realtime connection.
#[derive(Debug)]
pub struct ConnectionContext {
    realtime_enabled: bool,
    transport: Arc<TransportClient>,
    registry: ChannelRegistry,
}

impl ConnectionContext {
    /// Builds the transport and registry from configuration. Does not
    /// connect.
    pub fn new(
        config: &Config,
        credentials: Arc<dyn CredentialStore>,
        authorizer: Arc<dyn ChannelAuthorizer>,
    ) -> Self {
        let transport = Arc::new(TransportClient::new(
            config.broker.clone(),
            credentials,
            authorizer,
        ));
        Self::with_transport(config.realtime_enabled, transport, &config.event_namespace)
    }

    /// Builds a context around an existing transport.
    pub fn with_transport(
        realtime_enabled: bool,
        transport: Arc<TransportClient>,
        event_namespace: &str,
    ) -> Self {
        let registry = ChannelRegistry::new(
            Arc::clone(&transport),
            EventNamespace::new(event_namespace),
        );
        Self {
            realtime_enabled,
            transport,
            registry,
        }
    }

    /// Connect if realtime is enabled and a credential is stored.
    ///
    /// Any other situation leaves the context disconnected; the returned
    /// outcome says why.
    pub async fn start(&self) -> LifecycleOutcome {
        if !self.realtime_enabled {
            log::info!("[Context] Realtime disabled, not connecting");
            return LifecycleOutcome::Disabled;
        }
        let outcome = LifecycleOutcome::from(self.transport.connect().await);
        log::debug!("[Context] start -> {:?}", outcome);
        outcome
    }

    /// Disconnect and forget every subscription and listener.
    pub async fn teardown(&self) {
        self.registry.clear();
        self.transport.disconnect().await;
        log::info!("[Context] Torn down");
    }

    /// `true` only while the broker session is established.
    pub fn connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Full transport state.
    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    /// Receiver observing connection state transitions.
    pub fn watch_connection(&self) -> watch::Receiver<TransportState> {
        self.transport.watch_state()
    }

    /// See [`ChannelRegistry::subscribe`].
    pub fn subscribe(&self, channel: &str) -> ChannelHandle {
        self.registry.subscribe(channel)
    }

    /// See [`ChannelRegistry::unsubscribe`].
    pub fn unsubscribe(&self, channel: &str) -> bool {
        self.registry.unsubscribe(channel)
    }

    /// See [`ChannelRegistry::listen`].
    pub fn listen(
        &self,
        channel: &str,
        event: &str,
        callback: EventCallback,
    ) -> Result<ListenerId, RegistryError> {
        self.registry.listen(channel, event, callback)
    }

    /// See [`ChannelRegistry::listen_raw`].
    pub fn listen_raw(&self, channel: &str, event: &str, callback: EventCallback) -> ListenerId {
        self.registry.listen_raw(channel, event, callback)
    }

    /// See [`ChannelRegistry::stop_listening`].
    pub fn stop_listening(&self, id: ListenerId) -> bool {
        self.registry.stop_listening(id)
    }

    /// The channel registry.
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<TransportClient> {
        &self.transport
    }
}
