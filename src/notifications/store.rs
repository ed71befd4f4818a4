//! Notification store.
//!
//! Holds the session's notifications newest-first and the unread count.
//! The count is always taken from the remote [`UnreadCountSource`]; local
//! records only cover this session, while the server also sees reads made
//! elsewhere.
//!
//! # Refresh ordering
//!
//! Every mutation requests a refresh. Each request gets a generation number
//! and a response is applied only if no newer response was applied first,
//! so a slow early response never overwrites a fresher count.
//! [`NotificationStore::clear_all`] discards everything in flight.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::LocaleConfig;
use crate::constants::{self, events, DUPLICATE_DELIVERY_WINDOW};
use crate::context::ConnectionContext;
use crate::registry::{ListenerId, RegistryError};
use crate::transport::EventCallback;

use super::dedup::DeliveryDeduplicator;
use super::events as parser;
use super::model::Notification;
use super::normalize::Normalizer;
use super::refresh::{RefreshBus, RefreshCallback, RefreshRegistration};
use super::UnreadCountSource;

/// Events delivered on the per-user private channel.
const USER_EVENTS: [&str; 4] = [
    events::REPORT_STATUS_UPDATED,
    events::POINTS_UPDATED,
    events::WALLET_UPDATED,
    events::NOTIFICATION_SENT,
];

/// Events delivered on the public reports channel.
const REPORTS_EVENTS: [&str; 1] = [events::NOTIFICATION_SENT];

/// Why [`NotificationStore::attach`] did not subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The broker session is not established.
    NotConnected,
    /// No signed-in user.
    NoUser,
}

/// Result of [`NotificationStore::attach`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachOutcome {
    /// Listening on these channels.
    Attached { channels: Vec<String> },
    /// Already listening; nothing changed.
    AlreadyAttached,
    /// A precondition is missing; nothing was subscribed.
    Skipped(SkipReason),
}

/// Result of [`NotificationStore::ingest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Stored under this id.
    Stored(String),
    /// Same logical event already stored.
    Duplicate,
    /// Payload could not be parsed.
    Rejected(parser::ParseError),
}

#[derive(Debug)]
struct State {
    notifications: VecDeque<Notification>,
    ids: HashSet<String>,
    unread_count: u64,
    normalizer: Normalizer,
    dedup: DeliveryDeduplicator,
    /// Generation of the newest refresh request.
    requested: u64,
    /// Generation of the newest applied refresh response.
    applied: u64,
    listeners: Vec<ListenerId>,
}

#[derive(Debug)]
struct Shared {
    source: Arc<dyn UnreadCountSource>,
    state: Mutex<State>,
    refresh_bus: RefreshBus,
    revision: watch::Sender<u64>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bump_revision(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

/// Session-scoped notification store. Clones share the same store.
#[derive(Debug, Clone)]
pub struct NotificationStore {
    shared: Arc<Shared>,
}

impl NotificationStore {
    /// Empty store reading the unread count from `source`.
    pub fn new(source: Arc<dyn UnreadCountSource>, locale: LocaleConfig) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            shared: Arc::new(Shared {
                source,
                state: Mutex::new(State {
                    notifications: VecDeque::new(),
                    ids: HashSet::new(),
                    unread_count: 0,
                    normalizer: Normalizer::new(locale),
                    dedup: DeliveryDeduplicator::new(DUPLICATE_DELIVERY_WINDOW),
                    requested: 0,
                    applied: 0,
                    listeners: Vec::new(),
                }),
                refresh_bus: RefreshBus::default(),
                revision,
                in_flight: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Start receiving events for `user_id`.
    ///
    /// A present user id triggers the initial unread-count fetch. Channels
    /// are subscribed only when the context is connected and a user id is
    /// present; every event is wired through both the high-level and the
    /// raw path to the same handler.
    pub fn attach(
        &self,
        ctx: &ConnectionContext,
        user_id: Option<&str>,
    ) -> Result<AttachOutcome, RegistryError> {
        if user_id.is_some() {
            self.request_unread_refresh();
        }
        let Some(user_id) = user_id else {
            log::info!("[Notifications] No user, skipping realtime listeners");
            return Ok(AttachOutcome::Skipped(SkipReason::NoUser));
        };
        if !ctx.connected() {
            log::info!("[Notifications] Not connected, skipping realtime listeners");
            return Ok(AttachOutcome::Skipped(SkipReason::NotConnected));
        }
        if !self.shared.lock().listeners.is_empty() {
            return Ok(AttachOutcome::AlreadyAttached);
        }

        let user_channel = constants::user_channel(user_id);
        let plan: [(&str, &[&'static str]); 2] = [
            (&user_channel, &USER_EVENTS),
            (constants::REPORTS_CHANNEL, &REPORTS_EVENTS),
        ];

        let mut listeners = Vec::new();
        let mut channels = Vec::new();
        for (channel, channel_events) in plan {
            ctx.subscribe(channel);
            channels.push(channel.to_string());
            for &event in channel_events {
                let handler = self.handler(event);
                match ctx.listen(channel, &format!(".{event}"), Arc::clone(&handler)) {
                    Ok(id) => listeners.push(id),
                    Err(e) => {
                        for id in listeners {
                            ctx.stop_listening(id);
                        }
                        return Err(e);
                    }
                }
                listeners.push(ctx.listen_raw(channel, event, handler));
            }
        }

        log::info!(
            "[Notifications] Listening on {} ({} listeners)",
            channels.join(", "),
            listeners.len()
        );
        self.shared.lock().listeners = listeners;
        Ok(AttachOutcome::Attached { channels })
    }

    /// Keep the store attached while the context connects and reconnects.
    ///
    /// Attaches once up front, then again each time the connection becomes
    /// established; [`Self::attach`] is idempotent, so a session that comes
    /// up late (slow broker, a later `start()`) still gets its listeners.
    /// Runs until the context's state channel closes; drop the future to
    /// stop following.
    pub async fn follow_connection(
        &self,
        ctx: &ConnectionContext,
        user_id: Option<&str>,
    ) -> Result<(), RegistryError> {
        let mut states = ctx.watch_connection();
        states.borrow_and_update();
        self.attach(ctx, user_id)?;

        while states.changed().await.is_ok() {
            let connected = states.borrow_and_update().is_connected();
            if connected {
                log::debug!("[Notifications] Connection established, attaching");
                self.attach(ctx, user_id)?;
            }
        }
        Ok(())
    }

    /// Remove every listener added by [`Self::attach`]. Channel
    /// subscriptions are left to the context.
    pub fn detach(&self, ctx: &ConnectionContext) {
        let listeners = std::mem::take(&mut self.shared.lock().listeners);
        let count = listeners.len();
        for id in listeners {
            ctx.stop_listening(id);
        }
        if count > 0 {
            log::debug!("[Notifications] Detached {} listeners", count);
        }
    }

    fn handler(&self, event: &'static str) -> EventCallback {
        let store: Weak<Shared> = Arc::downgrade(&self.shared);
        Arc::new(move |payload: &Value| {
            if let Some(shared) = store.upgrade() {
                NotificationStore { shared }.ingest(event, payload);
            }
        })
    }

    /// Normalize and store one inbound event.
    ///
    /// A stored record is prepended, requests one unread-count refresh and
    /// runs the refresh bus. Duplicates and unparseable payloads do
    /// neither.
    pub fn ingest(&self, event: &str, payload: &Value) -> IngestOutcome {
        let parsed = match parser::parse(event, payload) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("[Notifications] Dropping {}: {}", event, e);
                return IngestOutcome::Rejected(e);
            }
        };

        let id = {
            let mut state = self.shared.lock();
            if parsed.correlation_id().is_none()
                && state.dedup.is_repeat(event, payload, Instant::now())
            {
                log::trace!("[Notifications] Repeat delivery of {}", event);
                return IngestOutcome::Duplicate;
            }

            let notification = state.normalizer.normalize(&parsed, payload, Utc::now());
            if state.ids.contains(&notification.id) {
                log::trace!("[Notifications] Duplicate {}", notification.id);
                return IngestOutcome::Duplicate;
            }

            let id = notification.id.clone();
            state.ids.insert(id.clone());
            state.notifications.push_front(notification);
            id
        };

        log::debug!("[Notifications] Stored {} from {}", id, event);
        self.shared.bump_revision();
        self.request_unread_refresh();
        self.shared.refresh_bus.notify();
        IngestOutcome::Stored(id)
    }

    /// Mark one record read and refresh the count. Returns `false` if no
    /// record has this id; the refresh is requested either way.
    pub fn mark_as_read(&self, id: &str) -> bool {
        let changed = {
            let mut state = self.shared.lock();
            match state.notifications.iter_mut().find(|n| n.id == id) {
                Some(n) if !n.read => {
                    n.read = true;
                    Some(true)
                }
                Some(_) => Some(false),
                None => None,
            }
        };

        if changed == Some(true) {
            self.shared.bump_revision();
        }
        self.request_unread_refresh();
        changed.is_some()
    }

    /// Mark every record read and refresh the count.
    pub fn mark_all_as_read(&self) {
        let changed = {
            let mut state = self.shared.lock();
            let mut changed = false;
            for n in state.notifications.iter_mut().filter(|n| !n.read) {
                n.read = true;
                changed = true;
            }
            changed
        };

        if changed {
            self.shared.bump_revision();
        }
        self.request_unread_refresh();
    }

    /// Empty the store and zero the count. No network call; refreshes in
    /// flight are discarded.
    pub fn clear_all(&self) {
        {
            let mut state = self.shared.lock();
            state.notifications.clear();
            state.ids.clear();
            state.dedup.clear();
            state.unread_count = 0;
            state.applied = state.requested;
        }
        log::debug!("[Notifications] Cleared");
        self.shared.bump_revision();
    }

    /// Fetch the unread count now and return the count afterwards.
    ///
    /// On failure the previous count is kept.
    pub async fn fetch_unread_count(&self) -> u64 {
        let generation = self.next_generation();
        refresh(Arc::clone(&self.shared), generation).await;
        self.unread_count()
    }

    /// Fetch the unread count in the background.
    ///
    /// Outside a tokio runtime the request is logged and dropped.
    pub fn request_unread_refresh(&self) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            log::warn!("[Notifications] No runtime, skipping unread-count refresh");
            return;
        };

        let generation = self.next_generation();
        let task = runtime.spawn(refresh(Arc::clone(&self.shared), generation));

        let mut in_flight = self
            .shared
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        in_flight.retain(|task| !task.is_finished());
        in_flight.push(task);
    }

    fn next_generation(&self) -> u64 {
        let mut state = self.shared.lock();
        state.requested += 1;
        state.requested
    }

    /// Wait for every background refresh requested so far.
    pub async fn settle(&self) {
        loop {
            let tasks = std::mem::take(
                &mut *self
                    .shared
                    .in_flight
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()),
            );
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    log::warn!("[Notifications] Refresh task failed: {}", e);
                }
            }
        }
    }

    /// Records, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.shared.lock().notifications.iter().cloned().collect()
    }

    /// One record by id.
    pub fn get(&self, id: &str) -> Option<Notification> {
        self.shared
            .lock()
            .notifications
            .iter()
            .find(|n| n.id == id)
            .cloned()
    }

    /// The most recent record, if it is unread.
    ///
    /// Older unread records never surface here; once the newest one is
    /// read this is `None` until another arrives.
    pub fn latest_unread(&self) -> Option<Notification> {
        self.shared
            .lock()
            .notifications
            .front()
            .filter(|n| !n.read)
            .cloned()
    }

    /// Last count reported by the remote source (zero after `clear_all`).
    pub fn unread_count(&self) -> u64 {
        self.shared.lock().unread_count
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.shared.lock().notifications.len()
    }

    /// `true` when no notifications are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receiver that changes whenever records or the count change.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.shared.revision.subscribe()
    }

    /// Run `callback` whenever a new record is stored.
    pub fn register_refresh_callback(&self, callback: RefreshCallback) -> RefreshRegistration {
        self.shared.refresh_bus.register(callback)
    }

    /// The refresh bus new records are announced on.
    pub fn refresh_bus(&self) -> &RefreshBus {
        &self.shared.refresh_bus
    }
}

/// Fetch and apply generation `generation` of the unread count.
async fn refresh(shared: Arc<Shared>, generation: u64) {
    let result = shared.source.fetch_unread_count().await;

    let applied = {
        let mut state = shared.lock();
        match result {
            Ok(count) if generation > state.applied => {
                state.applied = generation;
                let changed = state.unread_count != count;
                state.unread_count = count;
                changed
            }
            Ok(_) => {
                log::debug!(
                    "[Notifications] Discarding stale unread count (generation {})",
                    generation
                );
                false
            }
            Err(e) => {
                log::warn!("[Notifications] Unread-count refresh failed: {:#}", e);
                false
            }
        }
    };

    if applied {
        shared.bump_revision();
    }
}
