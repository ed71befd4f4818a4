//! Reportcast - realtime report notifications.
//!
//! This crate receives server-pushed events over a Pusher-protocol broker,
//! turns them into user-facing notifications with an authoritative unread
//! count, and drives a single-slot on-screen toast.
//!
//! # Architecture
//!
//! - **Transport** - the one physical broker connection, raw subscribe/bind
//! - **Registry** - idempotent channel handles and listener bookkeeping
//! - **Context** - composition root owning the connection lifecycle
//! - **Notifications** - normalization, dedup, unread count, refresh bus
//! - **Toast** - timed `Hidden / Showing / Dismissing` presentation
//!
//! # Modules
//!
//! - [`transport`] - connection task and binding table
//! - [`registry`] - channel subscription registry
//! - [`context`] - [`ConnectionContext`]
//! - [`notifications`] - [`NotificationStore`] and event parsers
//! - [`toast`] - toast controller and driver
//! - [`api`] - HTTP client for channel auth and the unread count
//! - [`config`] - configuration loading/saving

pub mod api;
pub mod config;
pub mod constants;
pub mod context;
pub mod credentials;
pub mod env;
pub mod notifications;
pub mod pusher;
pub mod registry;
pub mod toast;
pub mod transport;
pub mod ws;

pub use api::ApiClient;
pub use config::Config;
pub use context::{ConnectionContext, LifecycleOutcome};
pub use notifications::{Notification, NotificationKind, NotificationStore};
pub use registry::{ChannelRegistry, RegistryError};
pub use toast::{ToastController, ToastDriver, ToastView};
pub use transport::{TransportClient, TransportState};
