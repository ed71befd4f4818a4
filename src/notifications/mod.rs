//! Notification pipeline: typed events in, user-facing records out.
//!
//! ```text
//!   listen / listen_raw callbacks
//!            │ (event name, payload)
//!            ▼
//!   events::parse ──► Normalizer ──► NotificationStore ──► RefreshBus
//!                                         │                 (fan-out)
//!                                         ├─► unread-count refresh (remote)
//!                                         └─► watch revision ──► toast driver
//! ```

mod dedup;
pub mod events;
pub mod format;
mod model;
mod normalize;
pub mod refresh;
mod store;

pub use events::{ParseError, RealtimeEvent};
pub use model::{Notification, NotificationKind};
pub use refresh::{RefreshBus, RefreshCallback, RefreshRegistration};
pub use store::{AttachOutcome, IngestOutcome, NotificationStore, SkipReason};

use async_trait::async_trait;

/// Remote source of truth for the unread count.
#[async_trait]
pub trait UnreadCountSource: Send + Sync + std::fmt::Debug {
    /// Current unread count for the signed-in user.
    async fn fetch_unread_count(&self) -> anyhow::Result<u64>;
}
