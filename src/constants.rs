//! Application-wide constants for reportcast.
//!
//! Centralizes protocol names, channel/event names and timings so the
//! transport, the notification store and the toast controller agree on them.
//!
//! # Categories
//!
//! - **Timeouts**: Network and handshake timeouts
//! - **Broker**: Pusher protocol parameters
//! - **Channels & Events**: Names the server broadcasts on
//! - **Toast**: Presentation timings

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// HTTP client request timeout for API calls (auth endpoint, unread count).
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the WebSocket handshake.
///
/// A broker that accepts TCP but never completes the upgrade would otherwise
/// leave the transport stuck in `Connecting`.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Window in which an identical payload for the same event is treated as a
/// second delivery of one broadcast (high-level + raw path).
pub const DUPLICATE_DELIVERY_WINDOW: Duration = Duration::from_secs(2);

// ============================================================================
// Broker
// ============================================================================

/// Pusher wire protocol revision advertised in the socket URL.
pub const PUSHER_PROTOCOL_VERSION: u8 = 7;

/// Client name advertised in the socket URL.
pub const CLIENT_NAME: &str = "reportcast";

/// Channel name prefix that requires an authenticated subscription.
pub const PRIVATE_CHANNEL_PREFIX: &str = "private-";

/// Default namespace used to qualify high-level event names.
pub const DEFAULT_EVENT_NAMESPACE: &str = "App.Events";

// ============================================================================
// Channels & Events
// ============================================================================

/// Public channel carrying newly created reports near the user.
pub const REPORTS_CHANNEL: &str = "reports";

/// Private per-user channel name.
#[must_use]
pub fn user_channel(user_id: &str) -> String {
    format!("{PRIVATE_CHANNEL_PREFIX}user.{user_id}")
}

/// Event names broadcast by the server.
pub mod events {
    /// A report moved to another status.
    pub const REPORT_STATUS_UPDATED: &str = "report.status.updated";
    /// The user's point total changed.
    pub const POINTS_UPDATED: &str = "points.updated";
    /// The user's wallet balance changed.
    pub const WALLET_UPDATED: &str = "wallet.updated";
    /// Generic server-authored notification.
    pub const NOTIFICATION_SENT: &str = "notification.sent";
}

// ============================================================================
// Toast
// ============================================================================

/// How long a toast stays up before it dismisses itself.
pub const TOAST_DISPLAY_DURATION: Duration = Duration::from_secs(5);

/// Slide/fade-in duration.
pub const TOAST_ENTER_DURATION: Duration = Duration::from_millis(300);

/// Slide/fade-out duration.
pub const TOAST_EXIT_DURATION: Duration = Duration::from_millis(300);

/// Vertical offset (in layout units) the toast slides in from.
pub const TOAST_SLIDE_OFFSET: f32 = -100.0;

/// Redraw cadence while a toast is animating or counting down.
pub const TOAST_FRAME_INTERVAL: Duration = Duration::from_millis(50);
