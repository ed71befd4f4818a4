//! Notification record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What produced a notification.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A report moved to a new status.
    ReportStatus,
    /// The user's point total changed.
    PointsUpdated,
    /// The user's wallet balance changed.
    WalletUpdated,
    /// A new report was filed nearby.
    NewNearbyReport,
}

impl NotificationKind {
    /// Parse the server's `type` string. Unknown values yield `None`.
    #[must_use]
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "report_status" => Some(Self::ReportStatus),
            "points_updated" => Some(Self::PointsUpdated),
            "wallet_updated" => Some(Self::WalletUpdated),
            "new_nearby_report" => Some(Self::NewNearbyReport),
            _ => None,
        }
    }
}

/// A user-facing notification.
///
/// `title` and `message` are fully formatted when the record is created.
/// Only `read` ever changes afterwards.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Notification {
    /// Unique within the store.
    pub id: String,
    /// Source event kind.
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Display title.
    pub title: String,
    /// Display message; may span lines.
    pub message: String,
    /// Raw event payload.
    pub data: Value,
    /// Arrival time.
    pub timestamp: DateTime<Utc>,
    /// Whether the user has seen it.
    #[serde(default)]
    pub read: bool,
}
