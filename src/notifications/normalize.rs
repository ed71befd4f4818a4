//! Typed event -> [`Notification`].

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::config::LocaleConfig;

use super::events::RealtimeEvent;
use super::format;
use super::model::{Notification, NotificationKind};

/// Builds notification records, including ids for events that carry no
/// correlation id.
#[derive(Debug)]
pub struct Normalizer {
    locale: LocaleConfig,
    sequence: u64,
}

impl Normalizer {
    pub fn new(locale: LocaleConfig) -> Self {
        Self {
            locale,
            sequence: 0,
        }
    }

    /// Record for `event`, arriving at `now` with the raw `payload`.
    pub fn normalize(
        &mut self,
        event: &RealtimeEvent,
        payload: &Value,
        now: DateTime<Utc>,
    ) -> Notification {
        let (id, kind, title, message) = match event {
            RealtimeEvent::ReportStatus(e) => {
                let (title, message) = format::report_status_text(e);
                (
                    self.id("report", e.report_id.as_deref(), now),
                    NotificationKind::ReportStatus,
                    title,
                    message,
                )
            }
            RealtimeEvent::Points(e) => {
                let (title, message) = format::points_text(e, &self.locale);
                (
                    self.id("points", e.transaction_id.as_deref(), now),
                    NotificationKind::PointsUpdated,
                    title,
                    message,
                )
            }
            RealtimeEvent::Wallet(e) => {
                let (title, message) = format::wallet_text(e, &self.locale);
                (
                    self.id("wallet", e.transaction_id.as_deref(), now),
                    NotificationKind::WalletUpdated,
                    title,
                    message,
                )
            }
            RealtimeEvent::NotificationSent(e) => (
                self.id("notification", e.id.as_deref(), now),
                e.kind
                    .as_deref()
                    .and_then(NotificationKind::from_wire)
                    .unwrap_or(NotificationKind::NewNearbyReport),
                e.title
                    .clone()
                    .unwrap_or_else(|| "New Notification".to_string()),
                e.message.clone().unwrap_or_default(),
            ),
        };

        Notification {
            id,
            kind,
            title,
            message,
            data: payload.clone(),
            timestamp: now,
            read: false,
        }
    }

    /// `{prefix}-{correlation}`, or a time-based id unique for this
    /// normalizer.
    fn id(&mut self, prefix: &str, correlation: Option<&str>, now: DateTime<Utc>) -> String {
        match correlation {
            Some(id) => format!("{prefix}-{id}"),
            None => {
                self.sequence += 1;
                format!("{prefix}-{}-{}", now.timestamp_millis(), self.sequence)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifications::events;
    use serde_json::json;

    fn normalize(event: &str, payload: Value) -> Notification {
        let parsed = events::parse(event, &payload).unwrap();
        Normalizer::new(LocaleConfig::default()).normalize(&parsed, &payload, Utc::now())
    }

    #[test]
    fn test_report_status_id_and_text() {
        let n = normalize("report.status.updated", json!({"report_id": 42, "status": 3}));
        assert_eq!(n.id, "report-42");
        assert_eq!(n.kind, NotificationKind::ReportStatus);
        assert_eq!(n.title, "Report Completed");
        assert!(!n.read);
        assert_eq!(n.data["status"], 3);
    }

    #[test]
    fn test_fallback_ids_are_distinct() {
        let mut normalizer = Normalizer::new(LocaleConfig::default());
        let payload = json!({"points": 5});
        let event = events::parse("points.updated", &payload).unwrap();
        let now = Utc::now();

        let a = normalizer.normalize(&event, &payload, now);
        let b = normalizer.normalize(&event, &payload, now);
        assert!(a.id.starts_with("points-"));
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_notification_sent_kind_and_defaults() {
        let typed = normalize(
            "notification.sent",
            json!({"id": 3, "title": "Wallet", "message": "m", "type": "wallet_updated"}),
        );
        assert_eq!(typed.id, "notification-3");
        assert_eq!(typed.kind, NotificationKind::WalletUpdated);

        let bare = normalize("notification.sent", json!({}));
        assert_eq!(bare.kind, NotificationKind::NewNearbyReport);
        assert_eq!(bare.title, "New Notification");
        assert_eq!(bare.message, "");
    }

    #[test]
    fn test_wallet_id_uses_transaction() {
        let n = normalize(
            "wallet.updated",
            json!({"transaction_id": "tx9", "amount": 10, "balance": 110}),
        );
        assert_eq!(n.id, "wallet-tx9");
        assert_eq!(n.message, "+10 credits\nNew balance: 110 credits");
    }
}
