//! Visual classification of toasts.

use crate::notifications::events::{self, ReportStatus};
use crate::notifications::{Notification, NotificationKind};

/// Severity-like tone driving color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastTone {
    /// Completed reports and wallet credits.
    Success,
    /// Rejected reports.
    Error,
    /// Everything neutral.
    Info,
    /// Points changes.
    Highlight,
}

/// Tone plus icon name for one toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToastStyle {
    /// Color family.
    pub tone: ToastTone,
    /// Icon name from the view's icon set.
    pub icon: &'static str,
}

impl ToastStyle {
    /// Style for `notification`, by kind. Report-status toasts are further
    /// split by status code: 3 is success, 4 is error, anything else info.
    #[must_use]
    pub fn for_notification(notification: &Notification) -> Self {
        match notification.kind {
            NotificationKind::ReportStatus => match report_status(notification) {
                ReportStatus::Code(3) => Self {
                    tone: ToastTone::Success,
                    icon: "check-circle",
                },
                ReportStatus::Code(4) => Self {
                    tone: ToastTone::Error,
                    icon: "x-circle",
                },
                _ => Self {
                    tone: ToastTone::Info,
                    icon: "file-text",
                },
            },
            NotificationKind::PointsUpdated => Self {
                tone: ToastTone::Highlight,
                icon: "star",
            },
            NotificationKind::WalletUpdated => Self {
                tone: ToastTone::Success,
                icon: "wallet",
            },
            NotificationKind::NewNearbyReport => Self {
                tone: ToastTone::Info,
                icon: "map-pin",
            },
        }
    }
}

/// Status as the title was composed from, so color and wording agree.
fn report_status(notification: &Notification) -> ReportStatus {
    events::parse_report_status(&notification.data).map_or(ReportStatus::Missing, |e| e.status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Value};

    fn notification(kind: NotificationKind, data: Value) -> Notification {
        Notification {
            id: "n".to_string(),
            kind,
            title: String::new(),
            message: String::new(),
            data,
            timestamp: Utc::now(),
            read: false,
        }
    }

    #[test]
    fn test_report_status_sub_classification() {
        let tone = |data| {
            ToastStyle::for_notification(&notification(NotificationKind::ReportStatus, data)).tone
        };
        assert_eq!(tone(json!({"status": 3})), ToastTone::Success);
        assert_eq!(tone(json!({"status": "4"})), ToastTone::Error);
        assert_eq!(tone(json!({"report": {"status": 4}})), ToastTone::Error);
        assert_eq!(tone(json!({"status": 1})), ToastTone::Info);
        assert_eq!(tone(json!({})), ToastTone::Info);
    }

    #[test]
    fn test_status_tone_agrees_with_title() {
        use crate::notifications::events::parse_report_status;
        use crate::notifications::format::report_status_text;

        for (payload, title, expected) in [
            (json!({"report_id": 1, "status": 3.0}), "Report Completed", ToastTone::Success),
            (
                json!({"report_id": 2, "status": null, "new_status": 4}),
                "Report Rejected",
                ToastTone::Error,
            ),
            (json!({"report_id": 3, "status": " 3 "}), "Report Completed", ToastTone::Success),
            (json!({"report_id": 4, "status": "archived"}), "Report Updated", ToastTone::Info),
        ] {
            let (composed, _) = report_status_text(&parse_report_status(&payload).unwrap());
            assert_eq!(composed, title, "{payload}");
            let style = ToastStyle::for_notification(&notification(
                NotificationKind::ReportStatus,
                payload.clone(),
            ));
            assert_eq!(style.tone, expected, "{payload}");
        }
    }

    #[test]
    fn test_by_kind() {
        assert_eq!(
            ToastStyle::for_notification(&notification(NotificationKind::PointsUpdated, json!({})))
                .icon,
            "star"
        );
        assert_eq!(
            ToastStyle::for_notification(&notification(
                NotificationKind::NewNearbyReport,
                json!({})
            ))
            .tone,
            ToastTone::Info
        );
    }
}
