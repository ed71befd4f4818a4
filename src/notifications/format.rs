//! Display text for notifications.
//!
//! Text is composed once, when an event is stored, using the configured
//! [`LocaleConfig`].

use crate::config::LocaleConfig;

use super::events::{PointsEvent, ReportStatus, ReportStatusEvent, WalletEvent};

/// Title and message for a report status.
///
/// Codes 0 through 4 have fixed wording; anything else falls back to a
/// generic "updated" text carrying the raw status.
#[must_use]
pub fn report_status_text(event: &ReportStatusEvent) -> (String, String) {
    let (title, message) = match event.status {
        ReportStatus::Code(0) => (
            "Report Received",
            "Your report has been received and is awaiting review.",
        ),
        ReportStatus::Code(1) => (
            "Report Being Verified",
            "Your report is being verified by our team.",
        ),
        ReportStatus::Code(2) => (
            "Report In Progress",
            "Work on the issue you reported is in progress.",
        ),
        ReportStatus::Code(3) => (
            "Report Completed",
            "The issue you reported has been resolved. Thank you!",
        ),
        ReportStatus::Code(4) => (
            "Report Rejected",
            "Your report was rejected after review.",
        ),
        ref other => {
            return (
                "Report Updated".to_string(),
                format!("Your report status was updated: {other}"),
            )
        }
    };
    (title.to_string(), message.to_string())
}

/// Title and message for a points change. Title wording follows the sign.
#[must_use]
pub fn points_text(event: &PointsEvent, locale: &LocaleConfig) -> (String, String) {
    let title = if event.delta < 0 {
        "Points Deducted"
    } else {
        "Points Earned"
    };

    let mut message = format!(
        "{}{} points",
        sign(event.delta < 0),
        group_thousands(event.delta.unsigned_abs(), locale.thousands_separator)
    );
    if let Some(reason) = &event.reason {
        message.push_str(&format!(" ({reason})"));
    }
    if let Some(total) = event.total {
        let grouped = group_thousands(total.unsigned_abs(), locale.thousands_separator);
        let negative = if total < 0 { "-" } else { "" };
        message.push_str(&format!(". New total: {negative}{grouped} points"));
    }
    (title.to_string(), message)
}

/// Title and two-line message for a wallet change.
///
/// ```text
/// +2,500 credits: Report reward
/// New balance: 12,000.50 credits
/// ```
#[must_use]
pub fn wallet_text(event: &WalletEvent, locale: &LocaleConfig) -> (String, String) {
    let title = if event.delta < 0.0 {
        "Wallet Debited"
    } else {
        "Wallet Credited"
    };

    let mut delta_line = format!(
        "{}{}",
        sign(event.delta < 0.0),
        money(event.delta.abs(), locale)
    );
    if let Some(reason) = &event.reason {
        delta_line.push_str(&format!(": {reason}"));
    }

    let balance_line = match event.balance {
        Some(balance) if balance < 0.0 => format!("New balance: -{}", money(balance.abs(), locale)),
        Some(balance) => format!("New balance: {}", money(balance, locale)),
        None => "New balance: unavailable".to_string(),
    };

    (title.to_string(), format!("{delta_line}\n{balance_line}"))
}

fn sign(negative: bool) -> &'static str {
    if negative {
        "-"
    } else {
        "+"
    }
}

/// Non-negative `amount` with grouping, two decimals when fractional, and
/// the currency suffix.
fn money(amount: f64, locale: &LocaleConfig) -> String {
    let cents = (amount * 100.0).round();
    #[allow(clippy::cast_sign_loss, reason = "clamped to non-negative above")]
    let cents = cents.max(0.0) as u64;
    let whole = group_thousands(cents / 100, locale.thousands_separator);
    let fraction = cents % 100;
    let decimal = if locale.thousands_separator == ',' {
        '.'
    } else {
        ','
    };

    let number = if fraction == 0 {
        whole
    } else {
        format!("{whole}{decimal}{fraction:02}")
    };
    if locale.currency_suffix.is_empty() {
        number
    } else {
        format!("{number} {}", locale.currency_suffix)
    }
}

/// `1234567` -> `1,234,567` with `separator`.
#[must_use]
pub fn group_thousands(value: u64, separator: char) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: ReportStatus) -> ReportStatusEvent {
        ReportStatusEvent {
            report_id: Some("1".to_string()),
            status: code,
        }
    }

    #[test]
    fn test_status_mapping_is_total() {
        let expected = [
            (0, "Report Received", "received"),
            (1, "Report Being Verified", "verified"),
            (2, "Report In Progress", "in progress"),
            (3, "Report Completed", "resolved"),
            (4, "Report Rejected", "rejected"),
        ];
        for (code, title, fragment) in expected {
            let (t, m) = report_status_text(&status(ReportStatus::Code(code)));
            assert_eq!(t, title);
            assert!(m.contains(fragment), "{code}: {m}");
        }

        let (t, m) = report_status_text(&status(ReportStatus::Code(9)));
        assert_eq!(t, "Report Updated");
        assert_eq!(m, "Your report status was updated: 9");

        let (_, m) = report_status_text(&status(ReportStatus::Label("archived".into())));
        assert_eq!(m, "Your report status was updated: archived");
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0, ','), "0");
        assert_eq!(group_thousands(999, ','), "999");
        assert_eq!(group_thousands(1000, ','), "1,000");
        assert_eq!(group_thousands(1_234_567, '.'), "1.234.567");
    }

    #[test]
    fn test_points_text_by_sign() {
        let locale = LocaleConfig::default();
        let earned = PointsEvent {
            delta: 1500,
            total: Some(12_000),
            reason: Some("Report verified".to_string()),
            transaction_id: None,
        };
        assert_eq!(
            points_text(&earned, &locale),
            (
                "Points Earned".to_string(),
                "+1,500 points (Report verified). New total: 12,000 points".to_string()
            )
        );

        let deducted = PointsEvent {
            delta: -20,
            total: None,
            reason: None,
            transaction_id: None,
        };
        assert_eq!(
            points_text(&deducted, &locale),
            ("Points Deducted".to_string(), "-20 points".to_string())
        );
    }

    #[test]
    fn test_wallet_text_two_lines() {
        let locale = LocaleConfig::default();
        let credit = WalletEvent {
            delta: 2500.0,
            balance: Some(12_000.5),
            reason: Some("Report reward".to_string()),
            transaction_id: None,
        };
        let (title, message) = wallet_text(&credit, &locale);
        assert_eq!(title, "Wallet Credited");
        assert_eq!(
            message,
            "+2,500 credits: Report reward\nNew balance: 12,000.50 credits"
        );

        let debit = WalletEvent {
            delta: -75.25,
            balance: None,
            reason: None,
            transaction_id: None,
        };
        let (title, message) = wallet_text(&debit, &locale);
        assert_eq!(title, "Wallet Debited");
        assert_eq!(message, "-75.25 credits\nNew balance: unavailable");
    }

    #[test]
    fn test_wallet_text_locale() {
        let locale = LocaleConfig {
            thousands_separator: '.',
            currency_suffix: "pts".to_string(),
        };
        let event = WalletEvent {
            delta: 1000.5,
            balance: Some(2_000_000.0),
            reason: None,
            transaction_id: None,
        };
        assert_eq!(
            wallet_text(&event, &locale).1,
            "+1.000,50 pts\nNew balance: 2.000.000 pts"
        );
    }
}
