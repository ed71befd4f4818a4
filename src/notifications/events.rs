//! Typed inbound events.
//!
//! One pure parser per event kind. Payload shapes vary between server
//! versions, so every field is looked up through a fallback chain of names
//! (dotted names reach into nested objects). Missing fields degrade to
//! `None` or zero; only a non-object payload is rejected.

use serde_json::{Map, Value};

use crate::constants::events;

/// Why a payload could not be turned into a typed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The payload is not a JSON object.
    NotAnObject {
        /// Event name the payload arrived with.
        event: String,
    },
    /// No parser exists for this event name.
    UnknownEvent(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject { event } => write!(f, "{event} payload is not an object"),
            Self::UnknownEvent(event) => write!(f, "unknown event {event}"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Status carried by a report-status event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportStatus {
    /// Numeric status code.
    Code(i64),
    /// Non-numeric status, shown verbatim.
    Label(String),
    /// No status field.
    Missing,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code}"),
            Self::Label(label) => f.write_str(label),
            Self::Missing => f.write_str("unknown"),
        }
    }
}

/// `report.status.updated`
#[derive(Debug, Clone, PartialEq)]
pub struct ReportStatusEvent {
    /// Correlation id of the report.
    pub report_id: Option<String>,
    /// New status.
    pub status: ReportStatus,
}

/// `points.updated`
#[derive(Debug, Clone, PartialEq)]
pub struct PointsEvent {
    /// Signed change.
    pub delta: i64,
    /// New total, when the server sends it.
    pub total: Option<i64>,
    /// Why the points changed.
    pub reason: Option<String>,
    /// Correlation id of the transaction.
    pub transaction_id: Option<String>,
}

/// `wallet.updated`
#[derive(Debug, Clone, PartialEq)]
pub struct WalletEvent {
    /// Signed change.
    pub delta: f64,
    /// New balance, when the server sends it.
    pub balance: Option<f64>,
    /// Why the balance changed.
    pub reason: Option<String>,
    /// Correlation id of the transaction.
    pub transaction_id: Option<String>,
}

/// `notification.sent`
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationSentEvent {
    /// Server-side notification id.
    pub id: Option<String>,
    /// Server-supplied title.
    pub title: Option<String>,
    /// Server-supplied message.
    pub message: Option<String>,
    /// Server-supplied notification type.
    pub kind: Option<String>,
}

/// Any event the store understands.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// `report.status.updated`
    ReportStatus(ReportStatusEvent),
    /// `points.updated`
    Points(PointsEvent),
    /// `wallet.updated`
    Wallet(WalletEvent),
    /// `notification.sent`
    NotificationSent(NotificationSentEvent),
}

impl RealtimeEvent {
    /// Server-side identity of the event, when the payload carries one.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::ReportStatus(e) => e.report_id.as_deref(),
            Self::Points(e) => e.transaction_id.as_deref(),
            Self::Wallet(e) => e.transaction_id.as_deref(),
            Self::NotificationSent(e) => e.id.as_deref(),
        }
    }
}

/// Parse `payload` according to the exact `event` name.
pub fn parse(event: &str, payload: &Value) -> Result<RealtimeEvent, ParseError> {
    match event {
        events::REPORT_STATUS_UPDATED => parse_report_status(payload).map(RealtimeEvent::ReportStatus),
        events::POINTS_UPDATED => parse_points(payload).map(RealtimeEvent::Points),
        events::WALLET_UPDATED => parse_wallet(payload).map(RealtimeEvent::Wallet),
        events::NOTIFICATION_SENT => {
            parse_notification_sent(payload).map(RealtimeEvent::NotificationSent)
        }
        other => Err(ParseError::UnknownEvent(other.to_string())),
    }
}

/// `report.status.updated`: status from `status`, `new_status` or
/// `report.status`, as a code when integral.
pub fn parse_report_status(payload: &Value) -> Result<ReportStatusEvent, ParseError> {
    let obj = object(events::REPORT_STATUS_UPDATED, payload)?;
    let status = match lookup(obj, &["status", "new_status", "report.status"]) {
        Some(value) => match integer(value) {
            Some(code) => ReportStatus::Code(code),
            None => text(value).map_or(ReportStatus::Missing, ReportStatus::Label),
        },
        None => ReportStatus::Missing,
    };
    Ok(ReportStatusEvent {
        report_id: lookup_text(obj, &["report_id", "reportId", "id", "report.id"]),
        status,
    })
}

/// Parse a `points.updated` payload.
pub fn parse_points(payload: &Value) -> Result<PointsEvent, ParseError> {
    let obj = object(events::POINTS_UPDATED, payload)?;
    Ok(PointsEvent {
        delta: lookup(obj, &["points", "delta", "points_change", "amount"])
            .and_then(integer)
            .unwrap_or(0),
        total: lookup(obj, &["total_points", "total", "new_total", "balance"]).and_then(integer),
        reason: lookup_text(obj, &["reason", "description"]),
        transaction_id: lookup_text(obj, &["transaction_id", "id"]),
    })
}

/// Parse a `wallet.updated` payload.
pub fn parse_wallet(payload: &Value) -> Result<WalletEvent, ParseError> {
    let obj = object(events::WALLET_UPDATED, payload)?;
    Ok(WalletEvent {
        delta: lookup(obj, &["amount", "delta", "change"])
            .and_then(number)
            .unwrap_or(0.0),
        balance: lookup(obj, &["balance", "new_balance", "wallet_balance"]).and_then(number),
        reason: lookup_text(obj, &["reason", "description"]),
        transaction_id: lookup_text(obj, &["transaction_id", "id"]),
    })
}

/// Parse a `notification.sent` payload.
pub fn parse_notification_sent(payload: &Value) -> Result<NotificationSentEvent, ParseError> {
    let obj = object(events::NOTIFICATION_SENT, payload)?;
    Ok(NotificationSentEvent {
        id: lookup_text(obj, &["id", "notification_id", "notification.id"]),
        title: lookup_text(obj, &["title", "subject", "notification.title"]),
        message: lookup_text(
            obj,
            &["message", "body", "content", "notification.message"],
        ),
        kind: lookup_text(obj, &["type", "notification_type", "notification.type"]),
    })
}

fn object<'a>(event: &str, payload: &'a Value) -> Result<&'a Map<String, Value>, ParseError> {
    payload.as_object().ok_or_else(|| ParseError::NotAnObject {
        event: event.to_string(),
    })
}

/// First non-null value among `names`.
fn lookup<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| {
        let mut parts = name.split('.');
        let first = parts.next()?;
        let mut value = obj.get(first)?;
        for part in parts {
            value = value.as_object()?.get(part)?;
        }
        (!value.is_null()).then_some(value)
    })
}

fn lookup_text(obj: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| lookup(obj, std::slice::from_ref(name)).and_then(text))
}

/// Strings (non-empty) and numbers as text.
fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn number(value: &Value) -> Option<f64> {
    let parsed: Option<f64> = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

/// Integral numbers, including `"42"` and `42.0`.
fn integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    number(value)
        .filter(|n| n.fract() == 0.0 && n.abs() < 9.0e15)
        .map(|n| n as i64)
}
