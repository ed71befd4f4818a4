//! Pusher wire protocol (revision 7) encoding and decoding.
//!
//! Every frame is a JSON text message of the shape
//! `{"event": ..., "channel": ..., "data": ...}`. Protocol events are
//! prefixed with `pusher:` / `pusher_internal:`; everything else is an
//! application event on a channel.
//!
//! `data` is usually a JSON document encoded as a string, but some brokers
//! inline the object. [`decode`] accepts both and always yields a
//! [`serde_json::Value`].
//!
//! ## Connection lifecycle
//!
//! 1. Client opens `{ws|wss}://host:port/app/{key}?protocol=7&...`.
//! 2. Broker sends `pusher:connection_established` carrying the `socket_id`.
//! 3. Client sends `pusher:subscribe` per channel; private channels carry an
//!    `auth` signature obtained from the application's auth endpoint.
//! 4. Broker confirms with `pusher_internal:subscription_succeeded`.
//! 5. Broker pings with `pusher:ping`; client answers `pusher:pong`.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::BrokerConfig;
use crate::constants::{CLIENT_NAME, PRIVATE_CHANNEL_PREFIX, PUSHER_PROTOCOL_VERSION};

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Handshake complete; the broker assigned a socket id.
    ConnectionEstablished {
        /// Id used to sign private-channel subscriptions.
        socket_id: String,
        /// Seconds of silence after which the broker expects a ping.
        activity_timeout: Option<u64>,
    },
    /// The broker accepted a subscription.
    SubscriptionSucceeded {
        /// Channel name.
        channel: String,
    },
    /// The broker refused a subscription.
    SubscriptionError {
        /// Channel name.
        channel: String,
        /// HTTP-like status reported by the broker, if any.
        status: Option<u16>,
    },
    /// Application-level ping.
    Ping,
    /// Application-level pong.
    Pong,
    /// Connection-level error.
    Error {
        /// Pusher error code (4000-4299), if provided.
        code: Option<u16>,
        /// Human-readable reason.
        message: String,
    },
    /// Application event on a channel.
    ChannelEvent {
        /// Channel name.
        channel: String,
        /// Event name, exactly as broadcast.
        event: String,
        /// Decoded payload.
        data: Value,
    },
    /// Protocol frame this client does not act on (presence, cache misses).
    Ignored {
        /// Event name.
        event: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

/// How the connection should react to a `pusher:error` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// 4000-4099: do not reconnect with the same parameters.
    Fatal,
    /// 4100-4299 or no code: the broker may accept a later connect.
    Transient,
}

impl ErrorClass {
    /// Classify a Pusher error code.
    #[must_use]
    pub fn of(code: Option<u16>) -> Self {
        match code {
            Some(4000..=4099) => Self::Fatal,
            _ => Self::Transient,
        }
    }
}

/// Unwrap string-encoded `data` into a JSON value.
///
/// A string that is not valid JSON is kept as a JSON string.
fn payload(data: Option<Value>) -> Value {
    match data {
        Some(Value::String(s)) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        Some(other) => other,
        None => Value::Null,
    }
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<Inbound> {
    let frame: RawFrame = serde_json::from_str(text).context("malformed broker frame")?;
    let data = payload(frame.data);

    let inbound = match frame.event.as_str() {
        "pusher:connection_established" => Inbound::ConnectionEstablished {
            socket_id: data
                .get("socket_id")
                .and_then(Value::as_str)
                .context("connection_established without socket_id")?
                .to_string(),
            activity_timeout: data.get("activity_timeout").and_then(Value::as_u64),
        },
        "pusher_internal:subscription_succeeded" => Inbound::SubscriptionSucceeded {
            channel: frame.channel.unwrap_or_default(),
        },
        "pusher:subscription_error" => Inbound::SubscriptionError {
            channel: frame.channel.unwrap_or_default(),
            status: data
                .get("status")
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok()),
        },
        "pusher:ping" => Inbound::Ping,
        "pusher:pong" => Inbound::Pong,
        "pusher:error" => Inbound::Error {
            code: data
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok()),
            message: data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        },
        event if event.starts_with("pusher:") || event.starts_with("pusher_internal:") => {
            Inbound::Ignored {
                event: frame.event,
            }
        }
        _ => match frame.channel {
            Some(channel) => Inbound::ChannelEvent {
                channel,
                event: frame.event,
                data,
            },
            None => Inbound::Ignored {
                event: frame.event,
            },
        },
    };

    Ok(inbound)
}

/// `pusher:subscribe` frame; `auth` is required for private channels.
#[must_use]
pub fn subscribe_frame(channel: &str, auth: Option<&str>) -> String {
    let mut data = json!({ "channel": channel });
    if let Some(auth) = auth {
        data["auth"] = Value::String(auth.to_string());
    }
    json!({ "event": "pusher:subscribe", "data": data }).to_string()
}

/// `pusher:unsubscribe` frame.
#[must_use]
pub fn unsubscribe_frame(channel: &str) -> String {
    json!({ "event": "pusher:unsubscribe", "data": { "channel": channel } }).to_string()
}

/// `pusher:pong` frame.
#[must_use]
pub fn pong_frame() -> String {
    json!({ "event": "pusher:pong", "data": {} }).to_string()
}

/// Whether `channel` needs an authenticated subscription.
#[must_use]
pub fn is_private(channel: &str) -> bool {
    channel.starts_with(PRIVATE_CHANNEL_PREFIX)
}

/// Socket URL for the broker.
#[must_use]
pub fn socket_url(broker: &BrokerConfig) -> String {
    format!(
        "{}://{}:{}/app/{}?protocol={}&client={}&version={}&flash=false",
        broker.scheme.ws(),
        broker.host,
        broker.port,
        broker.app_key,
        PUSHER_PROTOCOL_VERSION,
        CLIENT_NAME,
        env!("CARGO_PKG_VERSION"),
    )
}
