//! Broker socket.
//!
//! [`open`] performs the authenticated WebSocket handshake and splits the
//! stream into a [`FrameSink`] and a [`FrameSource`], so the connection
//! task can read and write from the same `tokio::select!` loop. The broker
//! speaks JSON text frames only; everything else except pings and closes is
//! dropped here.

use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// What the broker sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// One JSON text frame, still encoded.
    Frame(String),
    /// Transport-level ping; answer with [`FrameSink::pong`].
    Ping(Vec<u8>),
    /// Close frame. `code` is `None` when the broker sent no status.
    Closed {
        /// WebSocket close code.
        code: Option<u16>,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// Outbound side of the broker socket.
#[derive(Debug)]
pub struct FrameSink {
    inner: SplitSink<Socket, Message>,
}

impl FrameSink {
    /// Write one encoded frame.
    pub async fn send(&mut self, frame: String) -> Result<()> {
        self.inner
            .send(Message::Text(frame))
            .await
            .context("failed to write broker frame")
    }

    /// Answer a transport ping with the same payload.
    pub async fn pong(&mut self, payload: Vec<u8>) -> Result<()> {
        self.inner
            .send(Message::Pong(payload))
            .await
            .context("failed to write pong")
    }

    /// Send a close frame and flush.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.close().await.context("failed to close broker socket")
    }
}

/// Inbound side of the broker socket.
#[derive(Debug)]
pub struct FrameSource {
    inner: SplitStream<Socket>,
}

impl FrameSource {
    /// Next relevant message; `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Result<Incoming>> {
        while let Some(message) = self.inner.next().await {
            let incoming = match message {
                Ok(Message::Text(text)) => Incoming::Frame(text),
                Ok(Message::Ping(payload)) => Incoming::Ping(payload),
                Ok(Message::Close(frame)) => Incoming::Closed {
                    code: frame.as_ref().map(|f| u16::from(f.code)),
                    reason: frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
                },
                Ok(Message::Binary(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(e) => return Some(Err(e).context("failed to read broker frame")),
            };
            return Some(Ok(incoming));
        }
        None
    }
}

/// Open `url`, presenting `bearer` in the `Authorization` header.
///
/// Fails if the handshake does not complete within `timeout`.
pub async fn open(url: &str, bearer: &str, timeout: Duration) -> Result<(FrameSink, FrameSource)> {
    let mut request = url
        .into_client_request()
        .with_context(|| format!("not a WebSocket URL: {url}"))?;
    let authorization = HeaderValue::from_str(&format!("Bearer {bearer}"))
        .context("bearer token is not a valid header value")?;
    request.headers_mut().insert("Authorization", authorization);

    let (socket, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(request))
        .await
        .with_context(|| format!("handshake timed out after {}s", timeout.as_secs()))?
        .with_context(|| format!("handshake with {url} failed"))?;

    let (inner_sink, inner_source) = socket.split();
    Ok((
        FrameSink { inner: inner_sink },
        FrameSource {
            inner: inner_source,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUICK: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_open_rejects_bad_url() {
        let err = open("localhost/app", "tok", QUICK).await.unwrap_err();
        assert!(err.to_string().contains("not a WebSocket URL"));
    }

    #[tokio::test]
    async fn test_open_refused() {
        assert!(open("ws://127.0.0.1:1/app/key", "tok", QUICK).await.is_err());
    }

    #[tokio::test]
    async fn test_open_rejects_token_with_newline() {
        let err = open("ws://127.0.0.1:1/app/key", "bad\ntoken", QUICK)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("header value"));
    }
}
