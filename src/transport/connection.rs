//! Connection task: owns the socket for one broker session.
//!
//! Routes decoded frames to the dispatcher, answers pings, sends
//! (authorized) subscriptions once the broker has assigned a socket id and
//! publishes state transitions. Returns when the socket closes, errors or
//! the cancellation token fires.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Command, Shared, TransportState};
use crate::pusher::{self, ErrorClass, Inbound};
use crate::ws::{FrameSink, FrameSource, Incoming};

/// Characters of an undecodable frame echoed into the log.
const FRAME_PREVIEW_CHARS: usize = 100;

/// Why the message loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// `disconnect()` was requested; the caller owns the state.
    Cancelled,
    /// Socket closed by the broker or stream ended.
    Closed,
    /// Read/write error or transient broker error.
    Errored,
    /// Broker refused the connection permanently.
    Failed,
}

/// Per-session bookkeeping.
#[derive(Debug, Default)]
struct Session {
    socket_id: Option<String>,
    /// Channels a `pusher:subscribe` was sent for on this socket.
    sent: HashSet<String>,
}

/// Publishes `Unavailable` if the task unwinds before reporting its exit.
struct UnwindGuard<'a> {
    shared: &'a Shared,
    armed: bool,
}

impl Drop for UnwindGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            log::error!("[Transport] Connection task aborted");
            self.shared.set_socket_id(None);
            self.shared.set_state(TransportState::Unavailable);
        }
    }
}

pub(super) async fn run(
    shared: Arc<Shared>,
    mut writer: FrameSink,
    mut reader: FrameSource,
    mut commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
) {
    let mut guard = UnwindGuard {
        shared: &shared,
        armed: true,
    };
    let mut session = Session::default();

    let exit = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                for channel in &session.sent {
                    let _ = writer.send(pusher::unsubscribe_frame(channel)).await;
                }
                let _ = writer.shutdown().await;
                break Exit::Cancelled;
            }

            msg = reader.next() => match msg {
                Some(Ok(Incoming::Frame(text))) => {
                    if let Some(exit) = handle_text(&shared, &mut session, &mut writer, &text).await {
                        let _ = writer.shutdown().await;
                        break exit;
                    }
                }
                Some(Ok(Incoming::Ping(data))) => {
                    let _ = writer.pong(data).await;
                }
                Some(Ok(Incoming::Closed { code, reason })) => {
                    log::info!("[Transport] Closed by broker (code={:?}, reason={:?})", code, reason);
                    break Exit::Closed;
                }
                Some(Err(e)) => {
                    log::warn!("[Transport] Socket error: {:#}", e);
                    break Exit::Errored;
                }
                None => {
                    log::info!("[Transport] Socket stream ended");
                    break Exit::Closed;
                }
            },

            Some(command) = commands.recv() => {
                if let Err(e) = handle_command(&shared, &mut session, &mut writer, command).await {
                    log::warn!("[Transport] Write failed: {:#}", e);
                    break Exit::Errored;
                }
            }
        }
    };

    guard.armed = false;
    shared.set_socket_id(None);
    match exit {
        Exit::Cancelled => {}
        Exit::Closed => shared.set_state(TransportState::Disconnected),
        Exit::Errored => shared.set_state(TransportState::Unavailable),
        Exit::Failed => shared.set_state(TransportState::Failed),
    }
}

async fn handle_command(
    shared: &Shared,
    session: &mut Session,
    writer: &mut FrameSink,
    command: Command,
) -> anyhow::Result<()> {
    match command {
        Command::Subscribe(channel) => subscribe(shared, session, writer, &channel).await,
        Command::Unsubscribe(channel) => {
            if session.sent.remove(&channel) {
                writer.send(pusher::unsubscribe_frame(&channel)).await?;
            }
            Ok(())
        }
    }
}

/// Send `pusher:subscribe` for `channel` unless already sent on this socket.
///
/// Before the session is established this is a no-op; the channel list is
/// replayed on `connection_established`. Authorization failures are logged
/// and leave the channel unsubscribed on this socket.
async fn subscribe(
    shared: &Shared,
    session: &mut Session,
    writer: &mut FrameSink,
    channel: &str,
) -> anyhow::Result<()> {
    if session.sent.contains(channel) {
        return Ok(());
    }
    let Some(socket_id) = session.socket_id.as_deref() else {
        log::trace!("[Transport] Deferring subscribe for {} until connected", channel);
        return Ok(());
    };

    let auth = if pusher::is_private(channel) {
        match shared.authorizer.authorize(socket_id, channel).await {
            Ok(auth) => Some(auth),
            Err(e) => {
                log::warn!("[Transport] Authorization for {} failed: {:#}", channel, e);
                return Ok(());
            }
        }
    } else {
        None
    };

    writer
        .send(pusher::subscribe_frame(channel, auth.as_deref()))
        .await?;
    session.sent.insert(channel.to_string());
    log::debug!("[Transport] Sent subscribe for {}", channel);
    Ok(())
}

/// At most the first `FRAME_PREVIEW_CHARS` characters of `text`.
fn preview(text: &str) -> &str {
    text.char_indices()
        .nth(FRAME_PREVIEW_CHARS)
        .map_or(text, |(end, _)| &text[..end])
}

/// Handle one text frame. Returns `Some` when the connection must end.
async fn handle_text(
    shared: &Shared,
    session: &mut Session,
    writer: &mut FrameSink,
    text: &str,
) -> Option<Exit> {
    let frame = match pusher::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            log::warn!(
                "[Transport] Dropping undecodable frame: {:#} ({})",
                e,
                preview(text)
            );
            return None;
        }
    };

    match frame {
        Inbound::ConnectionEstablished {
            socket_id,
            activity_timeout,
        } => {
            log::info!(
                "[Transport] Connected (socket_id={}, activity_timeout={:?})",
                socket_id,
                activity_timeout
            );
            shared.set_socket_id(Some(socket_id.clone()));
            session.socket_id = Some(socket_id);
            shared.set_state(TransportState::Connected);

            for channel in shared.channels() {
                if let Err(e) = subscribe(shared, session, writer, &channel).await {
                    log::warn!("[Transport] Write failed: {:#}", e);
                    return Some(Exit::Errored);
                }
            }
            None
        }
        Inbound::SubscriptionSucceeded { channel } => {
            log::debug!("[Transport] Subscription confirmed for {}", channel);
            None
        }
        Inbound::SubscriptionError { channel, status } => {
            log::warn!(
                "[Transport] Subscription to {} rejected (status={:?})",
                channel,
                status
            );
            session.sent.remove(&channel);
            None
        }
        Inbound::Ping => match writer.send(pusher::pong_frame()).await {
            Ok(()) => None,
            Err(e) => {
                log::warn!("[Transport] Failed to answer ping: {:#}", e);
                Some(Exit::Errored)
            }
        },
        Inbound::Pong => None,
        Inbound::Error { code, message } => {
            log::warn!("[Transport] Broker error {:?}: {}", code, message);
            match ErrorClass::of(code) {
                ErrorClass::Fatal => Some(Exit::Failed),
                ErrorClass::Transient => Some(Exit::Errored),
            }
        }
        Inbound::ChannelEvent {
            channel,
            event,
            data,
        } => {
            let handled = shared.dispatcher.dispatch(&channel, &event, &data);
            if handled == 0 {
                log::trace!("[Transport] No handler for {} on {}", event, channel);
            }
            None
        }
        Inbound::Ignored { event } => {
            log::trace!("[Transport] Ignoring {}", event);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_cuts_on_char_boundary() {
        let frame = format!("{{\"channel\":\"x\",\"data\":\"{}\"}}", "ổ".repeat(120));
        assert!(!frame.is_char_boundary(100));

        let cut = preview(&frame);
        assert_eq!(cut.chars().count(), FRAME_PREVIEW_CHARS);
        assert!(frame.starts_with(cut));
    }

    #[test]
    fn test_preview_keeps_short_frames() {
        assert_eq!(preview("not json"), "not json");
        assert_eq!(preview(""), "");
    }
}
