//! Signaling socket: offer/answer exchange and the control channel

use async_tungstenite::WebSocketStream;
use async_tungstenite::tokio::{ConnectStream, connect_async};
use async_tungstenite::tungstenite::Message;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::TransportError;
use crate::transport::{ControlMessage, InboundEvent, InboundSink};

pub type WsStream = WebSocketStream<ConnectStream>;
pub type WsSink = SplitSink<WsStream, Message>;
pub type WsSource = SplitStream<WsStream>;
pub type SharedSink = Arc<Mutex<WsSink>>;

const READY: &str = "START";
const REMOTE_STOP: &str = "STOP";
const ACK: &str = "ACK";
pub const DONE: &str = "DONE";

/// A text message from the renderer, after the handshake
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteMessage {
    /// The renderer hit one of its own limits and ended the session
    Stop,
    Error(String),
    /// Reply to a latency ping, carrying the ping's send time
    Pong(f64),
    Ack,
    Other(String),
}

impl RemoteMessage {
    pub fn parse(text: &str) -> Self {
        if text == REMOTE_STOP {
            RemoteMessage::Stop
        } else if text.contains("error") {
            RemoteMessage::Error(text.to_string())
        } else if text.contains("pong") {
            text.split(' ')
                .nth(1)
                .and_then(|t| t.trim().parse::<f64>().ok())
                .map(RemoteMessage::Pong)
                .unwrap_or_else(|| RemoteMessage::Other(text.to_string()))
        } else if text == ACK {
            RemoteMessage::Ack
        } else {
            RemoteMessage::Other(text.to_string())
        }
    }
}

/// Seconds since the Unix epoch
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

pub async fn open(url: &str) -> Result<WsStream, TransportError> {
    debug!("Signaling: connecting to {}", url);
    let (ws, _) = connect_async(url).await?;
    info!("Signaling: connected");
    Ok(ws)
}

/// Next text frame; control frames are skipped
async fn next_text(source: &mut WsSource) -> Result<String, TransportError> {
    while let Some(message) = source.next().await {
        match message? {
            Message::Text(text) => return Ok(text.as_str().to_string()),
            Message::Close(frame) => {
                debug!("Signaling: closed by remote: {:?}", frame);
                return Err(TransportError::ChannelClosed);
            }
            other => debug!("Signaling: skipping {:?} frame", other),
        }
    }
    Err(TransportError::ChannelClosed)
}

/// Next handshake reply, failing on anything the renderer flags as an error
async fn next_reply(source: &mut WsSource) -> Result<String, TransportError> {
    let text = next_text(source).await?;
    if let RemoteMessage::Error(message) = RemoteMessage::parse(&text) {
        return Err(TransportError::HandshakeRejected(message));
    }
    Ok(text)
}

/// Run the offer/answer exchange and authenticate with `token`.
///
/// Returns the renderer's answer once it has announced it is ready.
pub async fn handshake(
    sink: &mut WsSink,
    source: &mut WsSource,
    offer: &RTCSessionDescription,
    token: &str,
) -> Result<RTCSessionDescription, TransportError> {
    let offer = serde_json::to_string(offer)
        .map_err(|e| TransportError::Signaling(format!("cannot encode offer: {e}")))?;
    sink.send(Message::text(offer)).await?;
    next_reply(source).await?;

    let answer = next_reply(source).await?;
    let answer: RTCSessionDescription = serde_json::from_str(&answer)
        .map_err(|e| TransportError::HandshakeRejected(format!("invalid answer: {e}")))?;

    sink.send(Message::text(token.to_string())).await?;
    next_reply(source).await?;

    let ready = next_reply(source).await?;
    if ready != READY {
        return Err(TransportError::HandshakeRejected(ready));
    }

    debug!("Signaling: renderer ready");
    Ok(answer)
}

pub async fn send_text(sink: &SharedSink, text: impl Into<String>) -> Result<(), TransportError> {
    sink.lock().await.send(Message::text(text.into())).await?;
    Ok(())
}

/// Read renderer messages until it stops the session or `cancel` fires
pub async fn control_loop(mut source: WsSource, inbound: InboundSink, cancel: CancellationToken) {
    loop {
        let message = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            message = source.next() => message,
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text.as_str().to_string(),
            Some(Ok(Message::Close(_))) | None => {
                if !cancel.is_cancelled() {
                    warn!("Signaling: socket closed by remote");
                    disconnect(&inbound, "signaling socket closed").await;
                }
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                if !cancel.is_cancelled() {
                    error!("Signaling: {}", e);
                    disconnect(&inbound, &e.to_string()).await;
                }
                break;
            }
        };

        match RemoteMessage::parse(&text) {
            RemoteMessage::Stop => {
                info!("Signaling: renderer ended the session (max session length or idle time)");
                disconnect(&inbound, REMOTE_STOP).await;
                break;
            }
            RemoteMessage::Error(message) => {
                error!("Signaling: renderer error: {}", message);
                disconnect(&inbound, &message).await;
                break;
            }
            RemoteMessage::Pong(sent_at) => {
                info!("Signaling: latency {:.3}s", unix_now() - sent_at);
            }
            RemoteMessage::Ack => {}
            RemoteMessage::Other(text) => debug!("Signaling: {}", text),
        }
    }
    debug!("Signaling: control loop stopped");
}

async fn disconnect(inbound: &InboundSink, reason: &str) {
    let event = InboundEvent::Disconnected {
        reason: reason.to_string(),
    };
    if inbound.send(event).await.is_err() {
        debug!("Signaling: session already gone");
    }
}

/// Send a latency ping every `interval` until cancelled
pub async fn ping_loop(sink: SharedSink, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let ping = ControlMessage::Ping(unix_now()).to_wire();
        if let Err(e) = send_text(&sink, ping).await {
            warn!("Signaling: ping failed: {}", e);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_control_messages() {
        assert_eq!(RemoteMessage::parse("STOP"), RemoteMessage::Stop);
        assert_eq!(RemoteMessage::parse("ACK"), RemoteMessage::Ack);
        assert_eq!(
            RemoteMessage::parse("pong 1712000000.25"),
            RemoteMessage::Pong(1_712_000_000.25)
        );
        assert!(matches!(
            RemoteMessage::parse("Invalid API key error"),
            RemoteMessage::Error(_)
        ));
        assert_eq!(
            RemoteMessage::parse("hello"),
            RemoteMessage::Other("hello".into())
        );
    }

    #[test]
    fn test_malformed_pong_is_not_fatal() {
        assert_eq!(
            RemoteMessage::parse("pong"),
            RemoteMessage::Other("pong".into())
        );
        assert_eq!(
            RemoteMessage::parse("pong abc"),
            RemoteMessage::Other("pong abc".into())
        );
    }

    #[test]
    fn test_stop_must_match_exactly() {
        assert_eq!(
            RemoteMessage::parse("STOPPING"),
            RemoteMessage::Other("STOPPING".into())
        );
    }

    #[test]
    fn test_unix_now_is_recent() {
        // 2020-01-01
        assert!(unix_now() > 1_577_836_800.0);
    }
}
