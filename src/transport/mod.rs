//! Transport boundary
//!
//! The session engine only talks to the network through [`Transport`]:
//! connect with credentials, push outbound audio units, send control
//! messages, close. Inbound media flows the other way as [`InboundEvent`]s
//! pushed into a channel the dispatcher drains.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::error::TransportError;
use crate::pipeline::{Frame, MediaKind};

#[cfg(test)]
pub mod mock;
pub mod webrtc;

pub use self::webrtc::WebRtcTransport;

/// Something the transport observed on its inbound side
#[derive(Debug)]
pub enum InboundEvent {
    /// A decoded frame, in track order
    Frame(Frame),
    /// The track of this kind will deliver nothing more
    TrackEnded(MediaKind),
    /// The remote ended the session (its own limits, or an error)
    Disconnected { reason: String },
}

pub type InboundSink = mpsc::Sender<InboundEvent>;

/// Out-of-band instructions for the remote renderer
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Discard audio buffered on the remote side
    Skip,
    /// Latency probe carrying the send time in Unix seconds
    Ping(f64),
}

impl ControlMessage {
    pub fn to_wire(&self) -> String {
        match self {
            ControlMessage::Skip => "SKIP".to_string(),
            ControlMessage::Ping(sent_at) => format!("ping {sent_at}"),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Negotiate the session; inbound events go to `inbound` from here on
    async fn connect(&self, config: &SessionConfig, inbound: InboundSink)
    -> Result<(), TransportError>;

    /// Hand one outbound PCM16 unit to the network
    async fn send_audio_unit(&self, unit: Bytes) -> Result<(), TransportError>;

    async fn send_control(&self, message: ControlMessage) -> Result<(), TransportError>;

    /// Release every network resource. Must be safe to call more than once.
    async fn close(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_wire_format() {
        assert_eq!(ControlMessage::Skip.to_wire(), "SKIP");
        assert_eq!(ControlMessage::Ping(1.5).to_wire(), "ping 1.5");
    }
}
