//! Error types for sessions and transports

use thiserror::Error;

use crate::pipeline::{MediaKind, SessionState};

/// Errors raised by a transport implementation
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Signaling failed: {0}")]
    Signaling(String),

    #[error("Peer connection failed: {0}")]
    Peer(String),

    #[error("Remote rejected the handshake: {0}")]
    HandshakeRejected(String),

    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Failed to send: {0}")]
    Send(String),

    #[error("Transport is not connected")]
    NotConnected,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Http(e.to_string())
    }
}

impl From<webrtc::Error> for TransportError {
    fn from(e: webrtc::Error) -> Self {
        TransportError::Peer(e.to_string())
    }
}

impl From<async_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: async_tungstenite::tungstenite::Error) -> Self {
        use async_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ChannelClosed,
            other => TransportError::Signaling(other.to_string()),
        }
    }
}

/// Errors surfaced by the public session API
#[derive(Error, Debug)]
pub enum SessionError {
    /// Transport negotiation failed; the session is now `Failed`
    #[error("Handshake failed: {0}")]
    Handshake(#[source] TransportError),

    /// Operation attempted outside its valid state
    #[error("Session is {state}, operation not permitted")]
    Terminated { state: SessionState },

    /// Lost a race against another lifecycle call
    #[error("Conflicting lifecycle call while session is {state}")]
    StateConflict { state: SessionState },

    /// An outbound audio unit was refused; the session stays up
    #[error("Transport refused audio: {0}")]
    TransportSend(#[source] TransportError),

    /// A second consumer tried to read a single-consumer queue
    #[error("{0} queue already has a consumer")]
    ConcurrentConsumer(MediaKind),
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
