//! Client engine for real-time audio-to-video avatar sessions.
//!
//! A [`Session`] sends mono PCM16 audio to a remote renderer and receives a
//! synchronized RGB video track and a stereo audio track back, exposed as
//! single-consumer frame queues.

pub mod assets;
pub mod config;
pub mod decoder;
pub mod error;
pub mod pipeline;
pub mod session;
pub mod transport;

pub use config::{EngineOptions, SessionConfig, WebRtcOptions};
pub use error::{SessionError, TransportError};
pub use pipeline::{AudioFrame, Frame, FrameStream, MediaKind, SessionState, StopReason, Timestamp, VideoFrame};
pub use session::Session;
pub use transport::{Transport, WebRtcTransport};
