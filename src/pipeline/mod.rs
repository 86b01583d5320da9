//! Session pipeline for facecast
//!
//! Everything between the transport and the public session API:
//! - Control: the session state machine and the timeout supervisor
//! - Outbound: re-chunking caller audio for the transport
//! - Inbound: dispatching decoded frames into bounded per-kind queues
//! - Clock and health counters shared by all of the above
//!
//! # Architecture
//!
//! Each long-running part (dispatcher, supervisor) runs in its own task and
//! stops on the session's cancellation token. Queues are the only point
//! where inbound stages and the consumer meet; they apply backpressure
//! instead of dropping frames.

pub mod clock;
pub mod dispatcher;
pub mod health;
pub mod ingest;
pub mod queue;
pub mod state;
pub mod supervisor;
pub mod types;

pub use clock::SessionClock;
pub use dispatcher::InboundMediaDispatcher;
pub use health::{HealthSummary, SessionHealth};
pub use ingest::AudioIngestPipeline;
pub use queue::{ConsumerClaim, FrameQueue, FrameStream, QueueClosed};
pub use state::{SessionState, StopReason};
pub use supervisor::TimeoutSupervisor;
pub use types::{AudioFrame, Frame, MediaKind, Timestamp, VideoFrame};
