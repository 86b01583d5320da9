//! Health counters for a session

use std::sync::atomic::{AtomicU64, Ordering};

use super::types::MediaKind;

/// Health metrics for a session
///
/// All fields use atomic operations for thread-safe access from the
/// dispatcher, the ingest path and the caller.
#[derive(Debug, Default)]
pub struct SessionHealth {
    /// Video frames handed to the video queue
    pub video_frames: AtomicU64,

    /// Audio frames handed to the audio queue
    pub audio_frames: AtomicU64,

    /// Frames refused by the dispatcher (malformed, or arriving after close)
    pub rejected_frames: AtomicU64,

    /// Frames whose pts went backwards within their track
    pub pts_regressions: AtomicU64,

    /// Outbound audio units accepted by the transport
    pub audio_units_sent: AtomicU64,

    /// Outbound audio bytes accepted by the transport
    pub audio_bytes_sent: AtomicU64,

    /// Audio units the transport refused
    pub send_failures: AtomicU64,
}

impl SessionHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_frame(&self, kind: MediaKind) {
        match kind {
            MediaKind::Video => self.video_frames.fetch_add(1, Ordering::Relaxed),
            MediaKind::Audio => self.audio_frames.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_rejected_frame(&self) {
        self.rejected_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pts_regression(&self) {
        self.pts_regressions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_audio_unit(&self, bytes: usize) {
        self.audio_units_sent.fetch_add(1, Ordering::Relaxed);
        self.audio_bytes_sent
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames(&self, kind: MediaKind) -> u64 {
        match kind {
            MediaKind::Video => self.video_frames.load(Ordering::Relaxed),
            MediaKind::Audio => self.audio_frames.load(Ordering::Relaxed),
        }
    }

    pub fn rejected_frames(&self) -> u64 {
        self.rejected_frames.load(Ordering::Relaxed)
    }

    pub fn audio_units_sent(&self) -> u64 {
        self.audio_units_sent.load(Ordering::Relaxed)
    }

    pub fn audio_bytes_sent(&self) -> u64 {
        self.audio_bytes_sent.load(Ordering::Relaxed)
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            video_frames: self.frames(MediaKind::Video),
            audio_frames: self.frames(MediaKind::Audio),
            rejected_frames: self.rejected_frames(),
            pts_regressions: self.pts_regressions.load(Ordering::Relaxed),
            audio_units_sent: self.audio_units_sent(),
            audio_bytes_sent: self.audio_bytes_sent(),
            send_failures: self.send_failures(),
        }
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSummary {
    pub video_frames: u64,
    pub audio_frames: u64,
    pub rejected_frames: u64,
    pub pts_regressions: u64,
    pub audio_units_sent: u64,
    pub audio_bytes_sent: u64,
    pub send_failures: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} video / {} audio frames ({} rejected, {} pts regressions), {} audio units ({} bytes) sent, {} send failures",
            self.video_frames,
            self.audio_frames,
            self.rejected_frames,
            self.pts_regressions,
            self.audio_units_sent,
            self.audio_bytes_sent,
            self.send_failures
        )
    }
}
