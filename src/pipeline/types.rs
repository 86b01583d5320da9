//! Core types for the pipeline system

use bytes::Bytes;
use std::time::Duration;

/// Presentation timestamp of a media frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    /// Microseconds since the start of the track
    pub micros: i64,
}

impl Timestamp {
    /// Create a new timestamp from microseconds
    pub fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    /// Create a timestamp from an offset since the start of the track
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            micros: duration.as_micros() as i64,
        }
    }

    /// Convert an RTP timestamp delta at `clock_rate` Hz to a timestamp
    pub fn from_rtp(ticks: u64, clock_rate: u32) -> Self {
        let micros = ticks as u128 * 1_000_000 / clock_rate.max(1) as u128;
        Self {
            micros: micros as i64,
        }
    }

    /// Convert to duration
    pub fn as_duration(&self) -> Duration {
        Duration::from_micros(self.micros.max(0) as u64)
    }

    /// Calculate the difference between two timestamps
    pub fn diff(&self, other: Timestamp) -> Duration {
        let diff_micros = (self.micros - other.micros).abs();
        Duration::from_micros(diff_micros as u64)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}µs", self.micros)
    }
}

/// Kind of media data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    /// Video frame data
    Video,
    /// Audio sample data
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "Video"),
            MediaKind::Audio => write!(f, "Audio"),
        }
    }
}

/// Decoded RGB24 picture
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    /// Packed rows of `width * 3` bytes, `height` rows
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub pts: Timestamp,
    /// Position in the video track, stamped on dispatch
    pub sequence: u64,
}

impl VideoFrame {
    pub fn new(data: impl Into<Bytes>, width: u32, height: u32, pts: Timestamp) -> Self {
        Self {
            data: data.into(),
            width,
            height,
            pts,
            sequence: 0,
        }
    }

    /// Whether the buffer matches `height × width × 3`
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == self.width as usize * self.height as usize * 3
    }

    /// RGB triple at (x, y)
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y as usize * self.width as usize + x as usize) * 3;
        self.data.get(at..at + 3).map(|p| [p[0], p[1], p[2]])
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts", &self.pts)
            .field("sequence", &self.sequence)
            .field("size", &self.data.len())
            .finish()
    }
}

/// Decoded PCM16 audio, samples interleaved by channel
#[derive(Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    pub pts: Timestamp,
    /// Position in the audio track, stamped on dispatch
    pub sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16, pts: Timestamp) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            pts,
            sequence: 0,
        }
    }

    /// Samples per channel
    pub fn sample_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration(&self) -> Duration {
        Duration::from_micros(
            self.sample_count() as u64 * 1_000_000 / self.sample_rate.max(1) as u64,
        )
    }

    pub fn is_well_formed(&self) -> bool {
        self.channels > 0
            && self.sample_rate > 0
            && self.samples.len() % self.channels as usize == 0
    }
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("samples", &self.sample_count())
            .field("pts", &self.pts)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// One decoded unit of inbound media
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Video(VideoFrame),
    Audio(AudioFrame),
}

impl Frame {
    pub fn kind(&self) -> MediaKind {
        match self {
            Frame::Video(_) => MediaKind::Video,
            Frame::Audio(_) => MediaKind::Audio,
        }
    }

    pub fn pts(&self) -> Timestamp {
        match self {
            Frame::Video(v) => v.pts,
            Frame::Audio(a) => a.pts,
        }
    }

    /// Size of the payload in bytes
    pub fn size(&self) -> usize {
        match self {
            Frame::Video(v) => v.data.len(),
            Frame::Audio(a) => a.samples.len() * 2,
        }
    }
}
