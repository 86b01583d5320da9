pub const FRAME_RATE: u32 = 30;

// outbound audio: PCM16 mono
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
pub const INPUT_BYTES_PER_SAMPLE: usize = 2;

// inbound audio: stereo PCM at the WebRTC clock rate
pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;
pub const OUTPUT_CHANNELS: u16 = 2;

/// Largest audio unit written to the signaling socket (187.5ms of input audio).
pub const AUDIO_UNIT_BYTES: usize = 6000;

/// Silence needed to wake the remote renderer.
pub const BOOTSTRAP_SILENCE_SECS: f64 = 0.1875;

// queues hold ~3 seconds of media
pub const VIDEO_QUEUE_CAPACITY: usize = 3 * FRAME_RATE as usize;
pub const AUDIO_QUEUE_CAPACITY: usize = 150;

pub const INBOUND_CHANNEL_DEPTH: usize = 64;

pub const DEFAULT_API_URL: &str = "https://api.simli.ai";
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
pub const DATA_CHANNEL_LABEL: &str = "datachannel";

pub const RTP_VIDEO_CLOCK_RATE: u32 = 90_000;
pub const RTP_AUDIO_CLOCK_RATE: u32 = 48_000;
