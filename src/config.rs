use crate::assets::{
    AUDIO_QUEUE_CAPACITY, AUDIO_UNIT_BYTES, DEFAULT_API_URL, INBOUND_CHANNEL_DEPTH,
    VIDEO_QUEUE_CAPACITY,
};
use serde::Serialize;
use std::time::Duration;

/// Parameters of one avatar session, sent verbatim as the session-start request.
///
/// Immutable once handed to a [`Session`](crate::session::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub api_key: String,
    pub face_id: String,
    pub sync_audio: bool,
    pub handle_silence: bool,
    /// Hard ceiling from session start, in seconds
    pub max_session_length: u64,
    /// Ceiling since the last send or frame dequeue, in seconds
    pub max_idle_time: u64,
}

impl SessionConfig {
    pub fn new(api_key: impl Into<String>, face_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            face_id: face_id.into(),
            sync_audio: true,
            handle_silence: true,
            max_session_length: 600,
            max_idle_time: 30,
        }
    }

    pub fn with_max_session_length(mut self, secs: u64) -> Self {
        self.max_session_length = secs;
        self
    }

    pub fn with_max_idle_time(mut self, secs: u64) -> Self {
        self.max_idle_time = secs;
        self
    }

    pub fn with_sync_audio(mut self, sync_audio: bool) -> Self {
        self.sync_audio = sync_audio;
        self
    }

    pub fn with_handle_silence(mut self, handle_silence: bool) -> Self {
        self.handle_silence = handle_silence;
        self
    }

    pub fn session_length_limit(&self) -> Duration {
        Duration::from_secs(self.max_session_length)
    }

    pub fn idle_limit(&self) -> Duration {
        Duration::from_secs(self.max_idle_time)
    }
}

/// Engine tuning knobs that never leave the client.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub video_queue_capacity: usize,
    pub audio_queue_capacity: usize,
    /// Granularity of the timeout supervisor
    pub tick_interval: Duration,
    pub audio_unit_bytes: usize,
    /// How far outbound audio may run ahead of real time; `None` sends as fast
    /// as the transport accepts
    pub max_audio_lead: Option<Duration>,
    pub handshake_timeout: Duration,
    pub inbound_buffer: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            video_queue_capacity: VIDEO_QUEUE_CAPACITY,
            audio_queue_capacity: AUDIO_QUEUE_CAPACITY,
            tick_interval: Duration::from_secs(1),
            audio_unit_bytes: AUDIO_UNIT_BYTES,
            max_audio_lead: None,
            handshake_timeout: Duration::from_secs(30),
            inbound_buffer: INBOUND_CHANNEL_DEPTH,
        }
    }
}

impl EngineOptions {
    pub fn with_queue_capacity(mut self, video: usize, audio: usize) -> Self {
        self.video_queue_capacity = video.max(1);
        self.audio_queue_capacity = audio.max(1);
        self
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_audio_unit_bytes(mut self, bytes: usize) -> Self {
        // units must hold whole PCM16 samples
        self.audio_unit_bytes = (bytes.max(2) / 2) * 2;
        self
    }

    pub fn with_max_audio_lead(mut self, lead: Option<Duration>) -> Self {
        self.max_audio_lead = lead;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

/// Settings for the WebRTC transport.
#[derive(Debug, Clone)]
pub struct WebRtcOptions {
    pub api_url: String,
    /// Fetch TURN servers from the API instead of using the public STUN server
    pub use_turn_server: bool,
    /// Seconds between latency pings, 0 disables
    pub latency_interval: u64,
}

impl Default for WebRtcOptions {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            use_turn_server: false,
            latency_interval: 60,
        }
    }
}

impl WebRtcOptions {
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_turn_server(mut self, use_turn_server: bool) -> Self {
        self.use_turn_server = use_turn_server;
        self
    }

    pub fn with_latency_interval(mut self, secs: u64) -> Self {
        self.latency_interval = secs;
        self
    }

    /// The signaling socket lives on the same host as the HTTP API.
    pub fn ws_url(&self) -> String {
        self.api_url.replacen("http", "ws", 1)
    }
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_wire_format() {
        let config = SessionConfig::new("key", "face")
            .with_max_session_length(20)
            .with_max_idle_time(10);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["apiKey"], "key");
        assert_eq!(json["faceId"], "face");
        assert_eq!(json["syncAudio"], true);
        assert_eq!(json["handleSilence"], true);
        assert_eq!(json["maxSessionLength"], 20);
        assert_eq!(json["maxIdleTime"], 10);
    }

    #[test]
    fn test_ws_url_derivation() {
        let opts = WebRtcOptions::default();
        assert_eq!(opts.ws_url(), "wss://api.simli.ai");

        let opts = WebRtcOptions::default().with_api_url("http://localhost:8080/");
        assert_eq!(opts.ws_url(), "ws://localhost:8080");
    }

    #[test]
    fn test_audio_unit_alignment() {
        let opts = EngineOptions::default().with_audio_unit_bytes(6001);
        assert_eq!(opts.audio_unit_bytes, 6000);

        let opts = EngineOptions::default().with_audio_unit_bytes(0);
        assert_eq!(opts.audio_unit_bytes, 2);
    }
}
