//! Session lifecycle orchestrator
//!
//! A [`Session`] owns the transport, both frame queues, the audio ingest path
//! and the background tasks (dispatcher, supervisor). It drives the state
//! machine from `Created` to `Closed`/`Failed` and is the only public entry
//! point for sending audio and pulling frames.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assets::{BOOTSTRAP_SILENCE_SECS, INPUT_BYTES_PER_SAMPLE, INPUT_SAMPLE_RATE};
use crate::config::{EngineOptions, SessionConfig};
use crate::error::{Result, SessionError, TransportError};
use crate::pipeline::{
    AudioFrame, AudioIngestPipeline, FrameQueue, FrameStream, InboundMediaDispatcher, MediaKind,
    SessionClock, SessionHealth, SessionState, StopReason, TimeoutSupervisor, VideoFrame,
};
use crate::transport::{ControlMessage, Transport};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

struct SessionInner {
    id: u64,
    config: SessionConfig,
    options: EngineOptions,
    state: watch::Sender<SessionState>,
    clock: SessionClock,
    health: Arc<SessionHealth>,
    video: Arc<FrameQueue<VideoFrame>>,
    audio: Arc<FrameQueue<AudioFrame>>,
    transport: Arc<dyn Transport>,
    ingest: tokio::sync::Mutex<AudioIngestPipeline>,
    cancel: CancellationToken,
    stop_reason: Mutex<Option<StopReason>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl SessionInner {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Move to `to` if the machine allows it.
    ///
    /// Returns the previous state, or the current one when refused.
    fn transition(&self, to: SessionState) -> std::result::Result<SessionState, SessionState> {
        let mut outcome = Err(to);
        self.state.send_if_modified(|current| {
            if current.can_transition_to(&to) {
                outcome = Ok(*current);
                *current = to;
                true
            } else {
                outcome = Err(*current);
                false
            }
        });
        if let Ok(from) = outcome {
            info!("Session {}: {} -> {}", self.id, from, to);
        }
        outcome
    }

    fn ensure_active(&self) -> Result<()> {
        let state = self.state();
        if state.is_active() {
            Ok(())
        } else {
            Err(SessionError::Terminated { state })
        }
    }

    /// Drive `Draining -> Closed`; returns once the session is terminal
    async fn shutdown(&self, reason: StopReason) {
        if let Err(state) = self.transition(SessionState::Draining) {
            debug!("Session {}: stop while {}, waiting for teardown", self.id, state);
            let mut rx = self.state.subscribe();
            let _ = rx.wait_for(|s| s.is_terminal()).await;
            return;
        }

        self.record_stop_reason(reason);
        info!("Session {}: stopping ({})", self.id, reason);

        self.cancel.cancel();
        if let Err(e) = self.transport.close().await {
            warn!("Session {}: transport close failed: {}", self.id, e);
        }
        self.release_queues().await;

        info!("Session {}: {}", self.id, self.health.summary());
        let _ = self.transition(SessionState::Closed);
    }

    /// Release everything after a failed handshake
    async fn fail(&self, error: &TransportError) {
        warn!("Session {}: handshake failed: {}", self.id, error);
        let _ = self.transition(SessionState::Failed);

        self.cancel.cancel();
        if let Err(e) = self.transport.close().await {
            debug!("Session {}: transport close after failure: {}", self.id, e);
        }
        self.release_queues().await;
    }

    /// Close both queues and wait for the dispatcher to let go of them
    async fn release_queues(&self) {
        self.video.close();
        self.audio.close();

        let handle = match self.dispatcher.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!("Session {}: dispatcher task failed: {}", self.id, e);
        }
    }

    fn record_stop_reason(&self, reason: StopReason) {
        let mut slot = match self.stop_reason.lock() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.get_or_insert(reason);
    }
}

/// One client session with the remote renderer
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(config: SessionConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_options(config, EngineOptions::default(), transport)
    }

    pub fn with_options(
        config: SessionConfig,
        options: EngineOptions,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let health = Arc::new(SessionHealth::new());
        let ingest = AudioIngestPipeline::new(transport.clone(), &options, health.clone());
        let (state, _) = watch::channel(SessionState::Created);

        let inner = SessionInner {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            video: Arc::new(FrameQueue::new(
                MediaKind::Video,
                options.video_queue_capacity,
            )),
            audio: Arc::new(FrameQueue::new(
                MediaKind::Audio,
                options.audio_queue_capacity,
            )),
            config,
            options,
            state,
            clock: SessionClock::new(),
            health,
            transport,
            ingest: tokio::sync::Mutex::new(ingest),
            cancel: CancellationToken::new(),
            stop_reason: Mutex::new(None),
            dispatcher: Mutex::new(None),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Receiver that observes every lifecycle transition
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Why the session left `Active`, once it has
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self.inner.stop_reason.lock() {
            Ok(reason) => *reason,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn health(&self) -> &SessionHealth {
        &self.inner.health
    }

    /// Negotiate the transport and start the background tasks
    pub async fn initialize(&self) -> Result<()> {
        let inner = &self.inner;
        if let Err(state) = inner.transition(SessionState::Initializing) {
            return Err(if state.is_terminal() {
                SessionError::Terminated { state }
            } else {
                SessionError::StateConflict { state }
            });
        }

        // running before connect so frames arriving mid-handshake are routed
        let (inbound_tx, inbound_rx) = mpsc::channel(inner.options.inbound_buffer.max(1));
        let dispatcher = InboundMediaDispatcher::new(
            inbound_rx,
            inner.video.clone(),
            inner.audio.clone(),
            inner.health.clone(),
            inner.cancel.clone(),
        );
        if let Ok(mut slot) = inner.dispatcher.lock() {
            slot.replace(tokio::spawn(dispatcher.run()));
        }

        let timeout = inner.options.handshake_timeout;
        let connected = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, inner.transport.connect(&inner.config, inbound_tx)) => {
                Some(result.unwrap_or(Err(TransportError::Timeout(timeout))))
            }
        };

        match connected {
            // stop() won the race during the handshake
            None => Err(SessionError::Terminated {
                state: inner.state(),
            }),
            Some(Err(e)) => {
                inner.fail(&e).await;
                Err(SessionError::Handshake(e))
            }
            Some(Ok(())) => {
                inner.clock.restart();
                if let Err(state) = inner.transition(SessionState::Active) {
                    // stopped between connect and activation; make sure the
                    // freshly opened transport does not outlive the session
                    if let Err(e) = inner.transport.close().await {
                        debug!("Session {}: late transport close: {}", inner.id, e);
                    }
                    return Err(SessionError::Terminated { state });
                }
                self.spawn_supervisor();
                Ok(())
            }
        }
    }

    fn spawn_supervisor(&self) {
        let inner = &self.inner;
        let supervisor = TimeoutSupervisor::new(
            inner.clock.clone(),
            inner.config.session_length_limit(),
            inner.config.idle_limit(),
            inner.cancel.clone(),
        )
        .with_tick(inner.options.tick_interval);

        let session: Weak<SessionInner> = Arc::downgrade(inner);
        tokio::spawn(async move {
            if let Some(reason) = supervisor.run().await
                && let Some(inner) = session.upgrade()
            {
                inner.shutdown(reason).await;
            }
        });
    }

    /// Send PCM16 mono 16 kHz audio of any length.
    ///
    /// Valid only while `Active`. A refused unit fails this call but leaves
    /// the session up.
    pub async fn send(&self, audio: &[u8]) -> Result<()> {
        let inner = &self.inner;
        inner.ensure_active()?;

        let mut ingest = inner.ingest.lock().await;
        inner.ensure_active()?;
        inner.clock.touch();

        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => Err(SessionError::Terminated {
                state: inner.state(),
            }),
            result = ingest.send(audio) => {
                result.map_err(SessionError::TransportSend)?;
                inner.clock.touch();
                Ok(())
            }
        }
    }

    /// Send `duration` of digital silence
    pub async fn send_silence(&self, duration: Duration) -> Result<()> {
        let samples = (duration.as_secs_f64() * INPUT_SAMPLE_RATE as f64).round() as usize;
        self.send(&vec![0u8; samples * INPUT_BYTES_PER_SAMPLE]).await
    }

    /// Silence long enough for the remote to start producing frames
    pub async fn send_bootstrap_silence(&self) -> Result<()> {
        self.send_silence(Duration::from_secs_f64(BOOTSTRAP_SILENCE_SECS))
            .await
    }

    /// Ask the remote to discard audio it has buffered but not yet rendered
    pub async fn clear_buffer(&self) -> Result<()> {
        self.inner.ensure_active()?;
        self.inner
            .transport
            .send_control(ControlMessage::Skip)
            .await
            .map_err(SessionError::TransportSend)
    }

    /// Stop the session and release the transport.
    ///
    /// No-op once the session is already stopping or terminal.
    pub async fn stop(&self) -> Result<()> {
        let state = self.state();
        if state == SessionState::Created {
            return Err(SessionError::Terminated { state });
        }
        self.inner.shutdown(StopReason::Requested).await;
        Ok(())
    }

    /// Next decoded video frame; `None` once the stream has ended
    pub async fn get_next_video_frame(&self) -> Result<Option<VideoFrame>> {
        let frame = self.inner.video.pop().await?;
        if frame.is_some() {
            self.inner.clock.touch();
        }
        Ok(frame)
    }

    /// Next decoded audio frame; `None` once the stream has ended
    pub async fn get_next_audio_frame(&self) -> Result<Option<AudioFrame>> {
        let frame = self.inner.audio.pop().await?;
        if frame.is_some() {
            self.inner.clock.touch();
        }
        Ok(frame)
    }

    /// Video frames in arrival order until the stream ends
    pub fn video_stream(&self) -> Result<FrameStream<VideoFrame>> {
        self.inner.video.stream(self.inner.clock.clone())
    }

    /// Audio frames in arrival order until the stream ends
    pub fn audio_stream(&self) -> Result<FrameStream<AudioFrame>> {
        self.inner.audio.stream(self.inner.clock.clone())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let state = self.inner.state();
        if !state.is_terminal() && state != SessionState::Created {
            warn!(
                "Session {}: dropped while {}, call stop() for a clean shutdown",
                self.inner.id, state
            );
        }
        self.inner.cancel.cancel();
        self.inner.video.close();
        self.inner.audio.close();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state())
            .field("clock", &self.inner.clock)
            .finish()
    }
}
