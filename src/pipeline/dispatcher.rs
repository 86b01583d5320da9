//! Inbound media dispatcher
//!
//! Drains the transport's event channel, stamps each frame with its position
//! in its track and routes it to the video or audio queue. A full queue
//! blocks the dispatcher, which in turn backs up the transport.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::health::SessionHealth;
use super::queue::FrameQueue;
use super::types::{AudioFrame, Frame, MediaKind, Timestamp, VideoFrame};
use crate::transport::InboundEvent;

/// Per-track ordering state
#[derive(Debug, Default)]
struct TrackCursor {
    next_sequence: u64,
    last_pts: Option<Timestamp>,
}

impl TrackCursor {
    /// Returns the sequence number for the next frame and whether its pts
    /// went backwards
    fn advance(&mut self, pts: Timestamp) -> (u64, bool) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let regressed = self.last_pts.is_some_and(|last| pts < last);
        self.last_pts = Some(pts);
        (sequence, regressed)
    }
}

pub struct InboundMediaDispatcher {
    events: mpsc::Receiver<InboundEvent>,
    video: Arc<FrameQueue<VideoFrame>>,
    audio: Arc<FrameQueue<AudioFrame>>,
    health: Arc<SessionHealth>,
    cancel: CancellationToken,
    video_cursor: TrackCursor,
    audio_cursor: TrackCursor,
}

impl InboundMediaDispatcher {
    pub fn new(
        events: mpsc::Receiver<InboundEvent>,
        video: Arc<FrameQueue<VideoFrame>>,
        audio: Arc<FrameQueue<AudioFrame>>,
        health: Arc<SessionHealth>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            events,
            video,
            audio,
            health,
            cancel,
            video_cursor: TrackCursor::default(),
            audio_cursor: TrackCursor::default(),
        }
    }

    /// Dispatch until the transport hangs up or the session is cancelled.
    ///
    /// Both queues are closed on the way out so consumers see end-of-stream.
    pub async fn run(mut self) {
        info!("Dispatcher: started");

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Dispatcher: cancelled");
                    break;
                }
                event = self.events.recv() => event,
            };

            match event {
                Some(event) => self.handle(event).await,
                None => {
                    info!("Dispatcher: transport channel closed");
                    break;
                }
            }
        }

        self.video.close();
        self.audio.close();
        info!("Dispatcher: stopped");
    }

    async fn handle(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Frame(Frame::Video(frame)) => self.dispatch_video(frame).await,
            InboundEvent::Frame(Frame::Audio(frame)) => self.dispatch_audio(frame).await,
            InboundEvent::TrackEnded(kind) => {
                info!("Dispatcher: {} track ended", kind);
                match kind {
                    MediaKind::Video => self.video.close(),
                    MediaKind::Audio => self.audio.close(),
                }
            }
            InboundEvent::Disconnected { reason } => {
                warn!("Dispatcher: remote disconnected: {}", reason);
                self.video.close();
                self.audio.close();
            }
        }
    }

    async fn dispatch_video(&mut self, mut frame: VideoFrame) {
        if !frame.is_well_formed() {
            warn!(
                "Dispatcher: rejecting malformed video frame {}x{} with {} bytes",
                frame.width,
                frame.height,
                frame.data.len()
            );
            self.health.record_rejected_frame();
            return;
        }

        let (sequence, regressed) = self.video_cursor.advance(frame.pts);
        if regressed {
            debug!("Dispatcher: video pts went backwards at {}", frame.pts);
            self.health.record_pts_regression();
        }
        frame.sequence = sequence;

        match self.video.push(frame).await {
            Ok(()) => self.health.record_frame(MediaKind::Video),
            Err(_) => {
                debug!("Dispatcher: video queue closed, frame {} discarded", sequence);
                self.health.record_rejected_frame();
            }
        }
    }

    async fn dispatch_audio(&mut self, mut frame: AudioFrame) {
        if !frame.is_well_formed() {
            warn!(
                "Dispatcher: rejecting malformed audio frame ({} samples, {} channels)",
                frame.samples.len(),
                frame.channels
            );
            self.health.record_rejected_frame();
            return;
        }

        let (sequence, regressed) = self.audio_cursor.advance(frame.pts);
        if regressed {
            debug!("Dispatcher: audio pts went backwards at {}", frame.pts);
            self.health.record_pts_regression();
        }
        frame.sequence = sequence;

        match self.audio.push(frame).await {
            Ok(()) => self.health.record_frame(MediaKind::Audio),
            Err(_) => {
                debug!("Dispatcher: audio queue closed, frame {} discarded", sequence);
                self.health.record_rejected_frame();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Harness {
        tx: mpsc::Sender<InboundEvent>,
        video: Arc<FrameQueue<VideoFrame>>,
        audio: Arc<FrameQueue<AudioFrame>>,
        health: Arc<SessionHealth>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn harness(video_capacity: usize) -> Harness {
        let (tx, rx) = mpsc::channel(16);
        let video = Arc::new(FrameQueue::new(MediaKind::Video, video_capacity));
        let audio = Arc::new(FrameQueue::new(MediaKind::Audio, 16));
        let health = Arc::new(SessionHealth::new());
        let cancel = CancellationToken::new();
        let dispatcher = InboundMediaDispatcher::new(
            rx,
            video.clone(),
            audio.clone(),
            health.clone(),
            cancel.clone(),
        );
        let task = tokio::spawn(dispatcher.run());
        Harness {
            tx,
            video,
            audio,
            health,
            cancel,
            task,
        }
    }

    fn video(pts_ms: i64) -> InboundEvent {
        InboundEvent::Frame(Frame::Video(VideoFrame::new(
            vec![0u8; 2 * 2 * 3],
            2,
            2,
            Timestamp::from_micros(pts_ms * 1000),
        )))
    }

    fn audio(pts_ms: i64) -> InboundEvent {
        InboundEvent::Frame(Frame::Audio(AudioFrame::new(
            vec![0; 960 * 2],
            48_000,
            2,
            Timestamp::from_micros(pts_ms * 1000),
        )))
    }

    #[tokio::test]
    async fn test_routes_by_kind_and_stamps_sequence() {
        let h = harness(16);
        for i in 0..3 {
            h.tx.send(video(i * 33)).await.unwrap();
            h.tx.send(audio(i * 20)).await.unwrap();
        }
        drop(h.tx);
        h.task.await.unwrap();

        for expected in 0..3 {
            let v = h.video.pop().await.unwrap().unwrap();
            assert_eq!(v.sequence, expected);
            assert_eq!(v.pts, Timestamp::from_micros(expected as i64 * 33_000));
            let a = h.audio.pop().await.unwrap().unwrap();
            assert_eq!(a.sequence, expected);
        }
        assert_eq!(h.video.pop().await.unwrap(), None);
        assert_eq!(h.audio.pop().await.unwrap(), None);
        assert_eq!(h.health.frames(MediaKind::Video), 3);
        assert_eq!(h.health.frames(MediaKind::Audio), 3);
    }

    #[tokio::test]
    async fn test_malformed_frames_rejected() {
        let h = harness(16);
        let bad = VideoFrame::new(vec![0u8; 5], 2, 2, Timestamp::default());
        h.tx.send(InboundEvent::Frame(Frame::Video(bad))).await.unwrap();
        h.tx.send(video(0)).await.unwrap();
        drop(h.tx);
        h.task.await.unwrap();

        // rejected frames do not consume a sequence number
        let v = h.video.pop().await.unwrap().unwrap();
        assert_eq!(v.sequence, 0);
        assert_eq!(h.health.rejected_frames(), 1);
    }

    #[tokio::test]
    async fn test_pts_regression_counted_not_reordered() {
        let h = harness(16);
        h.tx.send(video(66)).await.unwrap();
        h.tx.send(video(33)).await.unwrap();
        drop(h.tx);
        h.task.await.unwrap();

        assert_eq!(h.video.pop().await.unwrap().unwrap().pts.micros, 66_000);
        assert_eq!(h.video.pop().await.unwrap().unwrap().pts.micros, 33_000);
        assert_eq!(h.health.summary().pts_regressions, 1);
    }

    #[tokio::test]
    async fn test_track_end_closes_only_that_queue() {
        let h = harness(16);
        h.tx.send(InboundEvent::TrackEnded(MediaKind::Video)).await.unwrap();
        h.tx.send(audio(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(h.video.is_closed());
        assert!(!h.audio.is_closed());
        assert!(h.audio.pop().await.unwrap().is_some());

        h.tx.send(video(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.health.rejected_frames(), 1);
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_closes_both_queues() {
        let h = harness(16);
        h.tx.send(video(0)).await.unwrap();
        h.tx
            .send(InboundEvent::Disconnected {
                reason: "STOP".into(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(h.video.is_closed());
        assert!(h.audio.is_closed());
        // already queued frames stay drainable
        assert!(h.video.pop().await.unwrap().is_some());
        assert_eq!(h.video.pop().await.unwrap(), None);
        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_applies_backpressure() {
        let h = harness(2);
        for i in 0..4 {
            h.tx.send(video(i * 33)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.video.len(), 2);

        for expected in 0..4 {
            assert_eq!(h.video.pop().await.unwrap().unwrap().sequence, expected);
        }
        assert_eq!(h.health.rejected_frames(), 0);

        h.cancel.cancel();
        h.task.await.unwrap();
        assert!(h.video.is_closed());
    }
}
