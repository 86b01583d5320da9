//! Remote track readers: RTP in, decoded frames out

use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use webrtc::rtp::packet::Packet;
use webrtc::track::track_remote::TrackRemote;

use crate::assets::{OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE, RTP_AUDIO_CLOCK_RATE, RTP_VIDEO_CLOCK_RATE};
use crate::decoder::{H264Decoder, H264Depacketizer, OpusDecoder};
use crate::pipeline::{AudioFrame, Frame, MediaKind, Timestamp, VideoFrame};
use crate::transport::{InboundEvent, InboundSink};

/// Unwraps 32-bit RTP timestamps into ticks since the first packet
#[derive(Debug, Default)]
pub struct RtpTimeline {
    first: Option<u32>,
    last: u32,
    /// Accumulated offset from wrap-arounds
    epoch: u64,
}

impl RtpTimeline {
    pub fn ticks(&mut self, timestamp: u32) -> u64 {
        let Some(first) = self.first else {
            self.first = Some(timestamp);
            self.last = timestamp;
            return 0;
        };

        // forward wrap: small value right after a large one
        if timestamp < self.last && self.last - timestamp > u32::MAX / 2 {
            self.epoch += 1 << 32;
        }
        self.last = timestamp;

        (self.epoch + timestamp as u64).saturating_sub(first as u64)
    }
}

/// Forward an event unless the session is going away
async fn forward(inbound: &InboundSink, event: InboundEvent, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = inbound.send(event) => sent.is_ok(),
    }
}

async fn next_packet(track: &TrackRemote, cancel: &CancellationToken) -> Option<Packet> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        read = track.read_rtp() => match read {
            Ok((packet, _)) => Some(packet),
            Err(e) => {
                debug!("TrackReader: read ended: {}", e);
                None
            }
        },
    }
}

pub async fn read_video(track: Arc<TrackRemote>, inbound: InboundSink, cancel: CancellationToken) {
    info!("TrackReader: video track {} ({})", track.id(), track.codec().capability.mime_type);

    let mut decoder = match H264Decoder::new() {
        Ok(decoder) => decoder,
        Err(e) => {
            error!("TrackReader: cannot create H.264 decoder: {}", e);
            let _ = forward(&inbound, InboundEvent::TrackEnded(MediaKind::Video), &cancel).await;
            return;
        }
    };
    let mut depacketizer = H264Depacketizer::new();
    let mut timeline = RtpTimeline::default();
    let mut frames = 0u64;

    'read: while let Some(packet) = next_packet(&track, &cancel).await {
        let header = &packet.header;
        let ticks = timeline.ticks(header.timestamp);
        let Some(unit) = depacketizer.push(
            header.sequence_number,
            header.timestamp,
            header.marker,
            &packet.payload,
        ) else {
            continue;
        };

        for picture in decoder.decode(&unit.data, ticks as i64) {
            let pts = Timestamp::from_rtp(picture.pts.max(0) as u64, RTP_VIDEO_CLOCK_RATE);
            let frame = VideoFrame::new(picture.data, picture.width, picture.height, pts);
            if !forward(&inbound, InboundEvent::Frame(Frame::Video(frame)), &cancel).await {
                break 'read;
            }
            frames += 1;
            if frames == 1 {
                info!("TrackReader: first video frame {}x{}", picture.width, picture.height);
            }
        }
    }

    info!("TrackReader: video track ended after {} frames", frames);
    let _ = forward(&inbound, InboundEvent::TrackEnded(MediaKind::Video), &cancel).await;
}

pub async fn read_audio(track: Arc<TrackRemote>, inbound: InboundSink, cancel: CancellationToken) {
    info!("TrackReader: audio track {} ({})", track.id(), track.codec().capability.mime_type);

    let mut decoder = match OpusDecoder::new() {
        Ok(decoder) => decoder,
        Err(e) => {
            error!("TrackReader: cannot create Opus decoder: {}", e);
            let _ = forward(&inbound, InboundEvent::TrackEnded(MediaKind::Audio), &cancel).await;
            return;
        }
    };
    let mut timeline = RtpTimeline::default();
    let mut frames = 0u64;

    while let Some(packet) = next_packet(&track, &cancel).await {
        let ticks = timeline.ticks(packet.header.timestamp);
        if packet.payload.is_empty() {
            continue;
        }

        let samples = decoder.decode(&packet.payload);
        if samples.is_empty() {
            continue;
        }

        let pts = Timestamp::from_rtp(ticks, RTP_AUDIO_CLOCK_RATE);
        let frame = AudioFrame::new(samples, OUTPUT_SAMPLE_RATE, OUTPUT_CHANNELS, pts);
        if !forward(&inbound, InboundEvent::Frame(Frame::Audio(frame)), &cancel).await {
            break;
        }
        frames += 1;
    }

    info!("TrackReader: audio track ended after {} frames", frames);
    if !forward(&inbound, InboundEvent::TrackEnded(MediaKind::Audio), &cancel).await {
        warn!("TrackReader: audio end not delivered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_starts_at_zero() {
        let mut timeline = RtpTimeline::default();
        assert_eq!(timeline.ticks(123_456), 0);
        assert_eq!(timeline.ticks(123_456 + 3000), 3000);
        assert_eq!(timeline.ticks(123_456 + 6000), 6000);
    }

    #[test]
    fn test_timeline_unwraps() {
        let mut timeline = RtpTimeline::default();
        let start = u32::MAX - 1500;
        assert_eq!(timeline.ticks(start), 0);
        assert_eq!(timeline.ticks(1499), 3000);
        assert_eq!(timeline.ticks(4499), 6000);
    }

    #[test]
    fn test_timeline_tolerates_reordering() {
        let mut timeline = RtpTimeline::default();
        timeline.ticks(10_000);
        assert_eq!(timeline.ticks(13_000), 3000);
        // a late packet from just before does not count as a wrap
        assert_eq!(timeline.ticks(12_000), 2000);
        assert_eq!(timeline.ticks(16_000), 6000);
    }
}
