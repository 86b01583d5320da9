//! Outbound audio ingest
//!
//! Splits caller PCM16 buffers of any length into units no larger than the
//! transport's packet size and forwards them strictly in submission order.

use bytes::{Bytes, BytesMut};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::health::SessionHealth;
use crate::assets::{INPUT_BYTES_PER_SAMPLE, INPUT_SAMPLE_RATE};
use crate::config::EngineOptions;
use crate::error::TransportError;
use crate::transport::Transport;

/// Wall-clock anchor for pacing
struct Pacer {
    max_lead: Duration,
    anchor: Option<Instant>,
    /// Audio duration sent since `anchor`
    sent: Duration,
}

impl Pacer {
    fn new(max_lead: Duration) -> Self {
        Self {
            max_lead,
            anchor: None,
            sent: Duration::ZERO,
        }
    }

    /// Wait until sending `unit` keeps us within `max_lead` of real time
    async fn admit(&mut self, unit: Duration) {
        let now = Instant::now();
        let anchor = match self.anchor {
            // caller fell behind real time: start a fresh window
            Some(anchor) if now.duration_since(anchor) > self.sent => None,
            other => other,
        };
        let anchor = anchor.unwrap_or_else(|| {
            self.sent = Duration::ZERO;
            now
        });
        self.anchor = Some(anchor);

        let ahead = self.sent.saturating_sub(now.duration_since(anchor));
        if ahead > self.max_lead {
            tokio::time::sleep(ahead - self.max_lead).await;
        }
        self.sent += unit;
    }
}

/// Re-chunks and forwards caller audio to the transport
pub struct AudioIngestPipeline {
    transport: Arc<dyn Transport>,
    health: Arc<SessionHealth>,
    unit_bytes: usize,
    /// Trailing half-sample from the previous call
    carry: Option<u8>,
    pacer: Option<Pacer>,
}

impl AudioIngestPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        options: &EngineOptions,
        health: Arc<SessionHealth>,
    ) -> Self {
        Self {
            transport,
            health,
            // whole samples only
            unit_bytes: (options.audio_unit_bytes.max(INPUT_BYTES_PER_SAMPLE) / INPUT_BYTES_PER_SAMPLE)
                * INPUT_BYTES_PER_SAMPLE,
            carry: None,
            pacer: options.max_audio_lead.map(Pacer::new),
        }
    }

    /// Split `chunk` into whole-sample units of at most `unit_bytes`.
    ///
    /// An odd trailing byte is held back and prefixed to the next call so a
    /// sample is never split across units.
    pub fn rechunk(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        let mut buf = BytesMut::with_capacity(chunk.len() + 1);
        if let Some(byte) = self.carry.take() {
            buf.extend_from_slice(&[byte]);
        }
        buf.extend_from_slice(chunk);

        if buf.len() % INPUT_BYTES_PER_SAMPLE != 0 {
            let last = buf.len() - 1;
            self.carry = Some(buf[last]);
            buf.truncate(last);
        }

        let data = buf.freeze();
        (0..data.len())
            .step_by(self.unit_bytes)
            .map(|start| data.slice(start..(start + self.unit_bytes).min(data.len())))
            .collect()
    }

    /// Forward one caller buffer; returns the number of units sent.
    ///
    /// Stops at the first unit the transport refuses and reports it; units
    /// already accepted stay sent.
    pub async fn send(&mut self, chunk: &[u8]) -> Result<usize, TransportError> {
        let units = self.rechunk(chunk);
        let count = units.len();

        for unit in units {
            if let Some(pacer) = self.pacer.as_mut() {
                pacer.admit(unit_duration(unit.len())).await;
            }

            let len = unit.len();
            if let Err(e) = self.transport.send_audio_unit(unit).await {
                self.health.record_send_failure();
                warn!("AudioIngest: transport refused audio unit: {}", e);
                return Err(e);
            }
            self.health.record_audio_unit(len);
        }

        debug!("AudioIngest: {} bytes forwarded as {} units", chunk.len(), count);
        Ok(count)
    }
}

/// Playback duration of `bytes` of input PCM16
pub fn unit_duration(bytes: usize) -> Duration {
    let samples = (bytes / INPUT_BYTES_PER_SAMPLE) as u64;
    Duration::from_micros(samples * 1_000_000 / INPUT_SAMPLE_RATE as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn pipeline(unit_bytes: usize, lead: Option<Duration>) -> (AudioIngestPipeline, Arc<MockTransport>) {
        let mock = Arc::new(MockTransport::new());
        let options = EngineOptions::default()
            .with_audio_unit_bytes(unit_bytes)
            .with_max_audio_lead(lead);
        let ingest = AudioIngestPipeline::new(mock.clone(), &options, Arc::new(SessionHealth::new()));
        (ingest, mock)
    }

    #[test]
    fn test_unit_duration() {
        assert_eq!(unit_duration(6000), Duration::from_micros(187_500));
        assert_eq!(unit_duration(32_000), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_order_preserved_for_any_chunk_sizes() {
        let (mut ingest, mock) = pipeline(6000, None);

        let sizes = [1, 5999, 6000, 6001, 12_345, 2, 0, 17];
        let mut expected = Vec::new();
        let mut next = 0u8;
        for size in sizes {
            let chunk: Vec<u8> = (0..size)
                .map(|_| {
                    next = next.wrapping_add(1);
                    next
                })
                .collect();
            expected.extend_from_slice(&chunk);
            ingest.send(&chunk).await.unwrap();
        }

        let sent = mock.sent_audio();
        // total is odd, so the final byte is still waiting for its partner
        assert_eq!(expected.len() % 2, 1);
        assert_eq!(sent[..], expected[..expected.len() - 1]);
        assert!(mock.unit_sizes().iter().all(|&s| s > 0 && s <= 6000 && s % 2 == 0));
    }

    #[tokio::test]
    async fn test_large_buffer_is_split() {
        let (mut ingest, mock) = pipeline(6000, None);
        let units = ingest.send(&vec![0u8; 15_000]).await.unwrap();

        assert_eq!(units, 3);
        assert_eq!(mock.unit_sizes(), vec![6000, 6000, 3000]);
    }

    #[test]
    fn test_odd_unit_size_rounds_to_whole_samples() {
        let options = EngineOptions {
            audio_unit_bytes: 5,
            ..Default::default()
        };
        let mut ingest =
            AudioIngestPipeline::new(Arc::new(MockTransport::new()), &options, Arc::new(SessionHealth::new()));

        let units = ingest.rechunk(&[0u8; 12]);
        let sizes: Vec<usize> = units.iter().map(|u| u.len()).collect();
        assert_eq!(sizes, vec![4, 4, 4]);
    }

    #[tokio::test]
    async fn test_refused_unit_is_reported() {
        let (mut ingest, mock) = pipeline(6000, None);
        mock.fail_sends.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = ingest.send(&[0u8; 100]).await.unwrap_err();
        assert!(matches!(err, TransportError::ChannelClosed));
        assert_eq!(ingest.health.send_failures(), 1);
        assert!(mock.units.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_bounds_lead() {
        // 1 second of audio in 0.25s units, allowed to run 0.5s ahead
        let (mut ingest, _mock) = pipeline(8000, Some(Duration::from_millis(500)));
        let start = Instant::now();

        ingest.send(&vec![0u8; 32_000]).await.unwrap();

        // the last unit may only go out once 0.75s - 0.5s of real time passed
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unpaced_sends_immediately() {
        let (mut ingest, mock) = pipeline(8000, None);
        let start = Instant::now();

        ingest.send(&vec![0u8; 320_000]).await.unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(mock.units.lock().unwrap().len(), 40);
    }
}
