//! Scriptable in-memory transport for tests

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::{ControlMessage, InboundSink, Transport};
use crate::config::SessionConfig;
use crate::error::TransportError;

#[derive(Default)]
pub struct MockTransport {
    pub units: Mutex<Vec<Bytes>>,
    pub controls: Mutex<Vec<ControlMessage>>,
    pub inbound: Mutex<Option<InboundSink>>,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    /// connect() fails with a rejected handshake
    pub fail_connect: AtomicBool,
    /// every send_audio_unit() fails
    pub fail_sends: AtomicBool,
    /// connect() sleeps this long before answering
    pub connect_delay: Mutex<Option<Duration>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_connect() -> Self {
        let mock = Self::new();
        mock.fail_connect.store(true, Ordering::SeqCst);
        mock
    }

    pub fn with_connect_delay(delay: Duration) -> Self {
        let mock = Self::new();
        *mock.connect_delay.lock().unwrap() = Some(delay);
        mock
    }

    pub fn sink(&self) -> InboundSink {
        self.inbound
            .lock()
            .unwrap()
            .clone()
            .expect("transport not connected")
    }

    pub fn sent_audio(&self) -> Vec<u8> {
        self.units
            .lock()
            .unwrap()
            .iter()
            .flat_map(|u| u.iter().copied())
            .collect()
    }

    pub fn unit_sizes(&self) -> Vec<usize> {
        self.units.lock().unwrap().iter().map(|u| u.len()).collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(
        &self,
        _config: &SessionConfig,
        inbound: InboundSink,
    ) -> Result<(), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::HandshakeRejected("mock".into()));
        }
        self.inbound.lock().unwrap().replace(inbound);
        Ok(())
    }

    async fn send_audio_unit(&self, unit: Bytes) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::ChannelClosed);
        }
        self.units.lock().unwrap().push(unit);
        Ok(())
    }

    async fn send_control(&self, message: ControlMessage) -> Result<(), TransportError> {
        self.controls.lock().unwrap().push(message);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inbound.lock().unwrap().take();
        Ok(())
    }
}
