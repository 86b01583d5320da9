//! WebRTC transport to the remote renderer
//!
//! Session setup runs in three steps: an HTTP call that registers the
//! session and returns a token, a receive-only peer connection, and a
//! signaling socket that carries the offer/answer exchange. After the
//! handshake the same socket carries outbound audio (binary frames) and
//! control messages (text frames).

mod api;
mod peer;
mod signaling;
mod track;

use async_trait::async_trait;
use async_tungstenite::tungstenite::Message;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

pub use self::api::{SessionApi, default_ice_servers};
pub use self::signaling::RemoteMessage;
pub use self::track::RtpTimeline;

use self::peer::ReceiverPeer;
use self::signaling::SharedSink;
use super::{ControlMessage, InboundSink, Transport};
use crate::config::{SessionConfig, WebRtcOptions};
use crate::error::TransportError;

/// Everything a connected transport holds
struct Link {
    peer: ReceiverPeer,
    sink: SharedSink,
    cancel: CancellationToken,
}

/// A peer whose handshake has not finished yet.
///
/// Dropping it (the connect future was abandoned on timeout or stop) cancels
/// its tasks and closes the peer connection in the background.
struct PendingPeer {
    peer: ReceiverPeer,
    cancel: CancellationToken,
    armed: bool,
}

impl PendingPeer {
    fn new(peer: ReceiverPeer, cancel: CancellationToken) -> Self {
        Self {
            peer,
            cancel,
            armed: true,
        }
    }

    fn peer(&self) -> &ReceiverPeer {
        &self.peer
    }

    /// The handshake completed; the caller owns the peer from here on
    fn disarm(mut self) -> ReceiverPeer {
        self.armed = false;
        self.peer.clone()
    }

    /// Tear the peer down now instead of on drop
    async fn release(mut self) {
        self.armed = false;
        self.cancel.cancel();
        self.peer.close().await;
    }
}

impl Drop for PendingPeer {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.cancel.cancel();
        let peer = self.peer.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("WebRtc: handshake abandoned, closing peer");
                handle.spawn(async move { peer.close().await });
            }
            Err(_) => warn!("WebRtc: handshake abandoned outside a runtime, peer left open"),
        }
    }
}

pub struct WebRtcTransport {
    options: WebRtcOptions,
    api: SessionApi,
    link: Mutex<Option<Arc<Link>>>,
}

impl WebRtcTransport {
    pub fn new(options: WebRtcOptions) -> Self {
        Self {
            api: SessionApi::new(options.api_url.clone()),
            options,
            link: Mutex::new(None),
        }
    }

    fn link(&self) -> Result<Arc<Link>, TransportError> {
        let link = match self.link.lock() {
            Ok(link) => link.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        link.ok_or(TransportError::NotConnected)
    }

    fn take_link(&self) -> Option<Arc<Link>> {
        match self.link.lock() {
            Ok(mut link) => link.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    async fn negotiate(
        &self,
        config: &SessionConfig,
        inbound: InboundSink,
    ) -> Result<Link, TransportError> {
        let token = self.api.start_session(config).await?;

        let ice_servers = if self.options.use_turn_server {
            self.api.ice_servers(&config.api_key).await?
        } else {
            default_ice_servers()
        };

        let cancel = CancellationToken::new();
        let pending = PendingPeer::new(ReceiverPeer::new(ice_servers).await?, cancel.clone());
        pending.peer().route_tracks(inbound.clone(), cancel.clone());

        let result = async {
            let peer = pending.peer();
            let offer = peer.create_offer().await?;
            let url = format!("{}/StartWebRTCSession", self.options.ws_url());
            let (mut sink, mut source) = StreamExt::split(signaling::open(&url).await?);

            let answer = signaling::handshake(&mut sink, &mut source, &offer, &token).await?;
            peer.set_answer(answer).await?;
            Ok::<_, TransportError>((sink, source))
        }
        .await;

        let (sink, source) = match result {
            Ok(socket) => socket,
            Err(e) => {
                pending.release().await;
                return Err(e);
            }
        };
        let peer = pending.disarm();

        let sink: SharedSink = Arc::new(AsyncMutex::new(sink));
        tokio::spawn(signaling::control_loop(source, inbound, cancel.clone()));
        if self.options.latency_interval > 0 {
            tokio::spawn(signaling::ping_loop(
                sink.clone(),
                Duration::from_secs(self.options.latency_interval),
                cancel.clone(),
            ));
        }

        Ok(Link { peer, sink, cancel })
    }
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn connect(
        &self,
        config: &SessionConfig,
        inbound: InboundSink,
    ) -> Result<(), TransportError> {
        if self.link().is_ok() {
            return Err(TransportError::Signaling("already connected".into()));
        }

        let link = self.negotiate(config, inbound).await?;
        info!("WebRtc: session established");

        match self.link.lock() {
            Ok(mut slot) => slot.replace(Arc::new(link)),
            Err(poisoned) => poisoned.into_inner().replace(Arc::new(link)),
        };
        Ok(())
    }

    async fn send_audio_unit(&self, unit: Bytes) -> Result<(), TransportError> {
        let link = self.link()?;
        link.sink
            .lock()
            .await
            .send(Message::binary(unit))
            .await
            .map_err(TransportError::from)
    }

    async fn send_control(&self, message: ControlMessage) -> Result<(), TransportError> {
        let link = self.link()?;
        signaling::send_text(&link.sink, message.to_wire()).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        let Some(link) = self.take_link() else {
            debug!("WebRtc: close on an idle transport");
            return Ok(());
        };

        if let Err(e) = signaling::send_text(&link.sink, signaling::DONE).await {
            debug!("WebRtc: DONE not delivered: {}", e);
        }
        link.cancel.cancel();
        if let Err(e) = link.sink.lock().await.close().await {
            warn!("WebRtc: signaling close: {}", e);
        }
        link.peer.close().await;
        info!("WebRtc: closed");
        Ok(())
    }
}
