//! Receive-only peer connection

use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

use super::track;
use crate::assets::DATA_CHANNEL_LABEL;
use crate::error::TransportError;
use crate::transport::{InboundEvent, InboundSink};

#[derive(Clone)]
pub struct ReceiverPeer {
    connection: Arc<RTCPeerConnection>,
    _data_channel: Arc<RTCDataChannel>,
}

impl ReceiverPeer {
    /// Peer with receive-only audio and video transceivers and the control data channel
    pub async fn new(ice_servers: Vec<RTCIceServer>) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        // includes H.264 and Opus
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        let connection = Arc::new(api.new_peer_connection(config).await?);

        for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
            connection
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await?;
        }

        let data_channel = connection
            .create_data_channel(
                DATA_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await?;

        Ok(Self {
            connection,
            _data_channel: data_channel,
        })
    }

    /// Spawn a reader for every remote track; report a failed connection
    pub fn route_tracks(&self, inbound: InboundSink, cancel: CancellationToken) {
        let track_inbound = inbound.clone();
        let track_cancel = cancel.clone();
        self.connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let inbound = track_inbound.clone();
                let cancel = track_cancel.clone();
                Box::pin(async move {
                    match track.kind() {
                        RTPCodecType::Video => {
                            tokio::spawn(track::read_video(track, inbound, cancel));
                        }
                        RTPCodecType::Audio => {
                            tokio::spawn(track::read_audio(track, inbound, cancel));
                        }
                        other => warn!("Peer: ignoring track of kind {}", other),
                    }
                })
            },
        ));

        self.connection
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                info!("Peer: connection state {}", state);
                let inbound = inbound.clone();
                let cancel = cancel.clone();
                Box::pin(async move {
                    if state == RTCPeerConnectionState::Failed && !cancel.is_cancelled() {
                        let event = InboundEvent::Disconnected {
                            reason: "peer connection failed".to_string(),
                        };
                        let _ = inbound.send(event).await;
                    }
                })
            }));
    }

    /// Create the local offer and wait until ICE gathering completes.
    ///
    /// The renderer takes a single offer with every candidate inlined.
    pub async fn create_offer(&self) -> Result<RTCSessionDescription, TransportError> {
        let offer = self.connection.create_offer(None).await?;
        let mut gathered = self.connection.gathering_complete_promise().await;
        self.connection.set_local_description(offer).await?;
        let _ = gathered.recv().await;
        debug!("Peer: ICE gathering complete");

        self.connection
            .local_description()
            .await
            .ok_or_else(|| TransportError::Peer("no local description after gathering".into()))
    }

    pub async fn set_answer(&self, answer: RTCSessionDescription) -> Result<(), TransportError> {
        self.connection.set_remote_description(answer).await?;
        Ok(())
    }

    pub fn connection_state(&self) -> RTCPeerConnectionState {
        self.connection.connection_state()
    }

    pub async fn close(&self) {
        if let Err(e) = self.connection.close().await {
            debug!("Peer: close: {}", e);
        }
    }
}
