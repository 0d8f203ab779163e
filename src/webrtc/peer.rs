use crate::errors::{BridgeError, Result};
use crate::webrtc::streaming::LoopbackStreamer;
use std::sync::Arc;
use tokio::sync::RwLock;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use serde::{Deserialize, Serialize};

/// Peer connection configuration exposed to config files and signaling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtcConfig {
    pub ice_servers: Vec<IceServer>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
        }
    }
}

/// ICE server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl From<IceServer> for webrtc::ice_transport::ice_server::RTCIceServer {
    fn from(server: IceServer) -> Self {
        webrtc::ice_transport::ice_server::RTCIceServer {
            urls: server.urls,
            username: server.username.unwrap_or_default(),
            credential: server.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// Viewer connection state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New => ConnectionState::New,
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
            RTCPeerConnectionState::Unspecified => ConnectionState::New,
        }
    }
}

/// SDP (Session Description Protocol) type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

impl From<RTCSdpType> for SdpType {
    fn from(sdp_type: RTCSdpType) -> Self {
        match sdp_type {
            RTCSdpType::Offer => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            RTCSdpType::Pranswer => SdpType::Pranswer,
            RTCSdpType::Rollback => SdpType::Rollback,
            RTCSdpType::Unspecified => SdpType::Offer,
        }
    }
}

/// Session description carried over signaling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescription {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl TryFrom<SessionDescription> for RTCSessionDescription {
    type Error = BridgeError;

    fn try_from(desc: SessionDescription) -> Result<Self> {
        match desc.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(desc.sdp)
                .map_err(|e| BridgeError::WebRtc(format!("invalid SDP offer: {}", e))),
            SdpType::Answer => RTCSessionDescription::answer(desc.sdp)
                .map_err(|e| BridgeError::WebRtc(format!("invalid SDP answer: {}", e))),
            SdpType::Pranswer => RTCSessionDescription::pranswer(desc.sdp)
                .map_err(|e| BridgeError::WebRtc(format!("invalid SDP pranswer: {}", e))),
            SdpType::Rollback => Err(BridgeError::WebRtc(
                "rollback SDP type not supported".to_string(),
            )),
        }
    }
}

impl From<RTCSessionDescription> for SessionDescription {
    fn from(desc: RTCSessionDescription) -> Self {
        SessionDescription {
            sdp_type: desc.sdp_type.into(),
            sdp: desc.sdp,
        }
    }
}

/// ICE candidate carried over signaling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}

impl From<RTCIceCandidate> for IceCandidate {
    fn from(candidate: RTCIceCandidate) -> Self {
        IceCandidate {
            candidate: candidate.to_string(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }
}

/// A single browser viewer: one peer connection carrying one send-only
/// H.264 video track fed by the streamer.
pub struct ViewerConnection {
    id: String,
    peer_connection: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
    state: Arc<RwLock<ConnectionState>>,
    local_candidates: Arc<RwLock<Vec<IceCandidate>>>,
}

impl ViewerConnection {
    /// Create a viewer connection and wire its track into the streamer.
    ///
    /// Incoming RTCP is drained on a background task; a Picture Loss
    /// Indication from the browser asks the streamer for a keyframe.
    pub async fn new(id: String, config: RtcConfig, streamer: LoopbackStreamer) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| BridgeError::WebRtc(format!("failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Default::default(), &mut media_engine)
            .map_err(|e| BridgeError::WebRtc(format!("failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = webrtc::peer_connection::configuration::RTCConfiguration {
            ice_servers: config.ice_servers.into_iter().map(|s| s.into()).collect(),
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|e| BridgeError::WebRtc(format!("failed to create peer connection: {}", e)))?,
        );

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_owned(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line:
                    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                        .to_string(),
                rtcp_feedback: vec![],
            },
            "video".to_string(),
            format!("loopcast-{}", streamer.stream_name()),
        ));

        let rtp_sender = peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| BridgeError::WebRtc(format!("failed to add video track: {}", e)))?;

        // Drain RTCP so interceptors run; PLI means the viewer lost its
        // reference frame and needs a new keyframe.
        let viewer_id = id.clone();
        let pli_streamer = streamer.clone();
        tokio::spawn(async move {
            while let Ok((packets, _)) = rtp_sender.read_rtcp().await {
                for packet in packets {
                    if packet
                        .as_any()
                        .downcast_ref::<PictureLossIndication>()
                        .is_some()
                    {
                        log::debug!("Viewer {}: PLI received, forcing keyframe", viewer_id);
                        pli_streamer.request_keyframe();
                    }
                }
            }
            log::debug!("Viewer {}: RTCP reader finished", viewer_id);
        });

        let state = Arc::new(RwLock::new(ConnectionState::New));
        let state_clone = Arc::clone(&state);
        let state_id = id.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let state_clone = Arc::clone(&state_clone);
                let state_id = state_id.clone();
                Box::pin(async move {
                    log::info!("Viewer {} connection state: {}", state_id, s);
                    *state_clone.write().await = s.into();
                })
            },
        ));

        let local_candidates = Arc::new(RwLock::new(Vec::new()));
        let candidates_clone = Arc::clone(&local_candidates);
        let candidate_id = id.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let candidates_clone = Arc::clone(&candidates_clone);
            let candidate_id = candidate_id.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    log::debug!("Viewer {}: local candidate {}", candidate_id, candidate);
                    candidates_clone.write().await.push(candidate.into());
                }
            })
        }));

        Ok(Self {
            id,
            peer_connection,
            track,
            state,
            local_candidates,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The send-only video track to register with the streamer.
    pub fn track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    /// Accept a browser offer and produce the complete answer.
    ///
    /// The answer is returned only after ICE gathering finishes, so the
    /// SDP already carries every local candidate and a plain one-shot
    /// exchange works without trickle support on the page.
    pub async fn answer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        log::info!("Viewer {}: answering offer", self.id);

        let rtc_offer: RTCSessionDescription = offer.try_into()?;
        self.peer_connection
            .set_remote_description(rtc_offer)
            .await
            .map_err(|e| BridgeError::WebRtc(format!("failed to set remote offer: {}", e)))?;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| BridgeError::WebRtc(format!("failed to create answer: {}", e)))?;

        let mut gather_complete = self.peer_connection.gathering_complete_promise().await;
        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| BridgeError::WebRtc(format!("failed to set local answer: {}", e)))?;
        let _ = gather_complete.recv().await;

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| BridgeError::WebRtc("no local description after gathering".to_string()))?;

        Ok(local.into())
    }

    /// Add a trickle candidate from the browser.
    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        log::debug!("Viewer {}: remote candidate {}", self.id, candidate.candidate);

        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };

        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|e| BridgeError::WebRtc(format!("failed to add ICE candidate: {}", e)))
    }

    pub async fn local_candidates(&self) -> Vec<IceCandidate> {
        self.local_candidates.read().await.clone()
    }

    /// True while the connection is usable or still being established.
    pub async fn is_healthy(&self) -> bool {
        !matches!(
            self.connection_state().await,
            ConnectionState::Failed | ConnectionState::Closed
        )
    }

    pub async fn close(&self) -> Result<()> {
        log::info!("Closing viewer connection {}", self.id);
        self.peer_connection
            .close()
            .await
            .map_err(|e| BridgeError::WebRtc(format!("failed to close peer connection: {}", e)))
    }

    pub async fn get_stats(&self) -> ViewerStats {
        ViewerStats {
            viewer_id: self.id.clone(),
            state: self.connection_state().await,
            local_candidates: self.local_candidates.read().await.len(),
            has_local_description: self.peer_connection.local_description().await.is_some(),
            has_remote_description: self.peer_connection.remote_description().await.is_some(),
        }
    }
}

/// Per-viewer connection statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerStats {
    pub viewer_id: String,
    pub state: ConnectionState,
    pub local_candidates: usize,
    pub has_local_description: bool,
    pub has_remote_description: bool,
}
