//! Viewer connection tests: offer/answer against a real browser-side peer
//! built from the same webrtc stack.

use loopcast::webrtc::peer::{
    ConnectionState, RtcConfig, SdpType, SessionDescription, ViewerConnection,
};
use loopcast::webrtc::streaming::{LoopbackStreamer, StreamConfig};
use std::sync::Arc;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;

fn test_streamer() -> LoopbackStreamer {
    LoopbackStreamer::new("peer-test".to_string(), StreamConfig::default())
}

/// Host-candidates-only config so tests never wait on a STUN server.
fn offline_rtc() -> RtcConfig {
    RtcConfig {
        ice_servers: vec![],
    }
}

/// Build the browser side of the exchange: a recvonly video peer.
async fn browser_peer() -> Arc<RTCPeerConnection> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs().unwrap();
    let api = APIBuilder::new().with_media_engine(media_engine).build();
    let pc = Arc::new(
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap(),
    );
    pc.add_transceiver_from_kind(RTPCodecType::Video, None)
        .await
        .unwrap();
    pc
}

#[tokio::test]
async fn test_viewer_starts_fresh() {
    let viewer = ViewerConnection::new("fresh".to_string(), offline_rtc(), test_streamer())
        .await
        .unwrap();

    assert_eq!(viewer.connection_state().await, ConnectionState::New);
    assert!(viewer.is_healthy().await);
    assert!(viewer.local_candidates().await.is_empty());
}

#[tokio::test]
async fn test_offer_answer_exchange() {
    let viewer = ViewerConnection::new("ans".to_string(), offline_rtc(), test_streamer())
        .await
        .unwrap();

    let browser = browser_peer().await;
    let offer = browser.create_offer(None).await.unwrap();
    browser.set_local_description(offer.clone()).await.unwrap();

    let answer = viewer
        .answer(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: offer.sdp,
        })
        .await
        .unwrap();

    assert_eq!(answer.sdp_type, SdpType::Answer);
    assert!(answer.sdp.starts_with("v=0"));
    // Gathering completed before the answer was returned, so the SDP
    // carries the candidates a non-trickle page needs
    assert!(answer.sdp.contains("candidate"), "answer has no candidates");

    let stats = viewer.get_stats().await;
    assert!(stats.has_local_description);
    assert!(stats.has_remote_description);
}

#[tokio::test]
async fn test_garbage_offer_rejected() {
    let viewer = ViewerConnection::new("bad".to_string(), offline_rtc(), test_streamer())
        .await
        .unwrap();

    let result = viewer
        .answer(SessionDescription {
            sdp_type: SdpType::Offer,
            sdp: "this is not sdp".to_string(),
        })
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_track_registration_feeds_viewer() {
    let streamer = test_streamer();
    let viewer = ViewerConnection::new("track".to_string(), offline_rtc(), streamer.clone())
        .await
        .unwrap();

    streamer
        .attach_track(viewer.id().to_string(), viewer.track())
        .await;
    assert_eq!(streamer.track_count().await, 1);

    streamer.detach_track(viewer.id()).await;
    assert_eq!(streamer.track_count().await, 0);
}
