//! WebSocket signaling: the SDP/candidate exchange that connects a browser
//! to the stream.
//!
//! One WebSocket connection is one viewer. The browser sends an `offer`,
//! the server replies with a complete (non-trickle) `answer`, and further
//! `candidate` messages from the browser are applied as they arrive.
//! Closing the socket disconnects the viewer.

use crate::config::SignalingConfig;
use crate::errors::{BridgeError, Result};
use crate::webrtc::hub::ViewerHub;
use crate::webrtc::peer::{IceCandidate, SdpType, SessionDescription};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

/// Messages from the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Offer {
        sdp: String,
    },
    Candidate {
        candidate: String,
        #[serde(default)]
        sdp_mid: Option<String>,
        #[serde(default)]
        sdp_mline_index: Option<u16>,
    },
}

/// Messages to the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Answer { viewer_id: String, sdp: String },
    Error { message: String },
}

/// WebSocket signaling server for one stream hub.
pub struct SignalingServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    hub: ViewerHub,
}

impl SignalingServer {
    /// Bind the listen socket. Port 0 picks an ephemeral port (tests).
    pub async fn bind(config: &SignalingConfig, hub: ViewerHub) -> Result<Self> {
        let addr = format!("{}:{}", config.bind, config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| BridgeError::Signaling(format!("failed to bind {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| BridgeError::Signaling(format!("no local addr: {}", e)))?;

        log::info!("Signaling server listening on ws://{}", local_addr);
        Ok(Self {
            listener,
            local_addr,
            hub,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until the shutdown flag flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            log::debug!("Signaling connection from {}", peer_addr);
                            let hub = self.hub.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, hub).await {
                                    log::warn!("Signaling connection {} ended: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            log::warn!("Accept failed: {}", e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        log::info!("Signaling server shutting down");
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, hub: ViewerHub) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| BridgeError::Signaling(format!("websocket handshake failed: {}", e)))?;
    let (mut tx, mut rx) = ws.split();

    let mut viewer_id: Option<String> = None;

    while let Some(message) = rx.next().await {
        let message =
            message.map_err(|e| BridgeError::Signaling(format!("websocket error: {}", e)))?;

        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            // Ping/pong handled by tungstenite
            _ => continue,
        };

        let reply = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(msg) => dispatch(msg, &hub, &mut viewer_id).await,
            Err(e) => Some(ServerMessage::Error {
                message: format!("unparseable message: {}", e),
            }),
        };

        if let Some(reply) = reply {
            let json = serde_json::to_string(&reply)
                .map_err(|e| BridgeError::Signaling(format!("failed to encode reply: {}", e)))?;
            tx.send(Message::Text(json))
                .await
                .map_err(|e| BridgeError::Signaling(format!("failed to send reply: {}", e)))?;
        }
    }

    // Socket gone: the viewer is gone
    if let Some(id) = viewer_id {
        if let Err(e) = hub.leave(&id).await {
            log::debug!("Viewer {} already removed: {}", id, e);
        }
    }

    Ok(())
}

async fn dispatch(
    msg: ClientMessage,
    hub: &ViewerHub,
    viewer_id: &mut Option<String>,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Offer { sdp } => {
            if viewer_id.is_some() {
                return Some(ServerMessage::Error {
                    message: "already joined on this connection".to_string(),
                });
            }

            let offer = SessionDescription {
                sdp_type: SdpType::Offer,
                sdp,
            };
            match hub.join(offer).await {
                Ok((id, answer)) => {
                    *viewer_id = Some(id.clone());
                    Some(ServerMessage::Answer {
                        viewer_id: id,
                        sdp: answer.sdp,
                    })
                }
                Err(e) => {
                    log::warn!("Join failed: {}", e);
                    Some(ServerMessage::Error {
                        message: e.to_string(),
                    })
                }
            }
        }
        ClientMessage::Candidate {
            candidate,
            sdp_mid,
            sdp_mline_index,
        } => {
            let Some(id) = viewer_id.as_ref() else {
                return Some(ServerMessage::Error {
                    message: "candidate before offer".to_string(),
                });
            };

            let Some(viewer) = hub.get_viewer(id).await else {
                return Some(ServerMessage::Error {
                    message: format!("viewer {} no longer connected", id),
                });
            };

            let result = viewer
                .add_ice_candidate(IceCandidate {
                    candidate,
                    sdp_mid,
                    sdp_mline_index,
                })
                .await;

            match result {
                Ok(()) => None,
                Err(e) => Some(ServerMessage::Error {
                    message: e.to_string(),
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_parsing() {
        let offer: ClientMessage =
            serde_json::from_str(r#"{"type":"offer","sdp":"v=0"}"#).unwrap();
        assert!(matches!(offer, ClientMessage::Offer { ref sdp } if sdp == "v=0"));

        let candidate: ClientMessage = serde_json::from_str(
            r#"{"type":"candidate","candidate":"candidate:1 1 UDP 1 10.0.0.1 5000 typ host","sdp_mid":"0"}"#,
        )
        .unwrap();
        assert!(matches!(
            candidate,
            ClientMessage::Candidate { sdp_mline_index: None, .. }
        ));
    }

    #[test]
    fn test_server_message_encoding() {
        let answer = ServerMessage::Answer {
            viewer_id: "abc".to_string(),
            sdp: "v=0".to_string(),
        };
        let json = serde_json::to_string(&answer).unwrap();
        assert!(json.contains(r#""type":"answer""#));
        assert!(json.contains(r#""viewer_id":"abc""#));

        let error = ServerMessage::Error {
            message: "nope".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains(r#""type":"error""#));
    }

    #[test]
    fn test_unknown_message_rejected() {
        let parsed = serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe"}"#);
        assert!(parsed.is_err());
    }
}
