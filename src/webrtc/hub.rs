use crate::errors::{BridgeError, Result};
use crate::webrtc::peer::{RtcConfig, SessionDescription, ViewerConnection};
use crate::webrtc::streaming::LoopbackStreamer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Fan-out point for one stream: tracks every connected browser viewer and
/// wires their video tracks into the streamer.
#[derive(Clone)]
pub struct ViewerHub {
    streamer: LoopbackStreamer,
    config: RtcConfig,
    viewers: Arc<RwLock<HashMap<String, Arc<ViewerConnection>>>>,
}

impl ViewerHub {
    pub fn new(streamer: LoopbackStreamer, config: RtcConfig) -> Self {
        Self {
            streamer,
            config,
            viewers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn streamer(&self) -> &LoopbackStreamer {
        &self.streamer
    }

    /// Admit a viewer: build a connection, answer its offer, attach its
    /// track, and force a keyframe so playback starts immediately.
    pub async fn join(&self, offer: SessionDescription) -> Result<(String, SessionDescription)> {
        let viewer_id = uuid::Uuid::new_v4().to_string();
        log::info!(
            "Viewer {} joining stream '{}'",
            viewer_id,
            self.streamer.stream_name()
        );

        let viewer = Arc::new(
            ViewerConnection::new(viewer_id.clone(), self.config.clone(), self.streamer.clone())
                .await?,
        );

        let answer = viewer.answer(offer).await?;

        self.streamer
            .attach_track(viewer_id.clone(), viewer.track())
            .await;
        self.viewers
            .write()
            .await
            .insert(viewer_id.clone(), viewer);

        log::info!(
            "Viewer {} joined stream '{}' ({} viewers)",
            viewer_id,
            self.streamer.stream_name(),
            self.viewer_count().await
        );

        Ok((viewer_id, answer))
    }

    /// Remove a viewer and detach its track.
    pub async fn leave(&self, viewer_id: &str) -> Result<()> {
        let viewer = self.viewers.write().await.remove(viewer_id).ok_or_else(|| {
            BridgeError::WebRtc(format!("viewer {} not connected", viewer_id))
        })?;

        self.streamer.detach_track(viewer_id).await;
        if let Err(e) = viewer.close().await {
            log::warn!("Error closing viewer {}: {}", viewer_id, e);
        }

        log::info!(
            "Viewer {} left stream '{}' ({} viewers)",
            viewer_id,
            self.streamer.stream_name(),
            self.viewer_count().await
        );
        Ok(())
    }

    pub async fn get_viewer(&self, viewer_id: &str) -> Option<Arc<ViewerConnection>> {
        self.viewers.read().await.get(viewer_id).cloned()
    }

    pub async fn viewer_count(&self) -> usize {
        self.viewers.read().await.len()
    }

    pub async fn viewer_ids(&self) -> Vec<String> {
        self.viewers.read().await.keys().cloned().collect()
    }

    /// Drop viewers whose connections have failed or closed.
    pub async fn cleanup_stale(&self) {
        let stale: Vec<String> = {
            let viewers = self.viewers.read().await;
            let mut stale = Vec::new();
            for (id, viewer) in viewers.iter() {
                if !viewer.is_healthy().await {
                    stale.push(id.clone());
                }
            }
            stale
        };

        for id in stale {
            log::info!("Cleaning up stale viewer {}", id);
            if let Err(e) = self.leave(&id).await {
                log::warn!("Failed to clean up viewer {}: {}", id, e);
            }
        }
    }

    /// Disconnect every viewer and stop the stream.
    pub async fn close_all(&self) {
        log::info!(
            "Closing all viewers of stream '{}'",
            self.streamer.stream_name()
        );

        let drained: Vec<(String, Arc<ViewerConnection>)> =
            self.viewers.write().await.drain().collect();
        for (id, viewer) in drained {
            self.streamer.detach_track(&id).await;
            if let Err(e) = viewer.close().await {
                log::warn!("Error closing viewer {}: {}", id, e);
            }
        }

        self.streamer.stop_streaming().await;
    }

    pub async fn get_stats(&self) -> HubStats {
        let viewers = self.viewers.read().await;
        let mut states = Vec::with_capacity(viewers.len());
        for viewer in viewers.values() {
            states.push(viewer.get_stats().await);
        }

        HubStats {
            stream_name: self.streamer.stream_name().to_string(),
            viewer_count: states.len(),
            streaming: self.streamer.is_streaming().await,
            viewers: states,
        }
    }
}

/// Aggregate hub statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubStats {
    pub stream_name: String,
    pub viewer_count: usize,
    pub streaming: bool,
    pub viewers: Vec<crate::webrtc::peer::ViewerStats>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::streaming::StreamConfig;

    fn test_hub() -> ViewerHub {
        let streamer = LoopbackStreamer::new("test".to_string(), StreamConfig::default());
        ViewerHub::new(streamer, RtcConfig::default())
    }

    #[tokio::test]
    async fn test_empty_hub() {
        let hub = test_hub();
        assert_eq!(hub.viewer_count().await, 0);
        assert!(hub.viewer_ids().await.is_empty());

        let stats = hub.get_stats().await;
        assert_eq!(stats.stream_name, "test");
        assert_eq!(stats.viewer_count, 0);
        assert!(!stats.streaming);
    }

    #[tokio::test]
    async fn test_leave_unknown_viewer() {
        let hub = test_hub();
        let err = hub.leave("nobody").await.unwrap_err();
        assert!(err.to_string().contains("nobody"));
    }

    #[tokio::test]
    async fn test_close_all_idempotent_on_empty() {
        let hub = test_hub();
        hub.close_all().await;
        assert_eq!(hub.viewer_count().await, 0);
    }
}
