use crate::convert;
use crate::device::FrameReceiver;
use crate::errors::{BridgeError, Result};
use crate::timing::{FrameThrottle, PTSClock};
use crate::types::VideoFrame;
use bytes::Bytes;
use openh264::encoder::{Encoder, FrameType};
use openh264::formats::YUVBuffer;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Keyframe cadence in seconds of stream time.
const KEYFRAME_INTERVAL_SECS: u64 = 2;

/// Stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Target bitrate in bps
    pub bitrate: u32,
    /// Output frame rate cap; 0 forwards at the device rate
    pub max_fps: u32,
    /// Stream width
    pub width: u32,
    /// Stream height
    pub height: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bitrate: 2_000_000, // 2 Mbps
            max_fps: 30,
            width: 1280,
            height: 720,
        }
    }
}

/// Frame source mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamMode {
    /// Read from the loopback device
    Device,
    /// Generate a deterministic test pattern, for offline runs
    SyntheticTest,
}

/// An H.264 access unit ready for delivery.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub timestamp_ms: u64,
    pub keyframe: bool,
    pub width: u32,
    pub height: u32,
}

/// H.264 encoder for the forwarding loop.
///
/// Wraps openh264 and tracks geometry so the streamer can rebuild it when
/// the device changes resolution mid-stream.
pub struct H264Encoder {
    encoder: Encoder,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl H264Encoder {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let encoder = Encoder::new()
            .map_err(|e| BridgeError::Encoding(format!("failed to create H.264 encoder: {}", e)))?;

        Ok(Self {
            encoder,
            width,
            height,
            frame_count: 0,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Encode one I420 frame to an H.264 access unit.
    pub fn encode_i420(&mut self, i420: Vec<u8>, timestamp_ms: u64) -> Result<EncodedFrame> {
        let expected = (self.width * self.height * 3 / 2) as usize;
        if i420.len() != expected {
            return Err(BridgeError::Encoding(format!(
                "I420 buffer is {} bytes, expected {} for {}x{}",
                i420.len(),
                expected,
                self.width,
                self.height
            )));
        }

        let yuv = YUVBuffer::from_vec(i420, self.width as usize, self.height as usize);
        let bitstream = self
            .encoder
            .encode(&yuv)
            .map_err(|e| BridgeError::Encoding(format!("H.264 encoding failed: {}", e)))?;

        self.frame_count += 1;
        let keyframe = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);

        Ok(EncodedFrame {
            data: bitstream.to_vec(),
            timestamp_ms,
            keyframe,
            width: self.width,
            height: self.height,
        })
    }

    /// Force the next frame to be a keyframe.
    pub fn force_keyframe(&mut self) {
        self.encoder.force_intra_frame();
    }
}

#[derive(Debug, Default)]
struct FrameCounters {
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

/// Forwarding loop: loopback frames in, H.264 samples out.
#[derive(Clone)]
pub struct LoopbackStreamer {
    stream_name: String,
    config: Arc<RwLock<StreamConfig>>,
    frame_sender: Arc<broadcast::Sender<EncodedFrame>>,
    is_streaming: Arc<RwLock<bool>>,
    paused: Arc<RwLock<bool>>,
    mode: Arc<RwLock<StreamMode>>,
    tracks: Arc<RwLock<Vec<(String, Arc<TrackLocalStaticSample>)>>>,
    keyframe_requested: Arc<AtomicBool>,
    failure_count: Arc<RwLock<u32>>,
    max_failures: u32,
    counters: Arc<FrameCounters>,
    clock: PTSClock,
}

impl LoopbackStreamer {
    pub fn new(stream_name: String, config: StreamConfig) -> Self {
        let (frame_sender, _) = broadcast::channel(64);

        Self {
            stream_name,
            config: Arc::new(RwLock::new(config)),
            frame_sender: Arc::new(frame_sender),
            is_streaming: Arc::new(RwLock::new(false)),
            paused: Arc::new(RwLock::new(false)),
            mode: Arc::new(RwLock::new(StreamMode::Device)),
            tracks: Arc::new(RwLock::new(Vec::new())),
            keyframe_requested: Arc::new(AtomicBool::new(false)),
            failure_count: Arc::new(RwLock::new(0)),
            max_failures: 10,
            counters: Arc::new(FrameCounters::default()),
            clock: PTSClock::new(),
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    /// Start forwarding frames from a device capture source.
    pub async fn start_streaming(&self, source: FrameReceiver) -> Result<()> {
        self.mark_started(StreamMode::Device).await?;
        log::info!(
            "Starting stream '{}' from {}",
            self.stream_name,
            source.format()
        );

        let streamer = self.clone();
        tokio::spawn(async move {
            streamer.device_loop(source).await;
        });

        Ok(())
    }

    /// Start the synthetic test-pattern loop instead of a device.
    pub async fn start_synthetic(&self) -> Result<()> {
        self.mark_started(StreamMode::SyntheticTest).await?;
        log::info!("Starting stream '{}' in synthetic test mode", self.stream_name);

        let streamer = self.clone();
        tokio::spawn(async move {
            streamer.synthetic_loop().await;
        });

        Ok(())
    }

    async fn mark_started(&self, mode: StreamMode) -> Result<()> {
        let mut is_streaming = self.is_streaming.write().await;
        if *is_streaming {
            return Err(BridgeError::Stream(format!(
                "stream '{}' already active",
                self.stream_name
            )));
        }
        *is_streaming = true;
        *self.mode.write().await = mode;
        *self.failure_count.write().await = 0;
        Ok(())
    }

    /// Stop the forwarding loop.
    pub async fn stop_streaming(&self) {
        let mut is_streaming = self.is_streaming.write().await;
        if *is_streaming {
            log::info!("Stopping stream '{}'", self.stream_name);
            *is_streaming = false;
        }
    }

    pub async fn is_streaming(&self) -> bool {
        *self.is_streaming.read().await
    }

    /// Pause sample delivery without stopping capture.
    pub async fn pause(&self) {
        *self.paused.write().await = true;
        log::info!("Stream '{}' paused", self.stream_name);
    }

    pub async fn resume(&self) {
        *self.paused.write().await = false;
        log::info!("Stream '{}' resumed", self.stream_name);
    }

    pub async fn get_config(&self) -> StreamConfig {
        self.config.read().await.clone()
    }

    pub async fn mode(&self) -> StreamMode {
        self.mode.read().await.clone()
    }

    /// Subscribe to encoded frames (stats pages, recorders, tests).
    pub fn subscribe_frames(&self) -> broadcast::Receiver<EncodedFrame> {
        self.frame_sender.subscribe()
    }

    /// Attach a viewer's video track; its samples start at the next keyframe.
    pub async fn attach_track(&self, viewer_id: String, track: Arc<TrackLocalStaticSample>) {
        self.tracks.write().await.push((viewer_id.clone(), track));
        self.request_keyframe();
        log::info!(
            "Attached track for viewer {} to stream '{}'",
            viewer_id,
            self.stream_name
        );
    }

    /// Detach a viewer's track.
    pub async fn detach_track(&self, viewer_id: &str) {
        let mut tracks = self.tracks.write().await;
        let before = tracks.len();
        tracks.retain(|(id, _)| id != viewer_id);
        if tracks.len() != before {
            log::info!(
                "Detached track for viewer {} from stream '{}'",
                viewer_id,
                self.stream_name
            );
        }
    }

    pub async fn track_count(&self) -> usize {
        self.tracks.read().await.len()
    }

    /// Ask the encoder for a keyframe on the next frame.
    pub fn request_keyframe(&self) {
        self.keyframe_requested.store(true, Ordering::Relaxed);
    }

    pub async fn get_stats(&self) -> StreamStats {
        let config = self.get_config().await;
        StreamStats {
            stream_name: self.stream_name.clone(),
            is_active: self.is_streaming().await,
            paused: *self.paused.read().await,
            mode: self.mode().await,
            target_bitrate: config.bitrate,
            max_fps: config.max_fps,
            resolution: (config.width, config.height),
            frames_forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            frames_dropped: self.counters.dropped.load(Ordering::Relaxed),
            subscribers: self.frame_sender.receiver_count(),
            viewer_tracks: self.track_count().await,
        }
    }

    async fn handle_failure(&self, err: &BridgeError) -> bool {
        let mut count = self.failure_count.write().await;
        *count += 1;
        if *count > self.max_failures {
            log::error!(
                "Stream '{}': {} consecutive failures, giving up (last: {})",
                self.stream_name,
                *count,
                err
            );
            *self.is_streaming.write().await = false;
            true
        } else {
            log::warn!("Stream '{}' failure {}: {}", self.stream_name, *count, err);
            false
        }
    }

    async fn reset_failures(&self) {
        *self.failure_count.write().await = 0;
    }

    /// Read, throttle, convert, encode, deliver.
    async fn device_loop(&self, mut source: FrameReceiver) {
        let config = self.get_config().await;
        let mut throttle = FrameThrottle::new(config.max_fps);
        let mut encoder: Option<H264Encoder> = None;

        while self.is_streaming().await {
            let frame = match source.recv().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    if self.handle_failure(&e).await {
                        break;
                    }
                    continue;
                }
                None => {
                    log::error!(
                        "Stream '{}': capture source closed, stopping",
                        self.stream_name
                    );
                    *self.is_streaming.write().await = false;
                    break;
                }
            };

            if throttle.should_drop() {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let i420 = match convert::yuyv_to_i420(&frame.data, frame.width, frame.height) {
                Ok(i420) => i420,
                Err(e) => {
                    if self.handle_failure(&e).await {
                        break;
                    }
                    continue;
                }
            };

            if let Err(e) = self
                .encode_and_deliver(&mut encoder, &frame, i420, throttle.measured_fps())
                .await
            {
                if self.handle_failure(&e).await {
                    break;
                }
                continue;
            }

            self.reset_failures().await;

            if frame.sequence % 300 == 0 {
                log::debug!(
                    "Stream '{}': seq {} at {:.0} fps",
                    self.stream_name,
                    frame.sequence,
                    throttle.measured_fps()
                );
            }
        }

        log::info!("Stream '{}' loop ended", self.stream_name);
    }

    /// Generate and deliver the moving test pattern at the configured rate.
    async fn synthetic_loop(&self) {
        let config = self.get_config().await;
        let fps = config.max_fps.max(1);
        let mut encoder: Option<H264Encoder> = None;
        let mut counter = 0u64;
        let mut ticker = tokio::time::interval(Duration::from_millis(1000 / fps as u64));

        while self.is_streaming().await {
            ticker.tick().await;

            let frame = synthetic_frame(counter, config.width, config.height);
            counter += 1;

            let i420 = match convert::rgb_to_i420(&frame.data, frame.width, frame.height) {
                Ok(i420) => i420,
                Err(e) => {
                    if self.handle_failure(&e).await {
                        break;
                    }
                    continue;
                }
            };

            if let Err(e) = self
                .encode_and_deliver(&mut encoder, &frame, i420, fps as f64)
                .await
            {
                if self.handle_failure(&e).await {
                    break;
                }
                continue;
            }

            self.reset_failures().await;
        }

        log::info!("Stream '{}' synthetic loop ended", self.stream_name);
    }

    async fn encode_and_deliver(
        &self,
        encoder: &mut Option<H264Encoder>,
        frame: &VideoFrame,
        i420: Vec<u8>,
        measured_fps: f64,
    ) -> Result<()> {
        // (Re)build the encoder when geometry appears or changes
        let rebuild = match encoder {
            Some(enc) => enc.width() != frame.width || enc.height() != frame.height,
            None => true,
        };
        if rebuild {
            log::info!(
                "Stream '{}': encoder for {}x{}",
                self.stream_name,
                frame.width,
                frame.height
            );
            *encoder = Some(H264Encoder::new(frame.width, frame.height)?);
            self.keyframe_requested.store(true, Ordering::Relaxed);
        }
        let enc = encoder.as_mut().expect("encoder just initialized");

        let cadence_frames = {
            let fps = self.get_config().await.max_fps.max(1) as u64;
            fps * KEYFRAME_INTERVAL_SECS
        };
        if self.keyframe_requested.swap(false, Ordering::Relaxed)
            || enc.frame_count % cadence_frames == 0
        {
            enc.force_keyframe();
        }

        // Stream-relative monotonic timestamp, not wall clock
        let timestamp_ms = (self.clock.pts() * 1000.0) as u64;
        let encoded = enc.encode_i420(i420, timestamp_ms)?;
        self.counters.forwarded.fetch_add(1, Ordering::Relaxed);

        // Skipped access units (encoder warm-up) carry no payload
        if encoded.data.is_empty() {
            return Ok(());
        }

        if self.frame_sender.send(encoded.clone()).is_err() {
            log::trace!("Stream '{}': no frame subscribers", self.stream_name);
        }

        if *self.paused.read().await {
            return Ok(());
        }

        let fps = if measured_fps > 1.0 {
            measured_fps
        } else {
            self.get_config().await.max_fps.max(1) as f64
        };
        let sample = Sample {
            data: Bytes::from(encoded.data),
            duration: Duration::from_secs_f64(1.0 / fps),
            ..Default::default()
        };

        let tracks = self.tracks.read().await;
        for (viewer_id, track) in tracks.iter() {
            if let Err(e) = track.write_sample(&sample).await {
                log::warn!(
                    "Stream '{}': write to viewer {} failed: {}",
                    self.stream_name,
                    viewer_id,
                    e
                );
            }
        }

        Ok(())
    }
}

/// Deterministic moving test pattern: RGB color bars with a scrolling band.
fn synthetic_frame(counter: u64, width: u32, height: u32) -> VideoFrame {
    const BARS: [[u8; 3]; 7] = [
        [235, 235, 235],
        [235, 235, 16],
        [16, 235, 235],
        [16, 235, 16],
        [235, 16, 235],
        [235, 16, 16],
        [16, 16, 235],
    ];

    let w = width as usize;
    let h = height as usize;
    let mut data = vec![0u8; w * h * 3];
    let band = (counter as usize * 4) % h;

    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) * 3;
            let color = BARS[x * BARS.len() / w];
            if y >= band && y < band + 8 {
                data[idx] = 16;
                data[idx + 1] = 16;
                data[idx + 2] = 16;
            } else {
                data[idx..idx + 3].copy_from_slice(&color);
            }
        }
    }

    VideoFrame::new(data, width, height, "synthetic".to_string())
        .with_fourcc("RGB3".to_string())
        .with_sequence(counter)
}

/// Stream statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStats {
    pub stream_name: String,
    pub is_active: bool,
    pub paused: bool,
    pub mode: StreamMode,
    pub target_bitrate: u32,
    pub max_fps: u32,
    pub resolution: (u32, u32),
    pub frames_forwarded: u64,
    pub frames_dropped: u64,
    pub subscribers: usize,
    pub viewer_tracks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_streamer_creation() {
        let streamer = LoopbackStreamer::new("zed".to_string(), StreamConfig::default());

        assert!(!streamer.is_streaming().await);
        assert_eq!(streamer.stream_name(), "zed");
        assert_eq!(streamer.track_count().await, 0);
    }

    #[tokio::test]
    async fn test_synthetic_start_stop() {
        let config = StreamConfig {
            width: 64,
            height: 48,
            max_fps: 30,
            ..StreamConfig::default()
        };
        let streamer = LoopbackStreamer::new("test".to_string(), config);

        streamer.start_synthetic().await.unwrap();
        assert!(streamer.is_streaming().await);
        assert_eq!(streamer.mode().await, StreamMode::SyntheticTest);

        // A second start on the live stream is rejected
        assert!(streamer.start_synthetic().await.is_err());

        streamer.stop_streaming().await;
        assert!(!streamer.is_streaming().await);
    }

    #[tokio::test]
    async fn test_synthetic_frames_reach_subscribers() {
        let config = StreamConfig {
            width: 64,
            height: 48,
            max_fps: 60,
            ..StreamConfig::default()
        };
        let streamer = LoopbackStreamer::new("test".to_string(), config);
        let mut rx = streamer.subscribe_frames();

        streamer.start_synthetic().await.unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no frame within timeout")
            .expect("broadcast closed");
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert!(!frame.data.is_empty());

        streamer.stop_streaming().await;
    }

    #[tokio::test]
    async fn test_stats_reflect_state() {
        let streamer = LoopbackStreamer::new("stats".to_string(), StreamConfig::default());

        let stats = streamer.get_stats().await;
        assert_eq!(stats.stream_name, "stats");
        assert!(!stats.is_active);
        assert_eq!(stats.subscribers, 0);

        let _rx = streamer.subscribe_frames();
        let stats = streamer.get_stats().await;
        assert_eq!(stats.subscribers, 1);
    }

    #[tokio::test]
    async fn test_pause_resume() {
        let streamer = LoopbackStreamer::new("p".to_string(), StreamConfig::default());
        streamer.pause().await;
        assert!(streamer.get_stats().await.paused);
        streamer.resume().await;
        assert!(!streamer.get_stats().await.paused);
    }

    #[test]
    fn test_synthetic_frame_geometry() {
        let frame = synthetic_frame(0, 64, 48);
        assert_eq!(frame.data.len(), 64 * 48 * 3);
        assert_eq!(frame.fourcc, "RGB3");

        // Pattern moves over time
        let later = synthetic_frame(5, 64, 48);
        assert_ne!(frame.data, later.data);
    }

    #[test]
    fn test_encoder_rejects_wrong_size() {
        let mut encoder = H264Encoder::new(64, 48).unwrap();
        assert!(encoder.encode_i420(vec![0u8; 10], 0).is_err());
    }
}
