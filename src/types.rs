//! Core frame and format types shared across the bridge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw video frame read from the loopback device (or synthesized).
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Unique frame ID
    pub id: String,
    /// Raw pixel data in the format named by `fourcc`
    pub data: Vec<u8>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel format as a FourCC string ("YUYV", "RGB3", ...)
    pub fourcc: String,
    /// Wall-clock capture timestamp
    pub timestamp: DateTime<Utc>,
    /// Device the frame came from ("/dev/video2", "synthetic")
    pub device: String,
    /// Monotonic per-stream sequence number
    pub sequence: u64,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, device: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            data,
            width,
            height,
            fourcc: "YUYV".to_string(),
            timestamp: Utc::now(),
            device,
            sequence: 0,
        }
    }

    pub fn with_fourcc(mut self, fourcc: String) -> Self {
        self.fourcc = fourcc;
        self
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Size of the pixel payload in bytes.
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Capture format requested from (or reported by) a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub fourcc: String,
}

impl StreamFormat {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps,
            fourcc: "YUYV".to_string(),
        }
    }

    pub fn with_fourcc(mut self, fourcc: String) -> Self {
        self.fourcc = fourcc;
        self
    }

    /// Expected buffer size for one YUYV frame of this geometry.
    pub fn yuyv_size(&self) -> usize {
        (self.width * self.height * 2) as usize
    }
}

impl std::fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}@{} {}",
            self.width, self.height, self.fps, self.fourcc
        )
    }
}

/// Capability summary for an opened device, for operator diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub path: String,
    pub driver: String,
    pub card: String,
    pub video_capture: bool,
    pub read_write: bool,
    pub streaming: bool,
}

impl DeviceSummary {
    /// True when the device can be used as a capture source by the bridge.
    pub fn usable(&self) -> bool {
        self.video_capture && (self.streaming || self.read_write)
    }
}
