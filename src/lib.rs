//! loopcast: republish a v4l2loopback video feed as a WebRTC stream.
//!
//! A loopback device (created with `modprobe v4l2loopback video_nr=<ids>`)
//! carries frames written by some producer; loopcast opens that device,
//! reads the YUYV frames, encodes them as H.264, and serves them to
//! browsers over WebRTC with a small WebSocket signaling endpoint.
//!
//! # Usage
//! ```bash
//! sudo modprobe v4l2loopback video_nr=2
//! loopcast --config streams.yaml --stream zed
//! ```
//!
//! with a catalog like:
//! ```yaml
//! streams:
//!   zed:
//!     device: 2
//!     width: 1280
//!     height: 720
//!     fps: 30
//! signaling:
//!   port: 8443
//! ```
//!
//! The heavy lifting (ICE, DTLS, SRTP, RTP packetization) is the webrtc
//! crate's job; this crate is the glue between the kernel device and that
//! stack: verification, format negotiation, conversion, encoding, pacing.

pub mod config;
pub mod convert;
pub mod device;
pub mod errors;
pub mod signaling;
pub mod timing;
pub mod types;
pub mod webrtc;

// Re-exports for convenience
pub use config::{StreamCatalog, StreamProfile};
pub use device::{LoopbackDevice, LoopbackModule};
pub use errors::{BridgeError, Result};
pub use types::{DeviceSummary, StreamFormat, VideoFrame};
pub use crate::webrtc::{LoopbackStreamer, StreamConfig, ViewerHub};
