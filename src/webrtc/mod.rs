pub mod hub;
pub mod peer;
/// Loopback-to-WebRTC streaming module
///
/// Reads frames from the loopback capture source, encodes them, and feeds
/// the resulting samples to every connected viewer's video track.
pub mod streaming;

pub use hub::ViewerHub;
pub use peer::{IceCandidate, RtcConfig, SessionDescription, ViewerConnection};
pub use streaming::{LoopbackStreamer, StreamConfig, StreamMode};
