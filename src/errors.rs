use thiserror::Error;

/// Crate-wide error type for the loopback-to-WebRTC bridge.
///
/// Failures here are surfaced to the operator as human-readable messages;
/// there is no programmatic recovery beyond the streamer's retry counter.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("v4l2loopback kernel module not loaded: {0}")]
    ModuleNotLoaded(String),

    #[error("loopback device not enrolled: {0}")]
    NotEnrolled(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("pixel format conversion error: {0}")]
    Convert(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("webrtc error: {0}")]
    WebRtc(String),

    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
