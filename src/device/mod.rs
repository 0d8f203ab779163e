//! Loopback device access: kernel module verification, device open,
//! format negotiation, and the frame source.

pub mod loopback;

pub use loopback::{FrameReceiver, LoopbackDevice, LoopbackModule};

use crate::config::MAX_LOOPBACK_ID;

/// Check if any V4L2 device node is present on the system.
pub fn is_v4l2_available() -> bool {
    std::path::Path::new("/dev/video0").exists() || !list_video_devices().is_empty()
}

/// List all /dev/video* nodes up to the loopback ID ceiling.
pub fn list_video_devices() -> Vec<String> {
    let mut devices = Vec::new();

    for i in 0..=MAX_LOOPBACK_ID {
        let device_path = format!("/dev/video{}", i);
        if std::path::Path::new(&device_path).exists() {
            devices.push(device_path);
        }
    }

    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_video_devices_paths() {
        for path in list_video_devices() {
            assert!(path.starts_with("/dev/video"));
            let num: u32 = path.strip_prefix("/dev/video").unwrap().parse().unwrap();
            assert!(num <= MAX_LOOPBACK_ID);
        }
    }
}
