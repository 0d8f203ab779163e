//! v4l2loopback module verification and frame capture.
//!
//! The bridge only ever talks to loopback devices created with
//! `modprobe v4l2loopback video_nr=<ids>`. Before opening a device we check
//! the module's sysfs tree so a missing module or an unenrolled ID fails
//! with the exact modprobe command the operator needs to run.

use crate::config::StreamProfile;
use crate::errors::{BridgeError, Result};
use crate::types::{DeviceSummary, StreamFormat, VideoFrame};
use std::path::{Path, PathBuf};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::FourCC;

/// Number of mmap buffers in the capture queue.
const CAPTURE_BUFFERS: u32 = 4;

/// The modprobe invocation that enrolls a device ID.
pub fn modprobe_hint(id: u32) -> String {
    format!("sudo modprobe v4l2loopback video_nr={}", id)
}

/// Handle on the v4l2loopback kernel module's sysfs tree.
///
/// The sysfs root is a field so tests can point it at a fake tree.
#[derive(Debug, Clone)]
pub struct LoopbackModule {
    sysfs_root: PathBuf,
}

impl Default for LoopbackModule {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/module/v4l2loopback"),
        }
    }
}

impl LoopbackModule {
    pub fn at<P: AsRef<Path>>(sysfs_root: P) -> Self {
        Self {
            sysfs_root: sysfs_root.as_ref().to_path_buf(),
        }
    }

    /// Whether the kernel module is loaded.
    pub fn is_loaded(&self) -> bool {
        self.sysfs_root.is_dir()
    }

    /// Device IDs enrolled via the module's `video_nr` parameter.
    pub fn enrolled_ids(&self) -> Result<Vec<u32>> {
        let param = self.sysfs_root.join("parameters/video_nr");
        let raw = std::fs::read_to_string(&param).map_err(|e| {
            BridgeError::Device(format!("failed to read {}: {}", param.display(), e))
        })?;

        let mut ids = Vec::new();
        for part in raw.trim().split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let id = part.parse::<u32>().map_err(|_| {
                BridgeError::Device(format!("unparseable video_nr entry '{}'", part))
            })?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Verify the module is loaded and `id` is enrolled.
    ///
    /// Error messages carry the modprobe command so the operator can fix
    /// the setup without digging further.
    pub fn verify(&self, id: u32) -> Result<()> {
        if !self.is_loaded() {
            return Err(BridgeError::ModuleNotLoaded(format!(
                "{} missing, run: {}",
                self.sysfs_root.display(),
                modprobe_hint(id)
            )));
        }

        let ids = self.enrolled_ids()?;
        if !ids.contains(&id) {
            return Err(BridgeError::NotEnrolled(format!(
                "device {} not in enrolled set {:?}, check the video_nr parameter ({})",
                id,
                ids,
                modprobe_hint(id)
            )));
        }

        Ok(())
    }
}

/// An opened loopback capture device with a negotiated format.
pub struct LoopbackDevice {
    dev: v4l::Device,
    path: String,
    summary: DeviceSummary,
    format: StreamFormat,
}

impl LoopbackDevice {
    /// Open `/dev/video<id>` and negotiate the profile's capture format.
    pub fn open(id: u32, profile: &StreamProfile) -> Result<Self> {
        let path = format!("/dev/video{}", id);
        let dev = v4l::Device::with_path(&path)
            .map_err(|e| BridgeError::Device(format!("failed to open {}: {}", path, e)))?;

        let caps = dev
            .query_caps()
            .map_err(|e| BridgeError::Device(format!("QUERYCAP failed on {}: {}", path, e)))?;

        let summary = DeviceSummary {
            path: path.clone(),
            driver: caps.driver.clone(),
            card: caps.card.clone(),
            video_capture: caps
                .capabilities
                .contains(v4l::capability::Flags::VIDEO_CAPTURE),
            read_write: caps.capabilities.contains(v4l::capability::Flags::READWRITE),
            streaming: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };

        log::info!(
            "Opened {}: driver '{}' card '{}' capture={} read_write={} streaming={}",
            path,
            summary.driver,
            summary.card,
            summary.video_capture,
            summary.read_write,
            summary.streaming
        );

        if !summary.usable() {
            return Err(BridgeError::Device(format!(
                "{} does not support video capture streaming",
                path
            )));
        }

        let mut device = Self {
            dev,
            path,
            summary,
            format: StreamFormat::new(profile.width, profile.height, profile.fps),
        };
        device.negotiate_format(profile)?;
        Ok(device)
    }

    /// Request YUYV at the profile resolution and accept what the driver
    /// reports back. A non-YUYV reply is fatal: YUYV is the only device-side
    /// format the bridge forwards.
    fn negotiate_format(&mut self, profile: &StreamProfile) -> Result<()> {
        let current = self
            .dev
            .format()
            .map_err(|e| BridgeError::Device(format!("G_FMT failed on {}: {}", self.path, e)))?;
        log::debug!(
            "{} current format: {}x{} {}",
            self.path,
            current.width,
            current.height,
            fourcc_str(&current.fourcc)
        );

        let wanted = v4l::Format::new(profile.width, profile.height, FourCC::new(b"YUYV"));
        let got = self
            .dev
            .set_format(&wanted)
            .map_err(|e| BridgeError::Device(format!("S_FMT failed on {}: {}", self.path, e)))?;

        if got.fourcc != FourCC::new(b"YUYV") {
            return Err(BridgeError::Device(format!(
                "{} negotiated {} instead of YUYV",
                self.path,
                fourcc_str(&got.fourcc)
            )));
        }

        if got.width != profile.width || got.height != profile.height {
            log::warn!(
                "{} adjusted resolution {}x{} -> {}x{}",
                self.path,
                profile.width,
                profile.height,
                got.width,
                got.height
            );
        }

        self.format = StreamFormat::new(got.width, got.height, profile.fps);
        log::info!("{} negotiated format: {}", self.path, self.format);
        Ok(())
    }

    pub fn summary(&self) -> &DeviceSummary {
        &self.summary
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Grab a single frame, for probing and snapshots.
    pub fn capture_one(&mut self) -> Result<VideoFrame> {
        let mut stream = Stream::with_buffers(&mut self.dev, Type::VideoCapture, CAPTURE_BUFFERS)
            .map_err(|e| {
                BridgeError::Capture(format!("failed to map buffers on {}: {}", self.path, e))
            })?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| BridgeError::Capture(format!("dequeue failed on {}: {}", self.path, e)))?;

        frame_from_buffer(buf, meta.bytesused as usize, &self.format, &self.path, 0)
    }

    /// Convert this device into a running frame source.
    ///
    /// Capture I/O is blocking, so it runs on its own thread; frames arrive
    /// on a bounded channel. Dropping the receiver stops the thread.
    pub fn into_frames(self) -> FrameReceiver {
        let (tx, rx) = tokio::sync::mpsc::channel::<Result<VideoFrame>>(CAPTURE_BUFFERS as usize);
        let format = self.format.clone();
        let path = self.path.clone();
        let mut dev = self.dev;

        let handle = std::thread::Builder::new()
            .name("loopcast-capture".to_string())
            .spawn(move || {
                let mut stream =
                    match Stream::with_buffers(&mut dev, Type::VideoCapture, CAPTURE_BUFFERS) {
                        Ok(s) => s,
                        Err(e) => {
                            let _ = tx.blocking_send(Err(BridgeError::Capture(format!(
                                "failed to map buffers on {}: {}",
                                path, e
                            ))));
                            return;
                        }
                    };

                let mut sequence = 0u64;
                loop {
                    let result = match stream.next() {
                        Ok((buf, meta)) => frame_from_buffer(
                            buf,
                            meta.bytesused as usize,
                            &format,
                            &path,
                            sequence,
                        ),
                        Err(e) => Err(BridgeError::Capture(format!(
                            "dequeue failed on {}: {}",
                            path, e
                        ))),
                    };
                    sequence += 1;

                    // Receiver gone means the stream was stopped
                    if tx.blocking_send(result).is_err() {
                        log::debug!("Capture thread for {} stopping", path);
                        return;
                    }
                }
            })
            .expect("failed to spawn capture thread");

        FrameReceiver {
            rx,
            format,
            _handle: handle,
        }
    }
}

/// Receiving side of a running capture thread.
pub struct FrameReceiver {
    rx: tokio::sync::mpsc::Receiver<Result<VideoFrame>>,
    format: StreamFormat,
    _handle: std::thread::JoinHandle<()>,
}

impl FrameReceiver {
    /// Await the next frame. `None` means the capture thread exited.
    pub async fn recv(&mut self) -> Option<Result<VideoFrame>> {
        self.rx.recv().await
    }

    /// Blocking variant for non-async callers.
    pub fn recv_blocking(&mut self) -> Option<Result<VideoFrame>> {
        self.rx.blocking_recv()
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }
}

fn frame_from_buffer(
    buf: &[u8],
    bytesused: usize,
    format: &StreamFormat,
    path: &str,
    sequence: u64,
) -> Result<VideoFrame> {
    let len = bytesused.min(buf.len());
    let expected = format.yuyv_size();
    if len != expected {
        return Err(BridgeError::Capture(format!(
            "{} delivered {} bytes, expected {} for {}",
            path, len, expected, format
        )));
    }

    Ok(
        VideoFrame::new(buf[..len].to_vec(), format.width, format.height, path.to_string())
            .with_fourcc(format.fourcc.clone())
            .with_sequence(sequence),
    )
}

fn fourcc_str(fourcc: &FourCC) -> String {
    String::from_utf8_lossy(&fourcc.repr).into_owned()
}
