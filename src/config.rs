//! Stream catalog configuration.
//!
//! A YAML file maps stream names to loopback device IDs and capture
//! profiles, plus the signaling listen address. The node is launched with a
//! catalog path and a stream name; everything else is derived from the
//! selected profile.

use crate::errors::{BridgeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Highest device number v4l2loopback will accept for `video_nr`.
pub const MAX_LOOPBACK_ID: u32 = 99;

/// Root configuration: named streams plus signaling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamCatalog {
    pub streams: BTreeMap<String, StreamProfile>,
    #[serde(default)]
    pub signaling: SignalingConfig,
}

/// Per-stream capture profile keyed by stream name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamProfile {
    /// Loopback device number (`/dev/video<device>`)
    pub device: u32,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Output frame rate cap; 0 forwards every frame unthrottled
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Optional human-readable label for logs and stats
    #[serde(default)]
    pub label: Option<String>,
}

/// Signaling server listen settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_width() -> u32 {
    1280
}

fn default_height() -> u32 {
    720
}

fn default_fps() -> u32 {
    30
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8443
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

impl Default for StreamCatalog {
    fn default() -> Self {
        let mut streams = BTreeMap::new();
        streams.insert(
            "default".to_string(),
            StreamProfile {
                device: 0,
                width: default_width(),
                height: default_height(),
                fps: default_fps(),
                label: None,
            },
        );
        Self {
            streams,
            signaling: SignalingConfig::default(),
        }
    }
}

impl StreamCatalog {
    /// Load a catalog from a YAML file.
    ///
    /// Unlike `load_or_default`, an explicitly given path that does not
    /// exist is an error: the operator asked for that file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let catalog: StreamCatalog = serde_yaml::from_str(&contents).map_err(|e| {
            BridgeError::Config(format!("failed to parse {}: {}", path.display(), e))
        })?;

        catalog.validate()?;
        log::info!(
            "Loaded stream catalog from {} ({} streams)",
            path.display(),
            catalog.streams.len()
        );
        Ok(catalog)
    }

    /// Save the catalog as YAML.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BridgeError::Config(format!("failed to create config directory: {}", e))
            })?;
        }

        let yaml = serde_yaml::to_string(self)
            .map_err(|e| BridgeError::Config(format!("failed to serialize catalog: {}", e)))?;

        fs::write(path, yaml).map_err(|e| {
            BridgeError::Config(format!("failed to write {}: {}", path.display(), e))
        })?;

        log::info!("Saved stream catalog to {}", path.display());
        Ok(())
    }

    /// Default catalog location.
    pub fn default_path() -> PathBuf {
        PathBuf::from("loopcast.yaml")
    }

    /// Load from the default location, falling back to defaults if missing.
    pub fn load_or_default() -> Self {
        let path = Self::default_path();
        if !path.exists() {
            log::info!("No catalog at {}, using defaults", path.display());
            return Self::default();
        }
        Self::load_from_file(&path).unwrap_or_else(|e| {
            log::warn!("Failed to load catalog, using defaults: {}", e);
            Self::default()
        })
    }

    /// Look up a stream by name.
    ///
    /// Unknown names list the available streams so the operator can see
    /// what the catalog actually contains.
    pub fn select(&self, name: &str) -> Result<&StreamProfile> {
        self.streams.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.streams.keys().map(String::as_str).collect();
            BridgeError::Config(format!(
                "stream '{}' not in catalog (available: {})",
                name,
                known.join(", ")
            ))
        })
    }

    /// Validate catalog values.
    pub fn validate(&self) -> Result<()> {
        if self.streams.is_empty() {
            return Err(BridgeError::Config("catalog defines no streams".to_string()));
        }

        for (name, profile) in &self.streams {
            if profile.device > MAX_LOOPBACK_ID {
                return Err(BridgeError::Config(format!(
                    "stream '{}': device {} exceeds loopback maximum {}",
                    name, profile.device, MAX_LOOPBACK_ID
                )));
            }
            if profile.width == 0 || profile.height == 0 {
                return Err(BridgeError::Config(format!(
                    "stream '{}': invalid resolution {}x{}",
                    name, profile.width, profile.height
                )));
            }
            if profile.width % 2 != 0 || profile.height % 2 != 0 {
                return Err(BridgeError::Config(format!(
                    "stream '{}': resolution {}x{} must be even for 4:2:0 encoding",
                    name, profile.width, profile.height
                )));
            }
            if profile.fps > 240 {
                return Err(BridgeError::Config(format!(
                    "stream '{}': fps {} out of range (0-240)",
                    name, profile.fps
                )));
            }
        }

        Ok(())
    }
}

impl StreamProfile {
    /// Device node path for this profile.
    pub fn device_path(&self) -> String {
        format!("/dev/video{}", self.device)
    }

    /// Display name: label if set, otherwise the device path.
    pub fn display_name(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.device_path())
    }
}
