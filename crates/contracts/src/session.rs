//! SessionConfig - Config Loader output
//!
//! Describes a complete tracking session: connection buffers, requested
//! policies, transport source and notification routing.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{ConnectionConfig, PolicyFlag, PolicyMask};

/// Configuration version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete session configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SessionConfig {
    #[serde(default)]
    pub version: ConfigVersion,

    /// Buffer sizes and timing
    #[serde(default)]
    #[validate(nested)]
    pub connection: ConnectionConfig,

    /// Policies requested right after start
    #[serde(default)]
    pub policies: Vec<PolicyFlag>,

    /// Configuration keys queried right after start
    #[serde(default)]
    pub query_keys: Vec<String>,

    /// Event source
    #[validate(nested)]
    pub transport: TransportConfig,

    /// Notification routing
    #[serde(default)]
    #[validate(nested)]
    pub sinks: Vec<SinkConfig>,
}

impl SessionConfig {
    /// Requested policies as a mask
    pub fn policy_mask(&self) -> PolicyMask {
        self.policies.iter().copied().collect()
    }
}

/// Transport type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// In-process generator
    #[default]
    Mock,
    /// JSONL capture playback
    Replay,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mock => "mock",
            Self::Replay => "replay",
        }
    }
}

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,

    /// Mock generator frame rate (Hz)
    #[serde(default = "default_framerate_hz")]
    #[validate(range(min = 1.0, max = 1000.0))]
    pub framerate_hz: f64,

    /// Mock image width (pixels)
    #[serde(default = "default_image_width")]
    #[validate(range(min = 1, max = 8192))]
    pub image_width: u32,

    /// Mock image height (pixels)
    #[serde(default = "default_image_height")]
    #[validate(range(min = 1, max = 8192))]
    pub image_height: u32,

    /// Mock calibration version attached to images
    #[serde(default = "default_calibration_version")]
    pub calibration_version: u64,

    /// Capture file, required for `replay`
    #[serde(default)]
    pub replay_path: Option<PathBuf>,

    /// Playback speed multiplier
    #[serde(default = "default_replay_speed")]
    #[validate(range(min = 0.01, max = 100.0))]
    pub replay_speed: f64,

    /// Restart playback at end of capture
    #[serde(default)]
    pub replay_loop: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Mock,
            framerate_hz: default_framerate_hz(),
            image_width: default_image_width(),
            image_height: default_image_height(),
            calibration_version: default_calibration_version(),
            replay_path: None,
            replay_speed: default_replay_speed(),
            replay_loop: false,
        }
    }
}

fn default_framerate_hz() -> f64 {
    90.0
}

fn default_image_width() -> u32 {
    640
}

fn default_image_height() -> u32 {
    240
}

fn default_calibration_version() -> u64 {
    1
}

fn default_replay_speed() -> f64 {
    1.0
}

/// Sink output configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SinkConfig {
    #[validate(length(min = 1))]
    pub name: String,

    pub sink_type: SinkType,

    /// Queue capacity
    #[serde(default = "default_queue_capacity")]
    #[validate(range(min = 1))]
    pub queue_capacity: usize,

    /// Type-specific parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

fn default_queue_capacity() -> usize {
    100
}

/// Sink type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkType {
    /// Log output
    Log,
    /// JSONL file output
    File,
}
