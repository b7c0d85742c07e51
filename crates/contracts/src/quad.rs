//! Planar surface ("tracked quad") detections

use serde::{Deserialize, Serialize};

use crate::FrameId;

/// Planar surface detected for a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedQuad {
    pub frame_id: FrameId,
    #[serde(default)]
    pub timestamp: i64,
    pub valid: bool,
    #[serde(default)]
    pub visible: bool,
    #[serde(default)]
    pub width: f32,
    #[serde(default)]
    pub height: f32,
    #[serde(default)]
    pub resolution_x: u32,
    #[serde(default)]
    pub resolution_y: u32,
    /// Center position (mm)
    #[serde(default)]
    pub position: [f32; 3],
    /// Orientation quaternion (x, y, z, w)
    #[serde(default = "identity_quaternion")]
    pub orientation: [f32; 4],
}

fn identity_quaternion() -> [f32; 4] {
    [0.0, 0.0, 0.0, 1.0]
}
