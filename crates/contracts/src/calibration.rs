//! Camera distortion calibration

use serde::{Deserialize, Serialize};

/// Distortion coefficient grid for one calibration version.
///
/// Written once per version and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub version: u64,
    /// Grid width in map points
    pub width: u32,
    /// Grid height in map points
    pub height: u32,
    /// Two coefficients per map point, row-major
    pub coefficients: Vec<f32>,
}

impl CalibrationEntry {
    /// Coefficient count implied by the grid size
    pub fn expected_len(&self) -> usize {
        2 * self.width as usize * self.height as usize
    }
}
