//! Device descriptors and failure reports

use serde::{Deserialize, Serialize};

/// Attached tracking device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Transport handle, unique while the device is attached
    pub handle: u64,
    pub serial: String,
    /// Horizontal field of view (radians)
    #[serde(default)]
    pub h_fov: f32,
    /// Vertical field of view (radians)
    #[serde(default)]
    pub v_fov: f32,
    #[serde(default)]
    pub range_mm: u32,
    #[serde(default)]
    pub baseline_mm: u32,
    #[serde(default)]
    pub embedded: bool,
    #[serde(default)]
    pub streaming: bool,
}

/// Reason a device stopped working
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFailureStatus {
    BadCalibration,
    BadControl,
    BadFirmware,
    BadTransport,
    Unknown,
}

impl DeviceFailureStatus {
    pub fn message(self) -> &'static str {
        match self {
            Self::BadCalibration => {
                "Bad Calibration. Device failed because of a bad calibration record."
            }
            Self::BadControl => {
                "Bad Control Interface. Device failed because of a USB control interface error."
            }
            Self::BadFirmware => "Bad Firmware. Device failed because of a firmware error.",
            Self::BadTransport => {
                "Bad Transport. Device failed because of a USB communication error."
            }
            Self::Unknown => "Device failed for an unknown reason",
        }
    }
}

/// Serial reported when the failing device is not known
pub const UNAVAILABLE_SERIAL: &str = "Unavailable";

/// Failure record kept for a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedDevice {
    pub status: DeviceFailureStatus,
    pub message: String,
    pub serial: String,
}
