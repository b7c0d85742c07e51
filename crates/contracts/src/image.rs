//! Stereo images and the two-phase capture that produces them.
//!
//! Capture handshake:
//! 1. transport announces an [`ImageRequest`]
//! 2. the connection checks a pool slot out and hands its buffer over
//! 3. transport returns the filled buffer inside an [`ImageCompletion`]

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{CalibrationEntry, FrameId};

/// Camera perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perspective {
    Left,
    Right,
}

impl Perspective {
    /// Dense index, `Left = 0`, `Right = 1`
    pub fn index(self) -> usize {
        match self {
            Self::Left => 0,
            Self::Right => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// Processed (rectified IR) or raw sensor image
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    Processed,
    Raw,
}

impl ImageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Raw => "raw",
        }
    }
}

/// Largest image buffer a request may ask for (64 MiB)
pub const MAX_IMAGE_BYTES: usize = 64 * 1024 * 1024;

/// Handle of a checked-out pool slot.
///
/// `index` is stable and reused; `generation` changes on every checkout, so a
/// completion carrying an old generation is detectably stale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotHandle {
    pub index: u32,
    pub generation: u64,
}

/// First phase of an image capture: the transport asks for a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRequest {
    /// Opaque transport token, echoed back in the completion
    pub token: u64,
    pub frame_id: FrameId,
    pub perspective: Perspective,
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u8,
}

impl ImageRequest {
    /// Buffer size the transport will write.
    ///
    /// `None` when the dimensions overflow or exceed [`MAX_IMAGE_BYTES`].
    pub fn size_bytes(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.bytes_per_pixel as usize)
            .filter(|&size| size <= MAX_IMAGE_BYTES)
    }
}

/// Second phase of an image capture: the buffer comes back filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCompletion {
    pub token: u64,
    /// Slot the buffer was checked out from; set by the transport on hand-back
    #[serde(default)]
    pub slot: SlotHandle,
    pub frame_id: FrameId,
    #[serde(default)]
    pub sequence_id: u64,
    pub timestamp: i64,
    pub perspective: Perspective,
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u8,
    pub calibration_version: u64,
    /// Distortion coefficients accompanying this version
    #[serde(default)]
    pub distortion: Vec<f32>,
    #[serde(with = "serde_bytes", default)]
    pub pixels: Vec<u8>,
}

/// A completed image.
///
/// Pixels are shared; the pool reclaims the allocation once the last clone is
/// gone and the slot is checked out again.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub frame_id: FrameId,
    pub sequence_id: u64,
    pub timestamp: i64,
    pub perspective: Perspective,
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u8,
    pub pixels: Arc<Vec<u8>>,
    pub calibration: Arc<CalibrationEntry>,
}

impl Image {
    pub fn calibration_version(&self) -> u64 {
        self.calibration.version
    }

    /// Ordering key: kind first, then perspective
    pub fn slot_key(&self) -> (ImageKind, Perspective) {
        (self.kind, self.perspective)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_size() {
        let req = ImageRequest {
            token: 1,
            frame_id: 10,
            perspective: Perspective::Left,
            kind: ImageKind::Processed,
            width: 640,
            height: 240,
            bytes_per_pixel: 1,
        };
        assert_eq!(req.size_bytes(), Some(640 * 240));
    }

    #[test]
    fn test_oversized_request_has_no_size() {
        let req = ImageRequest {
            token: 1,
            frame_id: 10,
            perspective: Perspective::Left,
            kind: ImageKind::Raw,
            width: u32::MAX,
            height: u32::MAX,
            bytes_per_pixel: u8::MAX,
        };
        assert_eq!(req.size_bytes(), None);

        let just_over = ImageRequest {
            width: 8193,
            height: 8192,
            bytes_per_pixel: 1,
            ..req
        };
        assert_eq!(just_over.size_bytes(), None);
    }

    #[test]
    fn test_completion_json_without_pixels() {
        let json = r#"{
            "token": 7, "frame_id": 3, "timestamp": 100,
            "perspective": "right", "kind": "raw",
            "width": 4, "height": 2, "bytes_per_pixel": 1,
            "calibration_version": 9
        }"#;
        let completion: ImageCompletion = serde_json::from_str(json).unwrap();
        assert_eq!(completion.perspective, Perspective::Right);
        assert_eq!(completion.slot, SlotHandle::default());
        assert!(completion.pixels.is_empty());
    }
}
