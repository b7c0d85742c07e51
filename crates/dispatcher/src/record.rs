//! Serializable summaries of outward notifications.
//!
//! Pixel data and tracking payloads are summarized (sizes, versions), never
//! copied into a record.

use contracts::{
    ConfigValue, ConnectionEvent, DeviceFailureStatus, FrameId, Image, ImageKind, LogSeverity,
    Perspective, ReleaseReason,
};
use serde::Serialize;

/// Image metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRecord {
    pub frame_id: FrameId,
    pub sequence_id: u64,
    pub perspective: Perspective,
    pub kind: ImageKind,
    pub width: u32,
    pub height: u32,
    pub calibration_version: u64,
    pub bytes: usize,
}

impl From<&Image> for ImageRecord {
    fn from(image: &Image) -> Self {
        Self {
            frame_id: image.frame_id,
            sequence_id: image.sequence_id,
            perspective: image.perspective,
            kind: image.kind,
            width: image.width,
            height: image.height,
            calibration_version: image.calibration_version(),
            bytes: image.pixels.len(),
        }
    }
}

/// One notification as written by sinks
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventRecord {
    Init,
    Connected,
    ConnectionLost,
    DeviceConnected {
        handle: u64,
        serial: String,
    },
    DeviceLost {
        handle: u64,
        serial: String,
    },
    DeviceFailure {
        status: DeviceFailureStatus,
        message: String,
        serial: String,
    },
    PolicyChanged {
        previous: String,
        current: String,
    },
    FrameReady {
        frame_id: FrameId,
        timestamp: i64,
        reason: ReleaseReason,
        hand_count: u32,
        payload_bytes: usize,
        images: Vec<ImageRecord>,
        tracked_quad_valid: bool,
    },
    ImageComplete(ImageRecord),
    TrackedQuad {
        frame_id: FrameId,
        valid: bool,
        visible: bool,
    },
    CalibrationChanged {
        perspective: Perspective,
        previous: Option<u64>,
        current: u64,
    },
    ConfigChanged {
        key: String,
        status: bool,
        request_id: u32,
    },
    ConfigResponse {
        key: String,
        value: ConfigValue,
        request_id: u32,
    },
    Log {
        severity: LogSeverity,
        timestamp: i64,
        message: String,
    },
}

impl From<&ConnectionEvent> for EventRecord {
    fn from(event: &ConnectionEvent) -> Self {
        match event {
            ConnectionEvent::Init => Self::Init,
            ConnectionEvent::Connected => Self::Connected,
            ConnectionEvent::ConnectionLost => Self::ConnectionLost,
            ConnectionEvent::DeviceConnected(device) => Self::DeviceConnected {
                handle: device.handle,
                serial: device.serial.clone(),
            },
            ConnectionEvent::DeviceLost(device) => Self::DeviceLost {
                handle: device.handle,
                serial: device.serial.clone(),
            },
            ConnectionEvent::DeviceFailure(failed) => Self::DeviceFailure {
                status: failed.status,
                message: failed.message.clone(),
                serial: failed.serial.clone(),
            },
            ConnectionEvent::PolicyChanged { previous, current } => Self::PolicyChanged {
                previous: previous.to_string(),
                current: current.to_string(),
            },
            ConnectionEvent::FrameReady { frame, reason } => Self::FrameReady {
                frame_id: frame.id,
                timestamp: frame.timestamp,
                reason: *reason,
                hand_count: frame.hand_count,
                payload_bytes: frame.payload.len(),
                images: frame.images.iter().map(ImageRecord::from).collect(),
                tracked_quad_valid: frame.has_valid_quad(),
            },
            ConnectionEvent::ImageComplete(image) => Self::ImageComplete(image.into()),
            ConnectionEvent::TrackedQuad(quad) => Self::TrackedQuad {
                frame_id: quad.frame_id,
                valid: quad.valid,
                visible: quad.visible,
            },
            ConnectionEvent::CalibrationChanged {
                perspective,
                previous,
                current,
            } => Self::CalibrationChanged {
                perspective: *perspective,
                previous: *previous,
                current: *current,
            },
            ConnectionEvent::ConfigChanged {
                key,
                status,
                request_id,
            } => Self::ConfigChanged {
                key: key.clone(),
                status: *status,
                request_id: *request_id,
            },
            ConnectionEvent::ConfigResponse {
                key,
                value,
                request_id,
            } => Self::ConfigResponse {
                key: key.clone(),
                value: value.clone(),
                request_id: *request_id,
            },
            ConnectionEvent::Log(log) => Self::Log {
                severity: log.severity,
                timestamp: log.timestamp,
                message: log.message.clone(),
            },
        }
    }
}
