//! Events flowing into (from the transport) and out of (to the application)
//! a connection.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    ConfigValue, DeviceFailureStatus, DeviceInfo, FailedDevice, Frame, Image, ImageCompletion,
    ImageRequest, Perspective, PolicyMask, ReleaseReason, TrackedQuad, TrackingEvent,
    TransportStatus,
};

/// Severity of a log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSeverity {
    #[default]
    Unknown,
    Information,
    Warning,
    Critical,
}

/// Log message from the transport or about transport health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    #[serde(default)]
    pub severity: LogSeverity,
    pub timestamp: i64,
    pub message: String,
}

/// Event decoded from the transport wire format.
///
/// Also the record format of replay captures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportEvent {
    Connection,
    ConnectionLost,
    Device(DeviceInfo),
    DeviceLost {
        handle: u64,
    },
    DeviceFailure {
        #[serde(default)]
        handle: Option<u64>,
        status: DeviceFailureStatus,
    },
    Tracking(TrackingEvent),
    ImageRequest(ImageRequest),
    ImageComplete(ImageCompletion),
    TrackedQuad(TrackedQuad),
    Log(LogMessage),
    PolicyChange {
        current: PolicyMask,
    },
    ConfigChange {
        request_id: u32,
        status: bool,
    },
    ConfigResponse {
        request_id: u32,
        value: ConfigValue,
    },
    /// Event type this side has no decoder for
    Unknown {
        code: u32,
    },
}

impl TransportEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::ConnectionLost => "connection_lost",
            Self::Device(_) => "device",
            Self::DeviceLost { .. } => "device_lost",
            Self::DeviceFailure { .. } => "device_failure",
            Self::Tracking(_) => "tracking",
            Self::ImageRequest(_) => "image_request",
            Self::ImageComplete(_) => "image_complete",
            Self::TrackedQuad(_) => "tracked_quad",
            Self::Log(_) => "log",
            Self::PolicyChange { .. } => "policy_change",
            Self::ConfigChange { .. } => "config_change",
            Self::ConfigResponse { .. } => "config_response",
            Self::Unknown { .. } => "unknown",
        }
    }
}

/// Result of one bounded poll of the transport
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Event(TransportEvent),
    /// Nothing arrived within the timeout
    Timeout,
    /// The transport lost its service connection
    Disconnected,
    /// Poll itself failed with a status code
    Failed(TransportStatus),
}

/// Notification delivered to connection observers
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Poll loop started
    Init,
    Connected,
    ConnectionLost,
    DeviceConnected(DeviceInfo),
    DeviceLost(DeviceInfo),
    DeviceFailure(FailedDevice),
    PolicyChanged {
        previous: PolicyMask,
        current: PolicyMask,
    },
    FrameReady {
        frame: Arc<Frame>,
        reason: ReleaseReason,
    },
    ImageComplete(Image),
    TrackedQuad(TrackedQuad),
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
    Log(LogMessage),
}

impl ConnectionEvent {
    /// Stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Connected => "connected",
            Self::ConnectionLost => "connection_lost",
            Self::DeviceConnected(_) => "device_connected",
            Self::DeviceLost(_) => "device_lost",
            Self::DeviceFailure(_) => "device_failure",
            Self::PolicyChanged { .. } => "policy_changed",
            Self::FrameReady { .. } => "frame_ready",
            Self::ImageComplete(_) => "image_complete",
            Self::TrackedQuad(_) => "tracked_quad",
            Self::CalibrationChanged { .. } => "calibration_changed",
            Self::ConfigChanged { .. } => "config_changed",
            Self::ConfigResponse { .. } => "config_response",
            Self::Log(_) => "log",
        }
    }

    /// Frame id the notification refers to, if any
    pub fn frame_id(&self) -> Option<i64> {
        match self {
            Self::FrameReady { frame, .. } => Some(frame.id),
            Self::ImageComplete(image) => Some(image.frame_id),
            Self::TrackedQuad(quad) => Some(quad.frame_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ImageKind, PolicyFlag};

    #[test]
    fn test_transport_event_tagging() {
        let json = r#"{"type":"policy_change","current":6}"#;
        let event: TransportEvent = serde_json::from_str(json).unwrap();
        match event {
            TransportEvent::PolicyChange { current } => {
                assert!(current.contains(PolicyFlag::Images));
                assert!(current.contains(PolicyFlag::OptimizeHmd));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_image_request_tagging() {
        let event = TransportEvent::ImageRequest(ImageRequest {
            token: 1,
            frame_id: 5,
            perspective: Perspective::Left,
            kind: ImageKind::Processed,
            width: 2,
            height: 2,
            bytes_per_pixel: 1,
        });
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.starts_with(r#"{"type":"image_request""#));
        let back: TransportEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind(), "image_request");
    }
}
