//! Tracking snapshots and the frames assembled from them.
//!
//! ## Time Model
//! - Timestamps are transport clock microseconds (`Transport::now()`)
//! - Frame ids increase monotonically per connection

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Image, TrackedQuad};

/// Identifier of a capture instant, shared by tracking data, images and quads.
pub type FrameId = i64;

/// Tracking snapshot as delivered by the transport.
///
/// Hand geometry is carried opaquely in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub frame_id: FrameId,
    /// Capture timestamp (microseconds)
    pub timestamp: i64,
    #[serde(default)]
    pub tracking_frame_id: i64,
    #[serde(default)]
    pub framerate: f32,
    #[serde(default)]
    pub hand_count: u32,
    #[serde(default)]
    pub payload: Bytes,
}

/// One correlated capture instant.
///
/// Mutable only while pending; once released it is shared as `Arc<Frame>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub id: FrameId,
    pub timestamp: i64,
    pub tracking_frame_id: i64,
    pub framerate: f32,
    pub hand_count: u32,
    pub payload: Bytes,
    /// Attached images, at most one per (kind, perspective)
    pub images: Vec<Image>,
    pub tracked_quad: Option<TrackedQuad>,
}

impl Frame {
    /// Whether a valid planar surface is attached
    pub fn has_valid_quad(&self) -> bool {
        self.tracked_quad.as_ref().is_some_and(|q| q.valid)
    }
}

impl From<TrackingEvent> for Frame {
    fn from(event: TrackingEvent) -> Self {
        Self {
            id: event.frame_id,
            timestamp: event.timestamp,
            tracking_frame_id: event.tracking_frame_id,
            framerate: event.framerate,
            hand_count: event.hand_count,
            payload: event.payload,
            images: Vec::new(),
            tracked_quad: None,
        }
    }
}

/// Why a pending frame left the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseReason {
    /// Every enabled capability was present
    Complete,
    /// Pending timeout elapsed first
    TimedOut,
}

impl ReleaseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::TimedOut => "timed_out",
        }
    }
}
