//! Pending-frame reconciler.
//!
//! Frames wait here in arrival order until every enabled capability is
//! present, or until they age past the pending timeout. Only the head is ever
//! released, so a later frame never overtakes an earlier one.

use std::collections::VecDeque;

use contracts::{
    Frame, FrameId, Image, ImageKind, Perspective, PolicyFlag, PolicyMask, ReleaseReason,
    TrackedQuad,
};
use tracing::{instrument, trace};

/// Data a frame needs before it is complete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requirements {
    /// Processed left/right pair
    pub processed: bool,
    /// Raw left/right pair
    pub raw: bool,
    /// Valid planar surface
    pub tracked_quad: bool,
}

impl Requirements {
    /// Derive requirements from the active policy mask.
    ///
    /// Raw images ride on the image capability and are ignored without it.
    pub fn from_policy(active: PolicyMask) -> Self {
        let processed = active.contains(PolicyFlag::Images);
        Self {
            processed,
            raw: processed && active.contains(PolicyFlag::RawImages),
            tracked_quad: active.contains(PolicyFlag::TrackedQuads),
        }
    }

    /// Images a complete frame carries: 4 with raw, 2 for a processed pair
    pub fn expected_images(&self) -> usize {
        match (self.processed, self.raw) {
            (_, true) => 4,
            (true, false) => 2,
            (false, false) => 0,
        }
    }

    pub fn images_enabled(&self) -> bool {
        self.processed || self.raw
    }
}

/// A frame leaving the pending queue
#[derive(Debug, Clone)]
pub struct Released {
    pub frame: Frame,
    pub reason: ReleaseReason,
    /// `now - frame.timestamp` at release
    pub age_us: i64,
}

/// Reconciler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    pub enqueued: u64,
    pub released_complete: u64,
    pub released_timed_out: u64,
    /// Images that found no pending frame
    pub late_images: u64,
    /// Planar surfaces that found no pending frame
    pub late_quads: u64,
    pub duplicate_images: u64,
}

/// In-order queue of frames awaiting completion
#[derive(Debug)]
pub struct PendingFrames {
    queue: VecDeque<Frame>,
    requirements: Requirements,
    timeout_us: i64,
    stats: ReconcilerStats,
}

impl PendingFrames {
    pub fn new(timeout_us: i64) -> Self {
        Self {
            queue: VecDeque::new(),
            requirements: Requirements::default(),
            timeout_us: timeout_us.max(0),
            stats: ReconcilerStats::default(),
        }
    }

    pub fn set_requirements(&mut self, requirements: Requirements) {
        self.requirements = requirements;
    }

    #[inline]
    pub fn requirements(&self) -> Requirements {
        self.requirements
    }

    /// Append a frame created from a tracking event
    pub fn enqueue(&mut self, frame: Frame) {
        trace!(frame_id = frame.id, images = frame.images.len(), "frame pending");
        self.stats.enqueued += 1;
        self.queue.push_back(frame);
    }

    /// Attach an image to its pending frame, keeping kind/perspective order.
    ///
    /// Returns `false` when the frame is not pending (already released or
    /// never seen) or already holds that image; the image is then dropped
    /// for frame assembly.
    pub fn attach_image(&mut self, image: Image) -> bool {
        let Some(frame) = self.queue.iter_mut().find(|f| f.id == image.frame_id) else {
            self.stats.late_images += 1;
            trace!(
                frame_id = image.frame_id,
                perspective = ?image.perspective,
                "image for non-pending frame dropped"
            );
            return false;
        };
        insert_image(frame, image, &mut self.stats)
    }

    /// Attach a planar surface to its pending frame
    pub fn attach_quad(&mut self, quad: TrackedQuad) -> bool {
        match self.queue.iter_mut().find(|f| f.id == quad.frame_id) {
            Some(frame) => {
                frame.tracked_quad = Some(quad);
                true
            }
            None => {
                self.stats.late_quads += 1;
                trace!(frame_id = quad.frame_id, "quad for non-pending frame dropped");
                false
            }
        }
    }

    /// Whether `frame` holds everything the current requirements ask for
    pub fn is_ready(&self, frame: &Frame) -> bool {
        let has_pair = |kind: ImageKind| {
            [Perspective::Left, Perspective::Right].iter().all(|p| {
                frame
                    .images
                    .iter()
                    .any(|image| image.kind == kind && image.perspective == *p)
            })
        };

        (!self.requirements.processed || has_pair(ImageKind::Processed))
            && (!self.requirements.raw || has_pair(ImageKind::Raw))
            && (!self.requirements.tracked_quad || frame.has_valid_quad())
    }

    /// Release the head while it is ready or timed out, repeatedly.
    #[instrument(
        level = "trace",
        name = "pending_release",
        skip(self),
        fields(depth = self.queue.len())
    )]
    pub fn release_ready(&mut self, now: i64) -> Vec<Released> {
        let deadline = now.saturating_sub(self.timeout_us);
        let mut released = Vec::new();

        while let Some(head) = self.queue.front() {
            let reason = if self.is_ready(head) {
                ReleaseReason::Complete
            } else if head.timestamp < deadline {
                ReleaseReason::TimedOut
            } else {
                break;
            };

            let Some(frame) = self.queue.pop_front() else {
                break;
            };
            match reason {
                ReleaseReason::Complete => self.stats.released_complete += 1,
                ReleaseReason::TimedOut => self.stats.released_timed_out += 1,
            }
            let age_us = now.saturating_sub(frame.timestamp);
            trace!(frame_id = frame.id, reason = reason.as_str(), age_us, "frame released");
            released.push(Released {
                frame,
                reason,
                age_us,
            });
        }

        released
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Id of the oldest pending frame
    pub fn head_id(&self) -> Option<FrameId> {
        self.queue.front().map(|frame| frame.id)
    }

    pub fn contains(&self, frame_id: FrameId) -> bool {
        self.queue.iter().any(|frame| frame.id == frame_id)
    }

    pub fn stats(&self) -> ReconcilerStats {
        self.stats
    }
}

/// Insert keeping images sorted by (kind, perspective); duplicates are skipped
fn insert_image(frame: &mut Frame, image: Image, stats: &mut ReconcilerStats) -> bool {
    match frame
        .images
        .binary_search_by_key(&image.slot_key(), Image::slot_key)
    {
        Ok(_) => {
            stats.duplicate_images += 1;
            trace!(
                frame_id = frame.id,
                perspective = ?image.perspective,
                "duplicate image skipped"
            );
            false
        }
        Err(position) => {
            frame.images.insert(position, image);
            true
        }
    }
}
