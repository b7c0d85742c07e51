//! Correlation engine: owns every buffer of one connection and applies
//! classified transport events to them.
//!
//! The engine performs no I/O. Image requests are answered with an
//! [`Admission`] the caller turns into transport calls; everything else
//! returns the data the caller needs for outward notifications.

use std::sync::Arc;

use contracts::{
    CalibrationEntry, ConnectionConfig, Frame, FrameId, Image, ImageCompletion, ImageRequest,
    Perspective, PolicyMask, PoolStats, ReleaseReason, SlotHandle, TrackedQuad, TrackingEvent,
};
use tracing::{debug, instrument, trace};

use crate::distortion::{CalibrationObservation, DistortionCache};
use crate::image_history::ImageHistory;
use crate::pool::ImagePool;
use crate::reconciler::{PendingFrames, ReconcilerStats, Requirements};
use crate::ring::RingBuffer;

/// Why an image request was not given a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Image capability is not active
    ImagesDisabled,
    /// Completed images ran too far ahead of tracking frames
    TooFarAhead,
    /// Every pool slot is in flight
    PoolExhausted,
    /// Dimensions overflow or exceed the image size limit
    InvalidSize,
}

impl DiscardReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImagesDisabled => "images_disabled",
            Self::TooFarAhead => "too_far_ahead",
            Self::PoolExhausted => "pool_exhausted",
            Self::InvalidSize => "invalid_size",
        }
    }
}

/// Decision for an image request
#[derive(Debug)]
pub enum Admission {
    /// Hand `buffer` to the transport for the checkout `slot`
    Provide { slot: SlotHandle, buffer: Vec<u8> },
    /// Tell the transport to drop the image
    Discard(DiscardReason),
}

/// Why a completion produced no image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionRejected {
    ImagesDisabled,
    /// The slot was not (or no longer) checked out with that generation
    StaleSlot,
}

impl CompletionRejected {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImagesDisabled => "images_disabled",
            Self::StaleSlot => "stale_slot",
        }
    }
}

/// A completed image and what it changed
#[derive(Debug, Clone)]
pub struct CompletedImage {
    pub image: Image,
    pub calibration: CalibrationObservation,
    /// Whether a pending frame took the image
    pub attached: bool,
}

/// A frame released into history
#[derive(Debug, Clone)]
pub struct ReleasedFrame {
    pub frame: Arc<Frame>,
    pub reason: ReleaseReason,
    pub age_us: i64,
}

/// Pool and history, allocated on first image activation
#[derive(Debug)]
struct ImageStore {
    pool: ImagePool,
    history: ImageHistory,
}

/// Buffers and correlation state of one connection
#[derive(Debug)]
pub struct CorrelationEngine {
    config: ConnectionConfig,
    frames: RingBuffer<Arc<Frame>>,
    quads: RingBuffer<TrackedQuad>,
    images: Option<ImageStore>,
    distortion: DistortionCache,
    pending: PendingFrames,
    requirements: Requirements,
    last_frame_id: FrameId,
    last_image_frame_id: Option<FrameId>,
}

impl CorrelationEngine {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            frames: RingBuffer::new(config.frame_buffer_len),
            quads: RingBuffer::new(config.quad_buffer_len),
            images: None,
            distortion: DistortionCache::new(config.distortion_grid),
            pending: PendingFrames::new(config.pending_timeout_us),
            requirements: Requirements::default(),
            last_frame_id: 0,
            last_image_frame_id: None,
            config,
        }
    }

    /// Adopt the transport-acknowledged policy mask.
    ///
    /// Activating images allocates the pool and history once; deactivating
    /// keeps them for reuse and only drops the readiness requirement.
    pub fn apply_policy(&mut self, active: PolicyMask) -> Requirements {
        let requirements = Requirements::from_policy(active);
        if requirements.images_enabled() && self.images.is_none() {
            debug!(
                slots = self.config.image_buffer_len,
                grow = self.config.grow_image_pool,
                "allocating image pool"
            );
            self.images = Some(ImageStore {
                pool: ImagePool::new(self.config.image_buffer_len, self.config.grow_image_pool),
                history: ImageHistory::new(self.config.image_buffer_len),
            });
        }
        self.requirements = requirements;
        self.pending.set_requirements(requirements);
        requirements
    }

    #[inline]
    pub fn requirements(&self) -> Requirements {
        self.requirements
    }

    /// Decide whether an image request gets a pool buffer
    #[instrument(
        level = "trace",
        name = "image_admission",
        skip(self, request),
        fields(frame_id = request.frame_id, perspective = ?request.perspective)
    )]
    pub fn admit_image_request(&mut self, request: &ImageRequest) -> Admission {
        if !self.requirements.images_enabled() {
            return Admission::Discard(DiscardReason::ImagesDisabled);
        }
        let Some(store) = self.images.as_mut() else {
            return Admission::Discard(DiscardReason::ImagesDisabled);
        };

        if let Some(last_image) = self.last_image_frame_id {
            if last_image > self.last_frame_id.saturating_add(self.config.max_image_lead) {
                trace!(last_image, last_frame = self.last_frame_id, "image lead exceeded");
                return Admission::Discard(DiscardReason::TooFarAhead);
            }
        }

        let Some(size) = request.size_bytes() else {
            debug!(
                width = request.width,
                height = request.height,
                bytes_per_pixel = request.bytes_per_pixel,
                "image request size rejected"
            );
            return Admission::Discard(DiscardReason::InvalidSize);
        };

        match store.pool.check_out(size) {
            Some((slot, buffer)) => Admission::Provide { slot, buffer },
            None => Admission::Discard(DiscardReason::PoolExhausted),
        }
    }

    /// Return a slot whose buffer the transport refused
    pub fn abandon_slot(&mut self, slot: SlotHandle) {
        if let Some(store) = self.images.as_mut() {
            store.pool.abandon(slot);
        }
    }

    /// Return every slot whose buffer is still with the transport.
    ///
    /// Called once the transport has dropped its buffers (close or loss);
    /// completions that still arrive for those checkouts are stale.
    pub fn abandon_in_flight_images(&mut self) -> usize {
        self.images
            .as_mut()
            .map_or(0, |store| store.pool.abandon_all_in_flight())
    }

    /// Create a pending frame, pre-attaching images and the planar surface
    /// that arrived before it.
    #[instrument(
        level = "trace",
        name = "tracking_enqueue",
        skip(self, event),
        fields(frame_id = event.frame_id)
    )]
    pub fn on_tracking(&mut self, event: TrackingEvent) {
        self.last_frame_id = event.frame_id;
        let mut frame = Frame::from(event);

        if self.requirements.images_enabled() {
            if let Some(store) = self.images.as_ref() {
                frame.images = store
                    .history
                    .images_for_frame(frame.id, self.requirements.expected_images());
            }
        }
        if self.requirements.tracked_quad {
            frame.tracked_quad = self.find_quad_for_frame(frame.id).cloned();
        }

        self.pending.enqueue(frame);
    }

    /// Newest planar surface for `frame_id`; the search stops at older ids
    fn find_quad_for_frame(&self, frame_id: FrameId) -> Option<&TrackedQuad> {
        for quad in self.quads.iter_newest_first() {
            if quad.frame_id == frame_id {
                return Some(quad);
            }
            if quad.frame_id < frame_id {
                break;
            }
        }
        None
    }

    /// Consume a filled buffer: resolve calibration, build the image, store
    /// it in history and attach it to its pending frame.
    #[instrument(
        level = "trace",
        name = "image_complete",
        skip(self, completion),
        fields(frame_id = completion.frame_id, perspective = ?completion.perspective)
    )]
    pub fn on_image_complete(
        &mut self,
        completion: ImageCompletion,
    ) -> Result<CompletedImage, CompletionRejected> {
        self.last_image_frame_id = Some(completion.frame_id);

        let Some(store) = self.images.as_mut() else {
            return Err(CompletionRejected::ImagesDisabled);
        };
        if store.pool.find_by_pool_index(completion.slot.index) != Some(completion.slot) {
            // Lets the pool count the stale hand-back.
            store.pool.complete(completion.slot, completion.pixels);
            return Err(CompletionRejected::StaleSlot);
        }
        let Some(pixels) = store.pool.complete(completion.slot, completion.pixels) else {
            return Err(CompletionRejected::StaleSlot);
        };

        let (calibration, observation) = self.distortion.observe(
            completion.perspective,
            completion.calibration_version,
            &completion.distortion,
        );

        let image = Image {
            frame_id: completion.frame_id,
            sequence_id: completion.sequence_id,
            timestamp: completion.timestamp,
            perspective: completion.perspective,
            kind: completion.kind,
            width: completion.width,
            height: completion.height,
            bytes_per_pixel: completion.bytes_per_pixel,
            pixels,
            calibration,
        };

        store.history.put(image.clone());
        let attached = self.pending.attach_image(image.clone());

        Ok(CompletedImage {
            image,
            calibration: observation,
            attached,
        })
    }

    /// Store a planar surface and attach it to its pending frame
    pub fn on_tracked_quad(&mut self, quad: TrackedQuad) -> bool {
        self.quads.put(quad.clone());
        self.pending.attach_quad(quad)
    }

    /// Release every frame that is ready (or timed out) into history
    pub fn release_ready(&mut self, now: i64) -> Vec<ReleasedFrame> {
        self.pending
            .release_ready(now)
            .into_iter()
            .map(|released| {
                let frame = Arc::new(released.frame);
                self.frames.put(Arc::clone(&frame));
                ReleasedFrame {
                    frame,
                    reason: released.reason,
                    age_us: released.age_us,
                }
            })
            .collect()
    }

    // ===== Queries =====

    /// Released frame `offset` slots behind the newest
    pub fn frame(&self, offset: usize) -> Option<Arc<Frame>> {
        self.frames.get(offset).cloned()
    }

    pub fn latest_images(&self) -> Vec<Image> {
        self.images
            .as_ref()
            .map(|store| store.history.latest_images())
            .unwrap_or_default()
    }

    /// Images of `frame_id`, bounded by the count the active policy expects
    pub fn images_for_frame(&self, frame_id: FrameId) -> Vec<Image> {
        self.images
            .as_ref()
            .map(|store| {
                store
                    .history
                    .images_for_frame(frame_id, self.requirements.expected_images())
            })
            .unwrap_or_default()
    }

    pub fn latest_tracked_quad(&self) -> Option<TrackedQuad> {
        self.quads.get(0).cloned()
    }

    pub fn distortion(&self, version: u64) -> Option<Arc<CalibrationEntry>> {
        self.distortion.try_get(version)
    }

    pub fn current_calibration(&self, perspective: Perspective) -> Option<u64> {
        self.distortion.current_version(perspective)
    }

    pub fn calibration_changed(&self) -> bool {
        self.distortion.changed()
    }

    /// `None` until images were first activated
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.images.as_ref().map(|store| store.pool.stats())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn reconciler_stats(&self) -> ReconcilerStats {
        self.pending.stats()
    }

    pub fn last_frame_id(&self) -> FrameId {
        self.last_frame_id
    }

    pub fn images_allocated(&self) -> bool {
        self.images.is_some()
    }
}
