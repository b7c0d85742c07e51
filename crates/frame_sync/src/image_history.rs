//! Recent completed images indexed by owning frame.
//!
//! Same index separation as the packet buffers:
//! - HeapRb keeps lightweight metadata (frame id + slab key) in arrival order
//! - Slab keeps the images themselves
//! - a frame id index points at the slab keys of each frame

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use contracts::{FrameId, Image, ImageKind, Perspective};
use ringbuf::{traits::*, HeapRb};
use slab::Slab;
use tracing::trace;

#[derive(Debug, Clone, Copy)]
struct ImageMeta {
    frame_id: FrameId,
    slab_key: usize,
}

/// Bounded image history
pub struct ImageHistory {
    index: HeapRb<ImageMeta>,
    storage: Slab<Image>,
    by_frame: HashMap<FrameId, Vec<usize>>,
    max_size: usize,
    evicted: u64,
}

impl fmt::Debug for ImageHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHistory")
            .field("len", &self.index.occupied_len())
            .field("frames", &self.by_frame.len())
            .field("max_size", &self.max_size)
            .finish()
    }
}

impl ImageHistory {
    pub fn new(capacity: usize) -> Self {
        let max_size = capacity.max(1);
        Self {
            index: HeapRb::new(max_size),
            storage: Slab::with_capacity(max_size),
            by_frame: HashMap::new(),
            max_size,
            evicted: 0,
        }
    }

    /// Store an image, evicting the oldest one when full
    pub fn put(&mut self, image: Image) {
        if self.index.is_full() {
            if let Some(old) = self.index.try_pop() {
                self.forget(old);
            }
        }

        let frame_id = image.frame_id;
        let slab_key = self.storage.insert(image);
        self.by_frame.entry(frame_id).or_default().push(slab_key);
        let _ = self.index.try_push(ImageMeta { frame_id, slab_key });
    }

    fn forget(&mut self, meta: ImageMeta) {
        self.storage.remove(meta.slab_key);
        if let Some(keys) = self.by_frame.get_mut(&meta.frame_id) {
            keys.retain(|key| *key != meta.slab_key);
            if keys.is_empty() {
                self.by_frame.remove(&meta.frame_id);
            }
        }
        self.evicted += 1;
        trace!(frame_id = meta.frame_id, "image evicted from history");
    }

    /// Up to `expected` images of `frame_id`, ordered by kind then perspective.
    ///
    /// When the same (kind, perspective) was stored twice the later image wins.
    pub fn images_for_frame(&self, frame_id: FrameId, expected: usize) -> Vec<Image> {
        let Some(keys) = self.by_frame.get(&frame_id) else {
            return Vec::new();
        };

        let mut by_slot: BTreeMap<(ImageKind, Perspective), &Image> = BTreeMap::new();
        for image in keys.iter().filter_map(|key| self.storage.get(*key)) {
            by_slot.insert(image.slot_key(), image);
        }

        by_slot.into_values().take(expected).cloned().collect()
    }

    /// Most recent left/right pair of one kind, regardless of frame assembly
    pub fn latest_images(&self) -> Vec<Image> {
        let (head, tail) = self.index.as_slices();
        for meta in tail.iter().rev().chain(head.iter().rev()) {
            let Some(newest) = self.storage.get(meta.slab_key) else {
                continue;
            };
            if let Some(pair) = self.pair_for(meta.frame_id, newest.kind) {
                return pair;
            }
        }
        Vec::new()
    }

    fn pair_for(&self, frame_id: FrameId, kind: ImageKind) -> Option<Vec<Image>> {
        let keys = self.by_frame.get(&frame_id)?;
        let find = |perspective: Perspective| {
            keys.iter()
                .rev()
                .filter_map(|key| self.storage.get(*key))
                .find(|image| image.kind == kind && image.perspective == perspective)
        };
        let left = find(Perspective::Left)?;
        let right = find(Perspective::Right)?;
        Some(vec![left.clone(), right.clone()])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.occupied_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Images dropped by overwrite so far
    #[inline]
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use contracts::CalibrationEntry;

    use super::*;

    fn make_image(frame_id: FrameId, perspective: Perspective, kind: ImageKind) -> Image {
        Image {
            frame_id,
            sequence_id: frame_id as u64,
            timestamp: frame_id * 1000,
            perspective,
            kind,
            width: 2,
            height: 1,
            bytes_per_pixel: 1,
            pixels: Arc::new(vec![frame_id as u8; 2]),
            calibration: Arc::new(CalibrationEntry {
                version: 1,
                width: 1,
                height: 1,
                coefficients: vec![0.0, 0.0],
            }),
        }
    }

    #[test]
    fn test_images_for_frame_ordered() {
        let mut history = ImageHistory::new(8);
        history.put(make_image(5, Perspective::Right, ImageKind::Processed));
        history.put(make_image(6, Perspective::Left, ImageKind::Processed));
        history.put(make_image(5, Perspective::Left, ImageKind::Processed));

        let images = history.images_for_frame(5, 2);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].perspective, Perspective::Left);
        assert_eq!(images[1].perspective, Perspective::Right);
        assert!(history.images_for_frame(7, 2).is_empty());
    }

    #[test]
    fn test_expected_count_limits_result() {
        let mut history = ImageHistory::new(8);
        for kind in [ImageKind::Processed, ImageKind::Raw] {
            for perspective in [Perspective::Left, Perspective::Right] {
                history.put(make_image(1, perspective, kind));
            }
        }
        assert_eq!(history.images_for_frame(1, 4).len(), 4);
        let processed = history.images_for_frame(1, 2);
        assert!(processed.iter().all(|i| i.kind == ImageKind::Processed));
    }

    #[test]
    fn test_eviction_updates_frame_index() {
        let mut history = ImageHistory::new(2);
        history.put(make_image(1, Perspective::Left, ImageKind::Processed));
        history.put(make_image(2, Perspective::Left, ImageKind::Processed));
        history.put(make_image(3, Perspective::Left, ImageKind::Processed));

        assert_eq!(history.len(), 2);
        assert_eq!(history.evicted(), 1);
        assert!(history.images_for_frame(1, 2).is_empty());
        assert_eq!(history.images_for_frame(3, 2).len(), 1);
    }

    #[test]
    fn test_latest_images_requires_pair() {
        let mut history = ImageHistory::new(8);
        history.put(make_image(1, Perspective::Left, ImageKind::Processed));
        history.put(make_image(1, Perspective::Right, ImageKind::Processed));
        history.put(make_image(2, Perspective::Left, ImageKind::Processed));

        let latest = history.latest_images();
        assert_eq!(latest.len(), 2);
        assert!(latest.iter().all(|i| i.frame_id == 1));

        history.put(make_image(2, Perspective::Right, ImageKind::Processed));
        let latest = history.latest_images();
        assert!(latest.iter().all(|i| i.frame_id == 2));
        assert_eq!(latest[0].perspective, Perspective::Left);
    }

    #[test]
    fn test_latest_images_empty() {
        let history = ImageHistory::new(4);
        assert!(history.latest_images().is_empty());
    }
}
