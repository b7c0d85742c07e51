//! Distortion calibration cache with per-perspective change detection.

use std::collections::HashMap;
use std::sync::Arc;

use contracts::{CalibrationEntry, Perspective};
use tracing::{debug, trace};

/// Result of observing an image's calibration version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationObservation {
    Unchanged,
    /// The perspective switched to a different version
    Changed { previous: Option<u64>, current: u64 },
}

impl CalibrationObservation {
    pub fn is_changed(self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Append-only, version-keyed calibration table
#[derive(Debug)]
pub struct DistortionCache {
    entries: HashMap<u64, Arc<CalibrationEntry>>,
    current: [Option<u64>; 2],
    changed: bool,
    grid: u32,
}

impl DistortionCache {
    /// `grid` is the side of synthesized entries (`grid x grid` map points)
    pub fn new(grid: u32) -> Self {
        Self {
            entries: HashMap::new(),
            current: [None; 2],
            changed: false,
            grid: grid.max(1),
        }
    }

    #[inline]
    pub fn try_get(&self, version: u64) -> Option<Arc<CalibrationEntry>> {
        self.entries.get(&version).cloned()
    }

    /// Store `entry` under its version; an existing version is never replaced.
    ///
    /// Returns `false` when the version was already present.
    pub fn insert(&mut self, entry: CalibrationEntry) -> bool {
        if self.entries.contains_key(&entry.version) {
            return false;
        }
        debug!(version = entry.version, "calibration entry cached");
        self.entries.insert(entry.version, Arc::new(entry));
        true
    }

    /// Build a grid entry from a raw coefficient payload.
    ///
    /// Short payloads are zero padded, long ones truncated.
    pub fn synthesize(&self, version: u64, coefficients: &[f32]) -> CalibrationEntry {
        let expected = 2 * self.grid as usize * self.grid as usize;
        let mut grid = vec![0.0; expected];
        let copied = coefficients.len().min(expected);
        grid[..copied].copy_from_slice(&coefficients[..copied]);
        CalibrationEntry {
            version,
            width: self.grid,
            height: self.grid,
            coefficients: grid,
        }
    }

    /// Resolve the entry for `version` (creating it on a miss) and compare it
    /// with the current version of `perspective`.
    pub fn observe(
        &mut self,
        perspective: Perspective,
        version: u64,
        coefficients: &[f32],
    ) -> (Arc<CalibrationEntry>, CalibrationObservation) {
        let entry = match self.entries.get(&version) {
            Some(entry) => Arc::clone(entry),
            None => {
                let entry = Arc::new(self.synthesize(version, coefficients));
                self.entries.insert(version, Arc::clone(&entry));
                debug!(version, ?perspective, "calibration entry synthesized");
                entry
            }
        };

        let slot = &mut self.current[perspective.index()];
        let observation = if *slot == Some(version) {
            self.changed = false;
            CalibrationObservation::Unchanged
        } else {
            let previous = slot.replace(version);
            self.changed = true;
            trace!(?perspective, ?previous, current = version, "calibration changed");
            CalibrationObservation::Changed {
                previous,
                current: version,
            }
        };

        (entry, observation)
    }

    #[inline]
    pub fn current_version(&self, perspective: Perspective) -> Option<u64> {
        self.current[perspective.index()]
    }

    /// Whether the most recent observation was a transition
    #[inline]
    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_write_once() {
        let mut cache = DistortionCache::new(1);
        let first = CalibrationEntry {
            version: 3,
            width: 1,
            height: 1,
            coefficients: vec![0.25, -0.5],
        };
        assert!(cache.insert(first.clone()));
        assert!(!cache.insert(CalibrationEntry {
            coefficients: vec![9.0, 9.0],
            ..first.clone()
        }));

        let stored = cache.try_get(3).unwrap();
        assert_eq!(stored.coefficients, first.coefficients);
        assert!(cache.try_get(4).is_none());
    }

    #[test]
    fn test_synthesize_pads_and_truncates() {
        let cache = DistortionCache::new(2);
        let short = cache.synthesize(1, &[1.0, 2.0]);
        assert_eq!(short.coefficients.len(), short.expected_len());
        assert_eq!(&short.coefficients[..3], &[1.0, 2.0, 0.0]);

        let long = cache.synthesize(2, &[1.0; 20]);
        assert_eq!(long.coefficients.len(), 8);
    }

    #[test]
    fn test_change_fires_once_per_transition() {
        let mut cache = DistortionCache::new(1);

        let (_, first) = cache.observe(Perspective::Left, 1, &[]);
        assert_eq!(
            first,
            CalibrationObservation::Changed {
                previous: None,
                current: 1
            }
        );

        let (_, same) = cache.observe(Perspective::Left, 1, &[]);
        assert_eq!(same, CalibrationObservation::Unchanged);
        assert!(!cache.changed());

        let (_, next) = cache.observe(Perspective::Left, 2, &[]);
        assert_eq!(
            next,
            CalibrationObservation::Changed {
                previous: Some(1),
                current: 2
            }
        );
        assert!(cache.changed());

        let (_, again) = cache.observe(Perspective::Left, 2, &[]);
        assert!(!again.is_changed());
        assert_eq!(cache.current_version(Perspective::Left), Some(2));
    }

    #[test]
    fn test_perspectives_tracked_independently() {
        let mut cache = DistortionCache::new(1);
        cache.observe(Perspective::Left, 1, &[]);
        let (_, right) = cache.observe(Perspective::Right, 1, &[]);
        assert!(right.is_changed());
        assert_eq!(cache.current_version(Perspective::Right), Some(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_observe_keeps_first_payload() {
        let mut cache = DistortionCache::new(1);
        let (entry, _) = cache.observe(Perspective::Left, 7, &[0.5, 0.75]);
        let (again, _) = cache.observe(Perspective::Right, 7, &[1.0, 1.0]);
        assert_eq!(entry.coefficients, vec![0.5, 0.75]);
        assert!(Arc::ptr_eq(&entry, &again));
    }
}
