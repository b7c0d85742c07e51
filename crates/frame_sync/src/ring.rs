//! Fixed-capacity history that overwrites its oldest entry when full.

use std::fmt;

use ringbuf::{traits::*, HeapRb};

/// Bounded history ring.
///
/// Backed by a `HeapRb`; `put` never fails, a full ring drops its oldest
/// item to make room.
pub struct RingBuffer<T> {
    inner: HeapRb<T>,
    max_size: usize,
    overwritten: u64,
}

impl<T> fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("len", &self.inner.occupied_len())
            .field("max_size", &self.max_size)
            .field("overwritten", &self.overwritten)
            .finish()
    }
}

impl<T> RingBuffer<T> {
    /// Create a ring holding at most `capacity` items (at least one)
    pub fn new(capacity: usize) -> Self {
        let max_size = capacity.max(1);
        Self {
            inner: HeapRb::new(max_size),
            max_size,
            overwritten: 0,
        }
    }

    /// Append an item, returning the evicted oldest one when full
    #[inline]
    pub fn put(&mut self, item: T) -> Option<T> {
        let evicted = if self.inner.is_full() {
            self.overwritten += 1;
            self.inner.try_pop()
        } else {
            None
        };
        // Cannot fail: a slot was freed above if the ring was full.
        let _ = self.inner.try_push(item);
        evicted
    }

    /// Item `offset_from_newest` slots behind the most recent `put`
    #[inline]
    pub fn get(&self, offset_from_newest: usize) -> Option<&T> {
        let len = self.inner.occupied_len();
        if offset_from_newest >= len {
            return None;
        }
        let position = len - 1 - offset_from_newest;
        let (head, tail) = self.inner.as_slices();
        if position < head.len() {
            head.get(position)
        } else {
            tail.get(position - head.len())
        }
    }

    /// Most recently put item
    #[inline]
    pub fn newest(&self) -> Option<&T> {
        self.get(0)
    }

    /// Items from newest to oldest
    pub fn iter_newest_first(&self) -> impl Iterator<Item = &T> {
        let (head, tail) = self.inner.as_slices();
        tail.iter().rev().chain(head.iter().rev())
    }

    /// Items from oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (head, tail) = self.inner.as_slices();
        head.iter().chain(tail.iter())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.occupied_len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.max_size
    }

    /// Number of items dropped by overwrite so far
    #[inline]
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_offsets() {
        let mut ring = RingBuffer::new(4);
        for i in 0..3 {
            ring.put(i);
        }
        assert_eq!(ring.get(0), Some(&2));
        assert_eq!(ring.get(2), Some(&0));
        assert_eq!(ring.get(3), None);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_overwrite_keeps_newest() {
        let capacity = 5;
        let mut ring = RingBuffer::new(capacity);
        for i in 0..23 {
            let evicted = ring.put(i);
            assert_eq!(ring.get(0), Some(&i));
            assert!(ring.get(capacity).is_none());
            if i >= capacity as i32 {
                assert_eq!(evicted, Some(i - capacity as i32));
            } else {
                assert!(evicted.is_none());
            }
        }
        assert_eq!(ring.len(), capacity);
        assert_eq!(ring.get(capacity - 1), Some(&18));
        assert_eq!(ring.overwritten(), 18);
    }

    #[test]
    fn test_iteration_order() {
        let mut ring = RingBuffer::new(3);
        for i in 0..5 {
            ring.put(i);
        }
        let newest_first: Vec<_> = ring.iter_newest_first().copied().collect();
        assert_eq!(newest_first, vec![4, 3, 2]);
        let oldest_first: Vec<_> = ring.iter().copied().collect();
        assert_eq!(oldest_first, vec![2, 3, 4]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut ring = RingBuffer::new(0);
        assert_eq!(ring.capacity(), 1);
        ring.put("a");
        ring.put("b");
        assert_eq!(ring.newest(), Some(&"b"));
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut ring = RingBuffer::new(2);
        ring.put(1);
        ring.clear();
        assert!(ring.is_empty());
        assert!(ring.get(0).is_none());
    }
}
