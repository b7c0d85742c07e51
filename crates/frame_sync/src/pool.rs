//! Reusable image buffer pool.
//!
//! A slot is checked out for the duration of one transport write. Its buffer
//! moves to the transport and comes back in the completion, where it is
//! published as shared pixels. The next checkout of that slot reclaims the
//! allocation if no image still references it.

use std::collections::VecDeque;
use std::sync::Arc;

use contracts::{PoolStats, SlotHandle};
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct PoolSlot {
    generation: u64,
    in_flight: bool,
    /// Idle allocation ready for the next checkout
    storage: Option<Vec<u8>>,
    /// Pixels of the last completion, reclaimable once unshared
    published: Option<Arc<Vec<u8>>>,
}

/// Fixed (or growable) set of payload slots with stable indices
#[derive(Debug)]
pub struct ImagePool {
    slots: Vec<PoolSlot>,
    free: VecDeque<u32>,
    grow: bool,
    next_generation: u64,
    stats: PoolStats,
}

impl ImagePool {
    pub fn new(capacity: usize, grow: bool) -> Self {
        let capacity = capacity.max(1);
        let slots = (0..capacity).map(|_| PoolSlot::default()).collect();
        let free = (0..capacity as u32).collect();
        Self {
            slots,
            free,
            grow,
            next_generation: 1,
            stats: PoolStats {
                capacity,
                ..Default::default()
            },
        }
    }

    /// Take a free slot and a buffer of exactly `size` bytes.
    ///
    /// Returns `None` when every slot is in flight and growth is disabled.
    pub fn check_out(&mut self, size: usize) -> Option<(SlotHandle, Vec<u8>)> {
        let index = match self.free.pop_front() {
            Some(index) => index,
            None if self.grow => {
                self.slots.push(PoolSlot::default());
                self.stats.capacity = self.slots.len();
                debug!(capacity = self.slots.len(), "image pool grown");
                (self.slots.len() - 1) as u32
            }
            None => {
                self.stats.exhausted += 1;
                trace!(capacity = self.slots.len(), "image pool exhausted");
                return None;
            }
        };

        let generation = self.next_generation;
        self.next_generation += 1;

        let slot = &mut self.slots[index as usize];
        slot.generation = generation;
        slot.in_flight = true;

        let reclaimed = slot
            .storage
            .take()
            .or_else(|| slot.published.take().and_then(|px| Arc::try_unwrap(px).ok()));

        let buffer = match reclaimed {
            Some(mut buffer) => {
                self.stats.reuses += 1;
                if buffer.len() != size {
                    buffer.resize(size, 0);
                    self.stats.resizes += 1;
                }
                buffer
            }
            None => {
                self.stats.allocations += 1;
                vec![0; size]
            }
        };

        self.stats.checkouts += 1;
        self.stats.in_flight += 1;
        Some((SlotHandle { index, generation }, buffer))
    }

    /// Handle of the checkout currently holding `index`, if any.
    ///
    /// Only meaningful between a checkout and its completion.
    #[inline]
    pub fn find_by_pool_index(&self, index: u32) -> Option<SlotHandle> {
        let slot = self.slots.get(index as usize)?;
        slot.in_flight.then_some(SlotHandle {
            index,
            generation: slot.generation,
        })
    }

    /// Accept the filled buffer of a checkout and return the slot.
    ///
    /// A handle whose generation no longer matches is stale: the buffer is
    /// dropped and `None` returned.
    pub fn complete(&mut self, handle: SlotHandle, buffer: Vec<u8>) -> Option<Arc<Vec<u8>>> {
        if !self.is_current(handle) {
            self.stats.stale_completions += 1;
            debug!(
                index = handle.index,
                generation = handle.generation,
                "stale pool completion rejected"
            );
            return None;
        }

        let pixels = Arc::new(buffer);
        let slot = &mut self.slots[handle.index as usize];
        slot.in_flight = false;
        slot.published = Some(Arc::clone(&pixels));
        self.free.push_back(handle.index);
        self.stats.in_flight -= 1;
        Some(pixels)
    }

    /// Return a slot whose buffer never came back (e.g. the hand-over failed)
    pub fn abandon(&mut self, handle: SlotHandle) -> bool {
        if !self.is_current(handle) {
            return false;
        }
        let slot = &mut self.slots[handle.index as usize];
        slot.in_flight = false;
        self.free.push_back(handle.index);
        self.stats.in_flight -= 1;
        true
    }

    /// Return every in-flight slot at once; their buffers are gone.
    ///
    /// Generations are kept, so a completion for any of these checkouts is
    /// rejected as stale.
    pub fn abandon_all_in_flight(&mut self) -> usize {
        let mut abandoned = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.in_flight {
                slot.in_flight = false;
                self.free.push_back(index as u32);
                abandoned += 1;
            }
        }
        self.stats.in_flight -= abandoned;
        if abandoned > 0 {
            debug!(abandoned, "in-flight image slots abandoned");
        }
        abandoned
    }

    fn is_current(&self, handle: SlotHandle) -> bool {
        self.slots
            .get(handle.index as usize)
            .is_some_and(|slot| slot.in_flight && slot.generation == handle.generation)
    }

    #[inline]
    pub fn in_flight(&self) -> usize {
        self.stats.in_flight
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}
