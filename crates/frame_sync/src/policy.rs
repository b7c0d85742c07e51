//! Requested vs. acknowledged capability state, and the config request table.

use std::collections::HashMap;

use contracts::{PolicyFlag, PolicyMask};
use tracing::trace;

/// Client intent and transport-acknowledged capability masks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyState {
    requested: PolicyMask,
    active: PolicyMask,
}

impl PolicyState {
    /// Add `flag` to the requested mask.
    ///
    /// Returns the `(set, clear)` pair to send to the transport.
    pub fn request(&mut self, flag: PolicyFlag) -> (PolicyMask, PolicyMask) {
        self.requested = self.requested.with(flag);
        self.sync_masks()
    }

    /// Remove `flag` from the requested mask.
    ///
    /// Returns the `(set, clear)` pair to send to the transport.
    pub fn clear(&mut self, flag: PolicyFlag) -> (PolicyMask, PolicyMask) {
        self.requested = self.requested.without(flag);
        self.sync_masks()
    }

    fn sync_masks(&self) -> (PolicyMask, PolicyMask) {
        (self.requested, self.requested.complement())
    }

    /// Record the mask the transport reports as active; returns the previous one
    pub fn acknowledge(&mut self, current: PolicyMask) -> PolicyMask {
        let previous = self.active;
        self.active = current;
        trace!(%previous, %current, "policy acknowledged");
        previous
    }

    /// Whether `flag` is active (not merely requested)
    #[inline]
    pub fn is_set(&self, flag: PolicyFlag) -> bool {
        self.active.contains(flag)
    }

    #[inline]
    pub fn requested(&self) -> PolicyMask {
        self.requested
    }

    #[inline]
    pub fn active(&self) -> PolicyMask {
        self.active
    }

    /// Whether the transport activated something other than what was asked
    #[inline]
    pub fn diverged(&self) -> bool {
        self.requested != self.active
    }
}

/// Outstanding config request ids and the keys that produced them
#[derive(Debug, Default)]
pub struct PendingConfigRequests {
    pending: HashMap<u32, String>,
}

impl PendingConfigRequests {
    pub fn record(&mut self, request_id: u32, key: impl Into<String>) {
        self.pending.insert(request_id, key.into());
    }

    /// Remove and return the key of `request_id`; unknown ids resolve to `""`
    pub fn resolve(&mut self, request_id: u32) -> String {
        self.pending.remove(&request_id).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
