//! Transport trait - boundary to the device service connection
//!
//! Real service bindings, the in-process mock and the capture replayer all sit
//! behind this trait. Every method takes `&self`: the poll thread and
//! application threads call into the same transport concurrently.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigValue, ImageRequest, PollOutcome, PolicyMask, SlotHandle, TransportResult};

/// Service connection state as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    NotConnected,
    Connected,
    HandshakeIncomplete,
    NotRunning,
}

/// Transport to the tracking service
pub trait Transport: Send + Sync + 'static {
    /// Open (or re-open) the service connection
    fn open(&self) -> TransportResult<()>;

    /// Close the service connection; idempotent
    fn close(&self);

    /// Block for at most `timeout` waiting for the next event
    fn poll(&self, timeout: Duration) -> PollOutcome;

    /// Request the policy state `set` on / `clear` off.
    ///
    /// Activation is acknowledged later by a policy-change event.
    fn set_policy_flags(&self, set: PolicyMask, clear: PolicyMask) -> TransportResult<()>;

    /// Ask for a configuration value; returns the request id
    fn request_config_value(&self, key: &str) -> TransportResult<u32>;

    /// Store a configuration value; returns the request id
    fn save_config_value(&self, key: &str, value: &ConfigValue) -> TransportResult<u32>;

    /// Transport clock (microseconds)
    fn now(&self) -> i64;

    /// Hand a buffer over for the requested image.
    ///
    /// Ownership moves to the transport; it comes back in the matching
    /// `ImageCompletion` tagged with `slot`.
    fn provide_image_buffer(
        &self,
        request: &ImageRequest,
        slot: SlotHandle,
        buffer: Vec<u8>,
    ) -> TransportResult<()>;

    /// Tell the transport nobody will claim the requested image
    fn discard_image(&self, request: &ImageRequest) -> TransportResult<()>;

    /// Current service connection state
    fn connection_status(&self) -> TransportResult<ConnectionStatus>;
}
