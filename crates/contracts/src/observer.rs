//! Observer and sink traits - outward notification interfaces

use crate::{ConnectionEvent, ContractError};

/// Synchronous subscriber, invoked on the poll thread.
///
/// Implementations must return quickly: a slow observer stalls the whole
/// event pipeline.
pub trait ConnectionObserver: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        "observer"
    }

    fn on_event(&self, event: &ConnectionEvent);
}

/// Async notification output
///
/// Sinks run on their own worker task behind a bounded queue.
#[trait_variant::make(NotificationSink: Send)]
pub trait LocalNotificationSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one notification
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, event: &ConnectionEvent) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}
