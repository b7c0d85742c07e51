//! ChannelObserver - bridges poll-thread notifications into a bounded tokio
//! channel consumed by the async [`Dispatcher`](crate::Dispatcher).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use contracts::{ConnectionEvent, ConnectionObserver};
use tokio::sync::mpsc;
use tracing::{debug, trace};

type EventFilter = Box<dyn Fn(&ConnectionEvent) -> bool + Send + Sync>;

/// Observer that forwards notifications with `try_send`; never blocks
pub struct ChannelObserver {
    name: String,
    tx: mpsc::Sender<ConnectionEvent>,
    filter: Option<EventFilter>,
    forwarded: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl ChannelObserver {
    /// Create the observer and the receiving end of its channel
    pub fn new(
        name: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let observer = Self {
            name: name.into(),
            tx,
            filter: None,
            forwarded: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (observer, rx)
    }

    /// Forward only notifications for which `filter` returns true
    #[must_use]
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&ConnectionEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Notifications lost to a full channel
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared drop counter, readable after the observer moved into a list
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

impl ConnectionObserver for ChannelObserver {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&self, event: &ConnectionEvent) {
        if let Some(filter) = &self.filter {
            if !filter(event) {
                return;
            }
        }

        match self.tx.try_send(event.clone()) {
            Ok(()) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(
                    observer = %self.name,
                    kind = event.kind(),
                    "channel full, notification dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(observer = %self.name, "channel receiver gone");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_channel_drops() {
        let (observer, mut rx) = ChannelObserver::new("bridge", 2);
        for _ in 0..5 {
            observer.on_event(&ConnectionEvent::Connected);
        }
        assert_eq!(observer.forwarded(), 2);
        assert_eq!(observer.dropped(), 3);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_filter() {
        let (observer, mut rx) = ChannelObserver::new("frames", 4);
        let observer =
            observer.with_filter(|event| matches!(event, ConnectionEvent::ConnectionLost));

        observer.on_event(&ConnectionEvent::Connected);
        observer.on_event(&ConnectionEvent::ConnectionLost);

        assert_eq!(rx.try_recv().unwrap().kind(), "connection_lost");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_receiver_is_quiet() {
        let (observer, rx) = ChannelObserver::new("closed", 1);
        drop(rx);
        observer.on_event(&ConnectionEvent::Init);
        assert_eq!(observer.forwarded(), 0);
        assert_eq!(observer.dropped(), 0);
    }
}
