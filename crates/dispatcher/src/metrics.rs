//! Per-sink delivery counters

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Delivery counters of one sink, shared between its handle and worker
#[derive(Debug, Default)]
pub struct SinkMetrics {
    queue_len: AtomicUsize,
    written: AtomicU64,
    failed: AtomicU64,
    /// Notifications refused because the queue was full
    dropped: AtomicU64,
}

impl SinkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    /// Count the outcome of one write
    pub fn record_write<E>(&self, result: &Result<(), E>) {
        match result {
            Ok(()) => self.written.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queue_len: self.queue_len(),
            written: self.written(),
            failed: self.failed(),
            dropped: self.dropped(),
        }
    }
}

/// Point-in-time copy of [`SinkMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub queue_len: usize,
    pub written: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "written={} failed={} dropped={} queued={}",
            self.written, self.failed, self.dropped, self.queue_len
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_write_outcomes() {
        let metrics = SinkMetrics::new();
        metrics.record_write::<()>(&Ok(()));
        metrics.record_write(&Err("boom"));
        metrics.inc_dropped();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.written, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.to_string(), "written=1 failed=1 dropped=1 queued=0");
    }
}
