//! SinkHandle - one sink behind its own bounded queue and worker task

use std::sync::Arc;

use contracts::{ConnectionEvent, NotificationSink};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, trace};

use crate::metrics::SinkMetrics;

/// Handle to a running sink worker
pub struct SinkHandle {
    name: String,
    tx: mpsc::Sender<ConnectionEvent>,
    metrics: Arc<SinkMetrics>,
    worker_handle: JoinHandle<()>,
}

impl SinkHandle {
    /// Spawn the worker task for `sink` with a queue of `queue_capacity`
    pub fn spawn<S: NotificationSink + Send + 'static>(sink: S, queue_capacity: usize) -> Self {
        let name = sink.name().to_string();
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new());

        let worker_metrics = Arc::clone(&metrics);
        let worker_name = name.clone();
        let worker_handle = tokio::spawn(async move {
            sink_worker(sink, rx, worker_metrics, worker_name).await;
        });

        Self {
            name,
            tx,
            metrics,
            worker_handle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Queue a notification without waiting.
    ///
    /// Returns false if the queue is full (notification dropped) or the
    /// worker is gone.
    pub fn try_send(&self, event: ConnectionEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.metrics
                    .set_queue_len(self.tx.max_capacity() - self.tx.capacity());
                true
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                self.metrics.inc_dropped();
                trace!(
                    sink = %self.name,
                    kind = event.kind(),
                    frame_id = ?event.frame_id(),
                    "queue full, notification dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!(sink = %self.name, "sink worker closed unexpectedly");
                false
            }
        }
    }

    /// Close the queue and wait for the worker to drain it
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker_handle.await {
            error!(sink = %self.name, error = ?e, "sink worker panicked");
        }
        debug!(sink = %self.name, "sink handle shut down");
    }
}

#[instrument(name = "sink_worker_loop", skip(sink, rx, metrics), fields(sink = %name))]
async fn sink_worker<S: NotificationSink>(
    mut sink: S,
    mut rx: mpsc::Receiver<ConnectionEvent>,
    metrics: Arc<SinkMetrics>,
    name: String,
) {
    debug!("sink worker started");

    while let Some(event) = rx.recv().await {
        metrics.set_queue_len(rx.len());

        let result = sink.write(&event).await;
        metrics.record_write(&result);
        if let Err(e) = result {
            error!(kind = event.kind(), error = %e, "sink write failed");
        }
    }

    if let Err(e) = sink.flush().await {
        error!(error = %e, "flush failed on shutdown");
    }
    if let Err(e) = sink.close().await {
        error!(error = %e, "close failed on shutdown");
    }

    debug!("sink worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use contracts::ContractError;
    use tokio::time::{sleep, Duration};

    use super::*;

    struct CountingSink {
        name: String,
        writes: Arc<AtomicU64>,
        fail: bool,
        delay_ms: u64,
    }

    impl CountingSink {
        fn new(name: &str, writes: &Arc<AtomicU64>) -> Self {
            Self {
                name: name.to_string(),
                writes: Arc::clone(writes),
                fail: false,
                delay_ms: 0,
            }
        }
    }

    impl NotificationSink for CountingSink {
        fn name(&self) -> &str {
            &self.name
        }

        async fn write(&mut self, _event: &ConnectionEvent) -> Result<(), ContractError> {
            if self.delay_ms > 0 {
                sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail {
                return Err(ContractError::sink_write(&self.name, "refused"));
            }
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_all_notifications_written() {
        let writes = Arc::new(AtomicU64::new(0));
        let handle = SinkHandle::spawn(CountingSink::new("counting", &writes), 10);

        for _ in 0..5 {
            assert!(handle.try_send(ConnectionEvent::Connected));
        }

        handle.shutdown().await;
        assert_eq!(writes.load(Ordering::Relaxed), 5);
    }

    #[tokio::test]
    async fn test_slow_sink_drops_instead_of_blocking() {
        let writes = Arc::new(AtomicU64::new(0));
        let sink = CountingSink {
            delay_ms: 100,
            ..CountingSink::new("slow", &writes)
        };
        let handle = SinkHandle::spawn(sink, 2);

        for _ in 0..10 {
            handle.try_send(ConnectionEvent::Init);
        }

        assert!(handle.metrics().dropped() > 0);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_failures_counted_and_isolated() {
        let writes = Arc::new(AtomicU64::new(0));
        let sink = CountingSink {
            fail: true,
            ..CountingSink::new("failing", &writes)
        };
        let handle = SinkHandle::spawn(sink, 10);

        for _ in 0..3 {
            handle.try_send(ConnectionEvent::ConnectionLost);
        }
        sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.metrics().failed(), 3);
        handle.shutdown().await;
    }
}
