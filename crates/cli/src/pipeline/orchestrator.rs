//! Pipeline orchestrator - wires a connection to the dispatcher.
//!
//! The connection's poll thread feeds a [`ChannelObserver`]; an async task
//! folds every notification into [`PipelineStats`] and forwards it to the
//! sink dispatcher.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use connection::{Connection, MockConfig, MockTransport, ReplayConfig, ReplayTransport};
use contracts::{ConnectionEvent, SessionConfig, Transport, TransportKind};
use dispatcher::ChannelObserver;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::PipelineStats;

/// How often the run loop checks for an exhausted capture
const FINISH_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Session configuration
    pub session: SessionConfig,

    /// Maximum number of released frames (None = unlimited)
    pub max_frames: Option<u64>,

    /// Run timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Notification channel capacity
    pub buffer_size: usize,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run the pipeline to completion
    pub async fn run(self) -> Result<PipelineStats> {
        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let session = &self.config.session;
        match session.transport.kind {
            TransportKind::Mock => {
                let mock_config = MockConfig {
                    distortion_grid: session.connection.distortion_grid,
                    ..MockConfig::from_transport(&session.transport)
                };
                info!(
                    framerate_hz = mock_config.framerate_hz,
                    "Running with the MOCK transport"
                );
                let mock = MockTransport::new(mock_config);
                let generator = mock.clone();
                let stats = self
                    .run_connection(mock, |_| false, || generator.start_generator())
                    .await;
                generator.stop_generator();
                stats
            }
            TransportKind::Replay => {
                let replay_config = ReplayConfig::from_transport(&session.transport)
                    .context("replay transport requires transport.replay_path")?;
                info!(path = %replay_config.path.display(), "Running in REPLAY mode");
                let replay =
                    ReplayTransport::load(replay_config).context("Failed to load capture")?;
                self.run_connection(replay, ReplayTransport::finished, || {})
                    .await
            }
        }
    }

    /// Shared run logic for every transport
    async fn run_connection<T, F, S>(
        &self,
        transport: T,
        finished: F,
        on_started: S,
    ) -> Result<PipelineStats>
    where
        T: Transport,
        F: Fn(&T) -> bool,
        S: FnOnce(),
    {
        let start_time = Instant::now();
        let session = &self.config.session;

        // Dispatcher
        let (dispatch_tx, dispatch_rx) = mpsc::channel(self.config.buffer_size.max(1));
        if session.sinks.is_empty() {
            warn!("No sinks configured - notifications are only counted");
        }
        let dispatcher = dispatcher::create_dispatcher(session.sinks.clone(), dispatch_rx)
            .context("Failed to create dispatcher")?;
        let dispatcher_handle = dispatcher.spawn();

        // Connection
        let connection = Arc::new(Connection::new(transport, session.connection.clone()));
        let (observer, mut events) = ChannelObserver::new("pipeline", self.config.buffer_size);
        let dropped = observer.dropped_counter();
        connection.subscribe(Arc::new(observer));
        connection.start().context("Failed to start connection")?;
        on_started();

        for &flag in &session.policies {
            connection
                .set_policy(flag)
                .with_context(|| format!("Failed to request policy {}", flag.as_str()))?;
        }
        for key in &session.query_keys {
            match connection.get_config_value(key) {
                Ok(request_id) => debug!(key = %key, request_id, "config value requested"),
                Err(e) => warn!(key = %key, error = %e, "config value request failed"),
            }
        }

        info!(
            max_frames = ?self.config.max_frames,
            policies = %connection.requested_policy(),
            "Connection running"
        );

        let mut stats = PipelineStats {
            active_sinks: session.sinks.len(),
            ..Default::default()
        };
        let max_frames = self.config.max_frames;

        let run_loop = async {
            let mut ticker = tokio::time::interval(FINISH_CHECK_INTERVAL);
            loop {
                tokio::select! {
                    received = events.recv() => {
                        let Some(event) = received else { break };
                        stats.on_event(&event, connection.now());
                        let lost = matches!(event, ConnectionEvent::ConnectionLost)
                            && !connection.is_running();

                        if dispatch_tx.send(event).await.is_err() {
                            warn!("Dispatcher channel closed");
                            break;
                        }
                        if lost {
                            warn!("Service connection lost");
                            break;
                        }
                        if let Some(max) = max_frames {
                            if stats.frames_released >= max {
                                info!(frames = stats.frames_released, "Reached max frames limit");
                                break;
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        if finished(connection.transport()) && connection.pending_len() == 0 {
                            info!("Capture exhausted");
                            break;
                        }
                    }
                }
            }
        };

        if let Some(timeout) = self.config.timeout {
            if tokio::time::timeout(timeout, run_loop).await.is_err() {
                warn!(timeout_secs = timeout.as_secs(), "Run timed out");
            }
        } else {
            run_loop.await;
        }

        // Shutdown
        info!("Shutting down connection...");
        connection.stop();
        let joiner = Arc::clone(&connection);
        if tokio::task::spawn_blocking(move || joiner.join()).await.is_err() {
            warn!("poll thread join task failed");
        }

        // Notifications published before the poll thread exited
        while let Ok(event) = events.try_recv() {
            stats.on_event(&event, connection.now());
            if dispatch_tx.send(event).await.is_err() {
                break;
            }
        }

        stats.reconciler = connection.reconciler_stats();
        stats.pool = connection.pool_stats();
        stats.notifications_dropped = dropped.load(Ordering::Relaxed);
        drop(connection);

        drop(dispatch_tx);
        match tokio::time::timeout(Duration::from_secs(5), dispatcher_handle).await {
            Ok(Ok(sinks)) => stats.sinks = sinks,
            Ok(Err(e)) => warn!(error = %e, "Dispatcher task failed"),
            Err(_) => warn!("Dispatcher did not drain in time"),
        }

        stats.duration = start_time.elapsed();
        info!(
            duration_secs = stats.duration.as_secs_f64(),
            fps = format!("{:.2}", stats.fps()),
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use contracts::{ConnectionConfig, PolicyFlag, TransportConfig};

    use super::*;

    fn session() -> SessionConfig {
        SessionConfig {
            version: Default::default(),
            connection: ConnectionConfig {
                poll_timeout_ms: 10,
                distortion_grid: 2,
                ..ConnectionConfig::default()
            },
            policies: vec![PolicyFlag::Images, PolicyFlag::TrackedQuads],
            query_keys: vec!["tracking_priority".into()],
            transport: TransportConfig {
                framerate_hz: 200.0,
                image_width: 8,
                image_height: 4,
                ..TransportConfig::default()
            },
            sinks: Vec::new(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_mock_run_stops_at_max_frames() {
        let pipeline = Pipeline::new(PipelineConfig {
            session: session(),
            max_frames: Some(5),
            timeout: Some(Duration::from_secs(10)),
            buffer_size: 256,
            metrics_port: None,
        });

        let stats = pipeline.run().await.unwrap();
        assert!(stats.frames_released >= 5);
        assert!(stats.notifications > stats.frames_released);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_replay_run_ends_with_capture() {
        use connection::{write_capture, CaptureRecord};
        use contracts::{TrackingEvent, TransportEvent};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.jsonl");
        let records: Vec<CaptureRecord> = (1..=3)
            .map(|id| CaptureRecord {
                at_us: id * 1000,
                event: TransportEvent::Tracking(TrackingEvent {
                    frame_id: id,
                    timestamp: id * 1000,
                    tracking_frame_id: id,
                    framerate: 100.0,
                    hand_count: 1,
                    payload: Default::default(),
                }),
            })
            .collect();
        write_capture(&path, &records).unwrap();

        let mut session = session();
        session.policies.clear();
        session.transport.kind = TransportKind::Replay;
        session.transport.replay_path = Some(path);
        session.transport.replay_speed = 10.0;

        let pipeline = Pipeline::new(PipelineConfig {
            session,
            max_frames: None,
            timeout: Some(Duration::from_secs(10)),
            buffer_size: 64,
            metrics_port: None,
        });

        let stats = pipeline.run().await.unwrap();
        assert_eq!(stats.frames_released, 3);
        assert_eq!(stats.reconciler.enqueued, 3);
    }
}
