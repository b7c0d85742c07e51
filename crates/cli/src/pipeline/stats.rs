//! Run statistics.

use std::time::Duration;

use contracts::{ConnectionEvent, LogSeverity, PoolStats};
use dispatcher::MetricsSnapshot;
use frame_sync::ReconcilerStats;
use observability::ConnectionMetricsAggregator;

/// Statistics from a connection run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Frames released (complete or timed out)
    pub frames_released: u64,

    /// Notifications received from the connection
    pub notifications: u64,

    /// Notifications lost to a full observer channel
    pub notifications_dropped: u64,

    /// Critical log messages (abnormal transport status included)
    pub critical_logs: u64,

    /// Total duration of the run
    pub duration: Duration,

    /// Number of sinks that received notifications
    pub active_sinks: usize,

    /// Notification aggregator
    pub connection_metrics: ConnectionMetricsAggregator,

    /// Final correlation counters
    pub reconciler: ReconcilerStats,

    /// Final image pool counters, when images were enabled
    pub pool: Option<PoolStats>,

    /// Final per-sink counters
    pub sinks: Vec<(String, MetricsSnapshot)>,
}

impl PipelineStats {
    /// Fold one notification into the counters
    pub fn on_event(&mut self, event: &ConnectionEvent, now: i64) {
        self.notifications += 1;
        match event {
            ConnectionEvent::FrameReady { frame, reason } => {
                self.frames_released += 1;
                self.connection_metrics.on_frame(
                    *reason,
                    frame.images.len(),
                    frame.has_valid_quad(),
                    now - frame.timestamp,
                );
            }
            ConnectionEvent::ImageComplete(_) => self.connection_metrics.on_image(),
            ConnectionEvent::CalibrationChanged { .. } => {
                self.connection_metrics.on_calibration_change()
            }
            ConnectionEvent::Log(message) if message.severity == LogSeverity::Critical => {
                self.critical_logs += 1;
            }
            _ => {}
        }
    }

    /// Calculate released frames per second
    pub fn fps(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.frames_released as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                     Connection Statistics                    ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Frames released: {}", self.frames_released);
        println!("   ├─ FPS: {:.2}", self.fps());
        println!("   ├─ Notifications: {}", self.notifications);
        println!("   ├─ Notifications dropped: {}", self.notifications_dropped);
        println!("   ├─ Critical messages: {}", self.critical_logs);
        println!("   └─ Active sinks: {}", self.active_sinks);

        println!("\n{}", self.connection_metrics.summary());

        let r = &self.reconciler;
        println!("🧩 Correlation");
        println!("   ├─ Enqueued: {}", r.enqueued);
        println!("   ├─ Released complete: {}", r.released_complete);
        println!("   ├─ Released timed out: {}", r.released_timed_out);
        println!("   ├─ Late images: {}", r.late_images);
        println!("   ├─ Late quads: {}", r.late_quads);
        println!("   └─ Duplicate images: {}", r.duplicate_images);

        if let Some(pool) = &self.pool {
            println!("\n🗃  Image Pool");
            println!("   ├─ Capacity: {}", pool.capacity);
            println!("   ├─ Checkouts: {}", pool.checkouts);
            println!("   ├─ Reuse ratio: {:.2}", pool.reuse_ratio());
            println!("   ├─ Exhausted: {}", pool.exhausted);
            println!("   └─ Stale completions: {}", pool.stale_completions);
        }

        if !self.sinks.is_empty() {
            println!("\n📤 Sinks");
            for (i, (name, snapshot)) in self.sinks.iter().enumerate() {
                let prefix = if i == self.sinks.len() - 1 { "└─" } else { "├─" };
                println!("   {} {}: {}", prefix, name, snapshot);
            }
        }

        println!();
    }
}
