//! Connection 指标收集模块
//!
//! 记录帧释放、图像采集、标定变化与缓冲池状态。

use std::collections::HashMap;

use contracts::{Perspective, PoolStats, ReleaseReason, TransportStatus};
use metrics::{counter, gauge, histogram};

/// 记录帧释放
///
/// `latency_us` 为帧从进入 pending 队列到释放的时间。
pub fn record_frame_released(reason: ReleaseReason, image_count: usize, latency_us: i64) {
    counter!(
        "tracksync_frames_released_total",
        "reason" => reason.as_str()
    )
    .increment(1);

    histogram!("tracksync_frame_images").record(image_count as f64);
    histogram!("tracksync_frame_release_latency_us").record(latency_us.max(0) as f64);
}

/// 记录图像完成
pub fn record_image_completed(perspective: Perspective) {
    counter!(
        "tracksync_images_completed_total",
        "perspective" => perspective.as_str()
    )
    .increment(1);
}

/// 记录被丢弃的图像 (请求被拒绝或完成被判定为过期)
pub fn record_image_dropped(reason: &'static str) {
    counter!("tracksync_images_dropped_total", "reason" => reason).increment(1);
}

/// 记录标定版本切换
pub fn record_calibration_change(perspective: Perspective) {
    counter!(
        "tracksync_calibration_changes_total",
        "perspective" => perspective.as_str()
    )
    .increment(1);
}

/// 记录缓冲池状态
pub fn record_pool_stats(stats: &PoolStats) {
    gauge!("tracksync_pool_capacity").set(stats.capacity as f64);
    gauge!("tracksync_pool_in_flight").set(stats.in_flight as f64);
    gauge!("tracksync_pool_checkouts").set(stats.checkouts as f64);
    gauge!("tracksync_pool_allocations").set(stats.allocations as f64);
    gauge!("tracksync_pool_exhausted").set(stats.exhausted as f64);
    gauge!("tracksync_pool_reuse_ratio").set(stats.reuse_ratio());
}

/// 记录 pending 队列深度
pub fn record_pending_depth(depth: usize) {
    gauge!("tracksync_pending_frames").set(depth as f64);
}

/// 记录 transport 调用的异常状态
pub fn record_transport_status(operation: &str, status: TransportStatus) {
    counter!(
        "tracksync_transport_status_total",
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// 记录通知分发
pub fn record_notification_dispatched(sink_name: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "tracksync_notifications_dispatched_total",
        "sink" => sink_name.to_string(),
        "status" => status
    )
    .increment(1);
}

/// 连接指标聚合器
///
/// 在内存中聚合指标，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct ConnectionMetricsAggregator {
    /// 释放的帧总数
    pub total_frames: u64,

    /// 超时释放的帧数
    pub timed_out_frames: u64,

    /// 附带有效平面的帧数
    pub frames_with_quad: u64,

    /// 完成的图像总数
    pub total_images: u64,

    /// 标定版本切换次数
    pub calibration_changes: u64,

    /// 各原因的丢弃图像数
    pub dropped_images: HashMap<String, u64>,

    /// 帧释放延迟统计 (微秒)
    pub latency_stats: RunningStats,

    /// 每帧图像数统计
    pub images_per_frame: RunningStats,
}

impl ConnectionMetricsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 帧释放
    pub fn on_frame(
        &mut self,
        reason: ReleaseReason,
        image_count: usize,
        has_quad: bool,
        latency_us: i64,
    ) {
        self.total_frames += 1;
        if reason == ReleaseReason::TimedOut {
            self.timed_out_frames += 1;
        }
        if has_quad {
            self.frames_with_quad += 1;
        }
        self.latency_stats.push(latency_us.max(0) as f64);
        self.images_per_frame.push(image_count as f64);
    }

    pub fn on_image(&mut self) {
        self.total_images += 1;
    }

    pub fn on_calibration_change(&mut self) {
        self.calibration_changes += 1;
    }

    pub fn on_image_dropped(&mut self, reason: &str) {
        *self.dropped_images.entry(reason.to_string()).or_insert(0) += 1;
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            total_frames: self.total_frames,
            timed_out_frames: self.timed_out_frames,
            frames_with_quad: self.frames_with_quad,
            total_images: self.total_images,
            calibration_changes: self.calibration_changes,
            timeout_rate: if self.total_frames > 0 {
                self.timed_out_frames as f64 / self.total_frames as f64 * 100.0
            } else {
                0.0
            },
            release_latency_us: StatsSummary::from(&self.latency_stats),
            images_per_frame: StatsSummary::from(&self.images_per_frame),
            dropped_images: self.dropped_images.clone(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub timed_out_frames: u64,
    pub frames_with_quad: u64,
    pub total_images: u64,
    pub calibration_changes: u64,
    pub timeout_rate: f64,
    pub release_latency_us: StatsSummary,
    pub images_per_frame: StatsSummary,
    pub dropped_images: HashMap<String, u64>,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Connection Metrics Summary ===")?;
        writeln!(f, "Frames released: {}", self.total_frames)?;
        writeln!(
            f,
            "Timed out: {} ({:.2}%)",
            self.timed_out_frames, self.timeout_rate
        )?;
        writeln!(f, "Frames with tracked quad: {}", self.frames_with_quad)?;
        writeln!(f, "Images completed: {}", self.total_images)?;
        writeln!(f, "Calibration changes: {}", self.calibration_changes)?;
        writeln!(f, "Release latency (us): {}", self.release_latency_us)?;
        writeln!(f, "Images per frame: {}", self.images_per_frame)?;

        if !self.dropped_images.is_empty() {
            writeln!(f, "Dropped images:")?;
            let mut reasons: Vec<_> = self.dropped_images.iter().collect();
            reasons.sort();
            for (reason, count) in reasons {
                writeln!(f, "  {}: {}", reason, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.1}, max={:.1}, mean={:.1}, std={:.1} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            self.m2 += delta * (value - self.mean);
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_stats() {
        let mut stats = RunningStats::default();
        for value in [1.0, 2.0, 3.0, 4.0, 5.0] {
            stats.push(value);
        }

        assert_eq!(stats.count(), 5);
        assert!((stats.mean() - 3.0).abs() < 1e-10);
        assert!((stats.min() - 1.0).abs() < 1e-10);
        assert!((stats.max() - 5.0).abs() < 1e-10);
        assert!((stats.variance() - 2.5).abs() < 1e-10);
    }

    #[test]
    fn test_aggregator_counts() {
        let mut aggregator = ConnectionMetricsAggregator::new();
        aggregator.on_frame(ReleaseReason::Complete, 2, false, 40);
        aggregator.on_frame(ReleaseReason::TimedOut, 0, false, 120);
        aggregator.on_frame(ReleaseReason::Complete, 2, true, -5);
        aggregator.on_image();
        aggregator.on_image_dropped("too_far_ahead");
        aggregator.on_image_dropped("too_far_ahead");
        aggregator.on_calibration_change();

        let summary = aggregator.summary();
        assert_eq!(summary.total_frames, 3);
        assert_eq!(summary.timed_out_frames, 1);
        assert_eq!(summary.frames_with_quad, 1);
        assert_eq!(summary.calibration_changes, 1);
        assert_eq!(summary.dropped_images.get("too_far_ahead"), Some(&2));
        assert!((summary.release_latency_us.min - 0.0).abs() < 1e-10);

        aggregator.reset();
        assert_eq!(aggregator.total_frames, 0);
    }

    #[test]
    fn test_summary_display() {
        let summary = MetricsSummary {
            total_frames: 200,
            timed_out_frames: 10,
            timeout_rate: 5.0,
            release_latency_us: StatsSummary {
                count: 200,
                min: 2.0,
                max: 100.0,
                mean: 30.0,
                std_dev: 12.0,
            },
            dropped_images: HashMap::from([("pool_exhausted".to_string(), 3)]),
            ..Default::default()
        };

        let output = format!("{}", summary);
        assert!(output.contains("Frames released: 200"));
        assert!(output.contains("5.00%"));
        assert!(output.contains("pool_exhausted: 3"));
        assert!(output.contains("Images per frame: N/A"));
    }

    #[test]
    fn test_record_without_recorder() {
        // No recorder installed: calls are no-ops.
        record_frame_released(ReleaseReason::Complete, 2, 10);
        record_pool_stats(&PoolStats::default());
        record_transport_status("poll", TransportStatus::Timeout);
    }
}
