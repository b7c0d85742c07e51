//! # Dispatcher
//!
//! 通知分发模块。
//!
//! 负责：
//! - 在 poll 线程上同步通知 observers（单个 observer 失败不影响其他）
//! - 通过有界 channel 桥接到异步世界，满队列时丢弃而不阻塞
//! - Fan-out 到多个 sinks，隔离慢 sink

pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod observers;
pub mod record;
pub mod sinks;

pub use channel::ChannelObserver;
pub use contracts::{ConnectionEvent, NotificationSink};
pub use dispatcher::{create_dispatcher, Dispatcher, DispatcherBuilder, DispatcherConfig};
pub use error::{DispatcherError, Result};
pub use handle::SinkHandle;
pub use metrics::{MetricsSnapshot, SinkMetrics};
pub use observers::{ObserverId, ObserverList};
pub use record::{EventRecord, ImageRecord};
pub use sinks::{FileSink, FileSinkConfig, LogSink};
