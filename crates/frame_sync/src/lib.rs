//! # Frame Sync
//!
//! 事件关联与缓冲核心：把乱序到达的 tracking / image / quad 事件拼成按序释放的帧。
//!
//! 负责：
//! - 有界历史 (`RingBuffer`, `ImageHistory`)
//! - 图像缓冲池复用 (`ImagePool`)
//! - 畸变标定缓存与变更检测 (`DistortionCache`)
//! - 待定帧就绪 / 超时判定 (`PendingFrames`)
//! - policy 请求与确认状态 (`PolicyState`, `PendingConfigRequests`)
//!
//! All types are synchronous and perform no I/O; the connection poll thread
//! owns them.
//!
//! ## Usage
//!
//! ```ignore
//! use frame_sync::CorrelationEngine;
//!
//! let mut engine = CorrelationEngine::new(ConnectionConfig::default());
//! engine.apply_policy(active_mask);
//! engine.on_tracking(tracking_event);
//! for released in engine.release_ready(transport.now()) {
//!     // notify released.frame
//! }
//! ```

mod distortion;
mod engine;
mod image_history;
mod policy;
mod pool;
mod reconciler;
mod ring;

pub use distortion::{CalibrationObservation, DistortionCache};
pub use engine::{
    Admission, CompletedImage, CompletionRejected, CorrelationEngine, DiscardReason,
    ReleasedFrame,
};
pub use image_history::ImageHistory;
pub use policy::{PendingConfigRequests, PolicyState};
pub use pool::ImagePool;
pub use reconciler::{PendingFrames, ReconcilerStats, Released, Requirements};
pub use ring::RingBuffer;
