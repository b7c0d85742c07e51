//! # Contracts
//!
//! Frozen interface contracts shared by every tracking crate: transport
//! events, frames, images, policies, configuration and the traits at the
//! transport / observer / sink seams.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Transport clock in microseconds (`Transport::now()`) is the only clock
//! - `FrameId` orders tracking data, images and planar surfaces

mod calibration;
mod config_value;
mod connection_config;
mod device;
mod error;
mod event;
mod frame;
mod image;
mod observer;
mod policy;
mod quad;
mod session;
mod stats;
mod transport;

pub use calibration::CalibrationEntry;
pub use config_value::ConfigValue;
pub use connection_config::ConnectionConfig;
pub use device::*;
pub use error::*;
pub use event::*;
pub use frame::*;
pub use image::*;
pub use observer::{ConnectionObserver, LocalNotificationSink, NotificationSink};
pub use policy::{PolicyFlag, PolicyMask};
pub use quad::TrackedQuad;
pub use session::*;
pub use stats::PoolStats;
pub use transport::{ConnectionStatus, Transport};
