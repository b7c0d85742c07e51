//! # Connection
//!
//! 与 tracking 服务的连接：后台 poll 线程 + 公共 API。
//!
//! 负责：
//! - 轮询 transport，把事件路由进 `CorrelationEngine`
//! - 同步通知 `ConnectionObserver`，隔离 observer / handler panic
//! - policy 与 config 请求，设备列表，异常状态上报
//! - 可脚本化的 `MockTransport` 与 JSONL 回放 `ReplayTransport`
//!
//! ## Usage
//!
//! ```ignore
//! use connection::{Connection, MockTransport};
//!
//! let connection = Connection::new(MockTransport::default(), ConnectionConfig::default());
//! connection.subscribe(observer);
//! connection.start()?;
//! connection.set_policy(PolicyFlag::Images)?;
//! ```

mod connection;
mod devices;
mod error;
mod mock;
mod registry;
mod replay;
mod status;

pub use connection::{Connection, POLL_THREAD_NAME};
pub use devices::DeviceList;
pub use error::{ConnectionError, Result};
pub use mock::{MockCall, MockConfig, MockOperation, MockTransport};
pub use registry::ConnectionRegistry;
pub use replay::{write_capture, CaptureRecord, ReplayConfig, ReplayTransport};
pub use status::StatusReporter;
