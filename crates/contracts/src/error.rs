//! Layered error definitions
//!
//! Categorized by source: config / transport / sink

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status code reported by the transport for a call or a poll.
///
/// `Success` is part of the code space so that the last reported status can be
/// tracked uniformly; transport methods only ever return the failure codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStatus {
    #[default]
    #[error("success")]
    Success,
    #[error("unknown error")]
    UnknownError,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("insufficient resources")]
    InsufficientResources,
    #[error("insufficient buffer")]
    InsufficientBuffer,
    #[error("timeout")]
    Timeout,
    #[error("not connected")]
    NotConnected,
    #[error("handshake incomplete")]
    HandshakeIncomplete,
    #[error("buffer size overflow")]
    BufferSizeOverflow,
    #[error("protocol error")]
    ProtocolError,
    #[error("invalid client id")]
    InvalidClientId,
    #[error("unexpected closed")]
    UnexpectedClosed,
    #[error("unknown image frame request")]
    UnknownImageFrameRequest,
    #[error("routine is not seer")]
    RoutineIsNotSeer,
    #[error("timestamp too early")]
    TimestampTooEarly,
    #[error("concurrent poll")]
    ConcurrentPoll,
    #[error("not available")]
    NotAvailable,
    #[error("not streaming")]
    NotStreaming,
    #[error("cannot open device")]
    CannotOpenDevice,
}

impl TransportStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Result of a transport call
pub type TransportResult<T> = std::result::Result<T, TransportStatus>;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Transport Errors =====
    /// A transport call returned a non-success status
    #[error("transport {operation} failed: {status}")]
    Transport {
        operation: String,
        status: TransportStatus,
    },

    /// Config value type the transport cannot store
    #[error("unsupported config value for '{key}': only boolean, int32, float and string are accepted")]
    UnsupportedConfigValue { key: String },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create transport call error
    pub fn transport(operation: impl Into<String>, status: TransportStatus) -> Self {
        Self::Transport {
            operation: operation.into(),
            status,
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }
}
