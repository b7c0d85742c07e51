//! Connection error types

use std::path::PathBuf;

use contracts::{ContractError, TransportStatus};
use thiserror::Error;

/// Connection specific error
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// `start` while the poll loop is already running
    #[error("connection is already running")]
    AlreadyRunning,

    /// A transport call made on behalf of the caller failed
    #[error("transport {operation} call failed: {status}")]
    Transport {
        operation: &'static str,
        status: TransportStatus,
    },

    /// Capture file could not be loaded
    #[error("failed to load capture '{path}': {message}")]
    Replay { path: PathBuf, message: String },

    /// Poll thread could not be spawned
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped ContractError
    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl ConnectionError {
    pub fn transport(operation: &'static str, status: TransportStatus) -> Self {
        Self::Transport { operation, status }
    }

    /// Create capture load error
    pub fn replay(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Replay {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, ConnectionError>;
