//! Dispatcher error types

use contracts::SinkType;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatcherError {
    /// A configured sink could not be opened
    #[error("failed to create {sink_type:?} sink '{name}': {message}")]
    SinkCreation {
        name: String,
        sink_type: SinkType,
        message: String,
    },

    /// Two sinks share a name; metrics are keyed by name
    #[error("duplicate sink name '{0}'")]
    DuplicateSink(String),

    #[error("sink error: {0}")]
    Contract(#[from] contracts::ContractError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatcherError {
    pub fn sink_creation(
        name: impl Into<String>,
        sink_type: SinkType,
        message: impl Into<String>,
    ) -> Self {
        Self::SinkCreation {
            name: name.into(),
            sink_type,
            message: message.into(),
        }
    }
}

/// Dispatcher result alias
pub type Result<T> = std::result::Result<T, DispatcherError>;
