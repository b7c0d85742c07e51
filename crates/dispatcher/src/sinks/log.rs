//! LogSink - logs notification summaries via tracing

use std::collections::HashMap;

use contracts::{ConnectionEvent, ContractError, LogSeverity, NotificationSink};
use tracing::{debug, info, instrument, warn};

/// Sink that logs notification summaries for debugging
pub struct LogSink {
    name: String,
    /// Log image completions too (noisy at full frame rate)
    include_images: bool,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            include_images: false,
        }
    }

    /// Create from params map; `include_images = "true"` enables image lines
    pub fn from_params(name: impl Into<String>, params: &HashMap<String, String>) -> Self {
        let include_images = params
            .get("include_images")
            .is_some_and(|value| value.eq_ignore_ascii_case("true"));
        Self {
            name: name.into(),
            include_images,
        }
    }

    fn log_summary(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::FrameReady { frame, reason } => {
                info!(
                    sink = %self.name,
                    frame_id = frame.id,
                    timestamp = frame.timestamp,
                    reason = reason.as_str(),
                    images = frame.images.len(),
                    quad = frame.has_valid_quad(),
                    hands = frame.hand_count,
                    "frame ready"
                );
            }
            ConnectionEvent::ImageComplete(image) => {
                if self.include_images {
                    debug!(
                        sink = %self.name,
                        frame_id = image.frame_id,
                        perspective = image.perspective.as_str(),
                        kind = image.kind.as_str(),
                        bytes = image.pixels.len(),
                        "image complete"
                    );
                }
            }
            ConnectionEvent::CalibrationChanged {
                perspective,
                previous,
                current,
            } => {
                info!(
                    sink = %self.name,
                    perspective = perspective.as_str(),
                    previous = ?previous,
                    current,
                    "calibration changed"
                );
            }
            ConnectionEvent::PolicyChanged { previous, current } => {
                info!(sink = %self.name, %previous, %current, "policy changed");
            }
            ConnectionEvent::DeviceFailure(failed) => {
                warn!(
                    sink = %self.name,
                    serial = %failed.serial,
                    message = %failed.message,
                    "device failure"
                );
            }
            ConnectionEvent::Log(log) if log.severity == LogSeverity::Critical => {
                warn!(
                    sink = %self.name,
                    timestamp = log.timestamp,
                    message = %log.message,
                    "transport log"
                );
            }
            other => {
                debug!(sink = %self.name, kind = other.kind(), "notification");
            }
        }
    }
}

impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        level = "trace",
        name = "log_sink_write",
        skip(self, event),
        fields(sink = %self.name, kind = event.kind())
    )]
    async fn write(&mut self, event: &ConnectionEvent) -> Result<(), ContractError> {
        self.log_summary(event);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, "LogSink closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use contracts::LogMessage;

    use super::*;

    #[tokio::test]
    async fn test_log_sink_write() {
        let mut sink = LogSink::new("test_log");
        let event = ConnectionEvent::Log(LogMessage {
            severity: LogSeverity::Critical,
            timestamp: 5,
            message: "poll call was timeout".into(),
        });
        assert!(sink.write(&event).await.is_ok());
        assert!(sink.close().await.is_ok());
    }

    #[test]
    fn test_from_params() {
        let params = HashMap::from([("include_images".to_string(), "TRUE".to_string())]);
        let sink = LogSink::from_params("images", &params);
        assert_eq!(sink.name(), "images");
        assert!(sink.include_images);
        assert!(!LogSink::new("plain").include_images);
    }
}
