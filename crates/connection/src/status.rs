//! De-duplicated reporting of abnormal transport status codes.

use contracts::{LogMessage, LogSeverity, TransportResult, TransportStatus};
use tracing::warn;

/// Remembers the last status any transport call returned.
///
/// A failure is reported only when it differs from the previous status, so a
/// transport stuck in one failure mode produces a single message until a call
/// succeeds or fails differently.
#[derive(Debug, Default)]
pub struct StatusReporter {
    last: TransportStatus,
    reported: u64,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `status` for `operation`; returns the critical log message to
    /// publish, if this is a new abnormal status.
    pub fn observe(
        &mut self,
        operation: &str,
        status: TransportStatus,
        timestamp: i64,
    ) -> Option<LogMessage> {
        let previous = std::mem::replace(&mut self.last, status);
        if status.is_success() || status == previous {
            return None;
        }

        self.reported += 1;
        warn!(operation, %status, "abnormal transport status");
        observability::record_transport_status(operation, status);

        Some(LogMessage {
            severity: LogSeverity::Critical,
            timestamp,
            message: format!("transport {operation} call was {status}"),
        })
    }

    /// [`observe`](Self::observe) for a call result
    pub fn check<T>(
        &mut self,
        operation: &str,
        result: &TransportResult<T>,
        timestamp: i64,
    ) -> Option<LogMessage> {
        let status = match result {
            Ok(_) => TransportStatus::Success,
            Err(status) => *status,
        };
        self.observe(operation, status, timestamp)
    }

    pub fn last(&self) -> TransportStatus {
        self.last
    }

    /// Abnormal statuses published so far
    pub fn reported(&self) -> u64 {
        self.reported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_failure_reported_once() {
        let mut reporter = StatusReporter::new();
        let first = reporter.observe("poll", TransportStatus::Timeout, 10);
        let second = reporter.observe("poll", TransportStatus::Timeout, 20);

        let message = first.unwrap();
        assert_eq!(message.severity, LogSeverity::Critical);
        assert_eq!(message.message, "transport poll call was timeout");
        assert!(second.is_none());
        assert_eq!(reporter.reported(), 1);
    }

    #[test]
    fn test_success_resets_dedup() {
        let mut reporter = StatusReporter::new();
        assert!(reporter
            .observe("open", TransportStatus::NotConnected, 0)
            .is_some());
        assert!(reporter.check("open", &Ok(()), 1).is_none());
        assert_eq!(reporter.last(), TransportStatus::Success);
        assert!(reporter
            .check::<()>("open", &Err(TransportStatus::NotConnected), 2)
            .is_some());
    }

    #[test]
    fn test_different_failure_reported() {
        let mut reporter = StatusReporter::new();
        reporter.observe("poll", TransportStatus::Timeout, 0);
        let next = reporter.observe("set_policy_flags", TransportStatus::NotConnected, 1);
        assert!(next.unwrap().message.contains("set_policy_flags"));
    }
}
