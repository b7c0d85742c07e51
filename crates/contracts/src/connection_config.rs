//! Connection configuration contracts that can be shared across crates.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Buffer sizes and timing of one connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Released frames kept in history
    #[validate(range(min = 1, max = 10_000))]
    pub frame_buffer_len: usize,

    /// Image pool slots and image history length (20 frames x 4 images)
    #[validate(range(min = 1, max = 10_000))]
    pub image_buffer_len: usize,

    /// Planar surfaces kept in history
    #[validate(range(min = 1, max = 10_000))]
    pub quad_buffer_len: usize,

    /// Allocate extra pool slots instead of refusing a checkout when full
    pub grow_image_pool: bool,

    /// Age (transport clock units) after which a pending frame is released incomplete
    #[validate(range(min = 0))]
    pub pending_timeout_us: i64,

    /// Upper bound of a single transport poll
    #[validate(range(min = 1, max = 60_000))]
    pub poll_timeout_ms: u64,

    /// Frames an image request may run ahead of the last tracking frame
    #[validate(range(min = 0))]
    pub max_image_lead: i64,

    /// Side of the synthesized distortion grid
    #[validate(range(min = 1, max = 1024))]
    pub distortion_grid: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            frame_buffer_len: 60,
            image_buffer_len: 20 * 4,
            quad_buffer_len: 60,
            grow_image_pool: false,
            pending_timeout_us: 100,
            poll_timeout_ms: 1000,
            max_image_lead: 8,
            distortion_grid: 64,
        }
    }
}

impl ConnectionConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ConnectionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.image_buffer_len, 80);
        assert_eq!(config.poll_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_frame_buffer_rejected() {
        let config = ConnectionConfig {
            frame_buffer_len: 0,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("frame_buffer_len"));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{ "pending_timeout_us": 20000 }"#).unwrap();
        assert_eq!(config.pending_timeout_us, 20_000);
        assert_eq!(config.frame_buffer_len, 60);
    }
}
