//! Typed values for the key/value configuration channel

use serde::{Deserialize, Serialize};

/// Value stored under a configuration key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConfigValue {
    Boolean(bool),
    Int32(i32),
    Float(f32),
    String(String),
    /// Response carried a type this side does not understand
    Unknown,
}

impl ConfigValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Int32(_) => "int32",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Unknown => "unknown",
        }
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i32> for ConfigValue {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<f32> for ConfigValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_string(&ConfigValue::Int32(3)).unwrap();
        assert_eq!(json, r#"{"type":"int32","value":3}"#);

        let unknown: ConfigValue = serde_json::from_str(r#"{"type":"unknown"}"#).unwrap();
        assert_eq!(unknown, ConfigValue::Unknown);
    }
}
