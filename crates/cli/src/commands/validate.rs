//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{PolicyFlag, SessionConfig, SinkType, TransportKind};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    transport: String,
    policies: Vec<String>,
    query_key_count: usize,
    sink_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(session) => {
            let warnings = collect_warnings(&session);

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", session.version),
                    transport: session.transport.kind.as_str().to_string(),
                    policies: session
                        .policy_mask()
                        .flags()
                        .map(|flag| flag.as_str().to_string())
                        .collect(),
                    query_key_count: session.query_keys.len(),
                    sink_count: session.sinks.len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(session: &SessionConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if session.sinks.is_empty() {
        warnings.push("No sinks configured - notifications will only be counted".to_string());
    }

    let mask = session.policy_mask();
    if session.connection.grow_image_pool && mask.contains(PolicyFlag::Images) {
        warnings.push(
            "connection.grow_image_pool is set - the image pool has no upper bound".to_string(),
        );
    }

    let expected = if mask.contains(PolicyFlag::RawImages) { 4 } else { 2 };
    if mask.contains(PolicyFlag::Images) && session.connection.image_buffer_len < expected {
        warnings.push(format!(
            "connection.image_buffer_len ({}) is smaller than one frame of images ({expected})",
            session.connection.image_buffer_len
        ));
    }

    if session.transport.kind == TransportKind::Mock && session.transport.replay_path.is_some() {
        warnings.push("transport.replay_path is ignored by the mock transport".to_string());
    }

    for sink in &session.sinks {
        if sink.sink_type == SinkType::File && !sink.params.contains_key("base_path") {
            warnings.push(format!(
                "File sink '{}' has no 'base_path' parameter - writing under ./output",
                sink.name
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Transport: {}", summary.transport);
            println!("  Policies: {}", summary.policies.join(", "));
            println!("  Query keys: {}", summary.query_key_count);
            println!("  Sinks: {}", summary.sink_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args_for(content: &str) -> (tempfile::NamedTempFile, ValidateArgs) {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let args = ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        };
        (file, args)
    }

    #[test]
    fn test_valid_config_with_warnings() {
        let (_file, args) = args_for(
            r#"
policies = ["images"]

[transport]
kind = "mock"
"#,
        );
        let result = validate_config(&args);
        assert!(result.valid);
        let warnings = result.warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("No sinks")));
        assert_eq!(result.summary.unwrap().policies, vec!["images".to_string()]);
    }

    #[test]
    fn test_invalid_config() {
        let (_file, args) = args_for(
            r#"
[transport]
kind = "replay"
"#,
        );
        let result = validate_config(&args);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("replay_path"));
    }

    #[test]
    fn test_missing_file() {
        let args = ValidateArgs {
            config: "does/not/exist.toml".into(),
            json: false,
        };
        assert!(run_validate(&args).is_err());
    }
}
