//! 配置校验模块
//!
//! 校验规则：
//! - 字段范围 (`validator` derive 规则)
//! - sink 名称非空且唯一
//! - replay transport 必须指定 replay_path
//! - raw_images policy 依赖 images policy

use std::collections::HashSet;

use contracts::{ContractError, PolicyFlag, SessionConfig, TransportKind};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// 校验 SessionConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(session: &SessionConfig) -> Result<(), ContractError> {
    validate_fields(session)?;
    validate_sinks(session)?;
    validate_transport(session)?;
    validate_policies(session)?;
    Ok(())
}

/// 字段级规则
fn validate_fields(session: &SessionConfig) -> Result<(), ContractError> {
    session.validate().map_err(|errors| {
        let (field, message) = first_violation(&errors, String::new());
        ContractError::config_validation(field, message)
    })
}

/// 取第一条违规 (嵌套结构展开为 `a.b[0].c` 路径)
fn first_violation(errors: &ValidationErrors, prefix: String) -> (String, String) {
    let mut entries: Vec<_> = errors.errors().iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    for (field, kind) in entries {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                if let Some(error) = list.first() {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{} check failed", error.code));
                    return (path, message);
                }
            }
            ValidationErrorsKind::Struct(nested) => return first_violation(nested, path),
            ValidationErrorsKind::List(items) => {
                if let Some((index, nested)) = items.iter().min_by_key(|(index, _)| **index) {
                    return first_violation(nested, format!("{path}[{index}]"));
                }
            }
        }
    }
    (prefix, "invalid value".to_string())
}

/// 校验 sink 配置
fn validate_sinks(session: &SessionConfig) -> Result<(), ContractError> {
    let mut seen = HashSet::new();
    for (idx, sink) in session.sinks.iter().enumerate() {
        if sink.name.is_empty() {
            return Err(ContractError::config_validation(
                format!("sinks[{}].name", idx),
                "sink name cannot be empty",
            ));
        }
        if !seen.insert(sink.name.as_str()) {
            return Err(ContractError::config_validation(
                format!("sinks[name={}]", sink.name),
                "duplicate sink name",
            ));
        }
    }
    Ok(())
}

/// 校验 transport 配置
fn validate_transport(session: &SessionConfig) -> Result<(), ContractError> {
    let transport = &session.transport;
    if transport.kind == TransportKind::Replay && transport.replay_path.is_none() {
        return Err(ContractError::config_validation(
            "transport.replay_path",
            "replay transport requires replay_path",
        ));
    }
    Ok(())
}

/// 校验 policy 组合
fn validate_policies(session: &SessionConfig) -> Result<(), ContractError> {
    let mask = session.policy_mask();
    if mask.contains(PolicyFlag::RawImages) && !mask.contains(PolicyFlag::Images) {
        return Err(ContractError::config_validation(
            "policies",
            "raw_images requires the images policy",
        ));
    }
    Ok(())
}
