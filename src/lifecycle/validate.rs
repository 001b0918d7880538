//! Naming and option policy checked before any write

use crate::config::LimitsConfig;
use crate::error::{validation_error, validation_error_with, AppError, AppResult};
use crate::models::ExecutionMode;
use once_cell::sync::Lazy;
use regex::Regex;

static FORBIDDEN_CHARS: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r#"[\\/:*?"<>|]"#));

#[derive(Debug, Clone)]
pub struct NamePolicy {
    name_max_len: usize,
    description_max_len: usize,
}

impl NamePolicy {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            name_max_len: limits.name_max_len,
            description_max_len: limits.description_max_len,
        }
    }

    pub fn check_name(&self, name: &str) -> AppResult<()> {
        if name.trim().is_empty() {
            return Err(validation_error("NAME_EMPTY", "Operator name must not be empty"));
        }
        if name.chars().count() > self.name_max_len {
            return Err(validation_error_with(
                "NAME_TOO_LONG",
                format!(
                    "Operator name exceeds {} characters",
                    self.name_max_len
                ),
                vec![name.to_string(), self.name_max_len.to_string()],
            ));
        }
        let forbidden = (*FORBIDDEN_CHARS)
            .as_ref()
            .map_err(|e| AppError::internal(format!("invalid name pattern: {}", e)))?;
        if forbidden.is_match(name) {
            return Err(validation_error_with(
                "NAME_INVALID_CHARS",
                "Operator name must not contain any of \\ / : * ? \" < > |",
                vec![name.to_string()],
            ));
        }
        Ok(())
    }

    pub fn check_description(&self, description: &str) -> AppResult<()> {
        if description.chars().count() > self.description_max_len {
            return Err(validation_error_with(
                "DESCRIPTION_TOO_LONG",
                format!(
                    "Description exceeds {} characters",
                    self.description_max_len
                ),
                vec![self.description_max_len.to_string()],
            ));
        }
        Ok(())
    }
}

/// Data-source operators feed other operators and must answer synchronously
pub fn check_execution(is_data_source: bool, mode: ExecutionMode) -> AppResult<()> {
    if is_data_source && mode != ExecutionMode::Sync {
        return Err(validation_error_with(
            "DATA_SOURCE_MODE",
            "Data-source operators must use sync execution",
            vec![mode.as_str().to_string()],
        ));
    }
    Ok(())
}
