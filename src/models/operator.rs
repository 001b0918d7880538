//! Operator registry record
//!
//! One record per logical operator, always reflecting the latest edit.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Operator status in the publishing lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorStatus {
    /// Never made public
    Unpublished,
    /// Live in the market
    Published,
    /// Manually withdrawn
    Offline,
    /// Working copy of a released operator is being edited
    Editing,
}

impl OperatorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorStatus::Unpublished => "unpublished",
            OperatorStatus::Published => "published",
            OperatorStatus::Offline => "offline",
            OperatorStatus::Editing => "editing",
        }
    }

    /// States that imply a Release row exists
    pub fn has_release(&self) -> bool {
        matches!(self, OperatorStatus::Published | OperatorStatus::Offline)
    }
}

impl Default for OperatorStatus {
    fn default() -> Self {
        OperatorStatus::Unpublished
    }
}

impl fmt::Display for OperatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatorStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpublished" => Ok(OperatorStatus::Unpublished),
            "published" => Ok(OperatorStatus::Published),
            "offline" => Ok(OperatorStatus::Offline),
            "editing" => Ok(OperatorStatus::Editing),
            other => Err(AppError::internal(format!("unknown operator status '{}'", other))),
        }
    }
}

/// Shape of the metadata an operator points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataType {
    Api,
    Function,
}

impl MetadataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataType::Api => "api",
            MetadataType::Function => "function",
        }
    }
}

impl fmt::Display for MetadataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetadataType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(MetadataType::Api),
            "function" => Ok(MetadataType::Function),
            other => Err(AppError::internal(format!("unknown metadata type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorType {
    Base,
    Composite,
}

impl Default for OperatorType {
    fn default() -> Self {
        OperatorType::Base
    }
}

impl OperatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorType::Base => "base",
            OperatorType::Composite => "composite",
        }
    }
}

impl FromStr for OperatorType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" => Ok(OperatorType::Base),
            "composite" => Ok(OperatorType::Composite),
            other => Err(AppError::internal(format!("unknown operator type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sync,
    Async,
    Stream,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Sync
    }
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Sync => "sync",
            ExecutionMode::Async => "async",
            ExecutionMode::Stream => "stream",
        }
    }
}

impl FromStr for ExecutionMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(ExecutionMode::Sync),
            "async" => Ok(ExecutionMode::Async),
            "stream" => Ok(ExecutionMode::Stream),
            other => Err(AppError::internal(format!("unknown execution mode '{}'", other))),
        }
    }
}

/// Retry behaviour applied by the executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
        }
    }
}

/// Execute-control policy stored with the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteControl {
    pub timeout_ms: u64,
    pub retry_policy: RetryPolicy,
}

impl Default for ExecuteControl {
    fn default() -> Self {
        Self {
            timeout_ms: 60_000,
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Free-form extension attributes
pub type Extension = BTreeMap<String, serde_json::Value>;

/// The registry row: current working configuration of an operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorRecord {
    pub operator_id: String,
    pub name: String,
    pub metadata_type: MetadataType,
    /// Current working metadata version
    pub metadata_version: String,
    pub status: OperatorStatus,
    pub operator_type: OperatorType,
    pub execution_mode: ExecutionMode,
    pub is_data_source: bool,
    pub is_internal: bool,
    pub execute_control: ExecuteControl,
    #[serde(default)]
    pub extension: Extension,
    pub create_user: String,
    pub create_time: DateTime<Utc>,
    pub update_user: String,
    pub update_time: DateTime<Utc>,
}

impl OperatorRecord {
    /// Component operator ids of a composite operator
    pub fn component_ids(&self) -> Vec<String> {
        self.extension
            .get(COMPONENTS_KEY)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn touch(&mut self, user: &str, now: DateTime<Utc>) {
        self.update_user = user.to_string();
        self.update_time = now;
    }
}

/// Extension key listing the component operators of a composite operator
pub const COMPONENTS_KEY: &str = "components";
