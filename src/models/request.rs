//! Request and response DTOs for lifecycle operations

use super::metadata::Metadata;
use super::operator::{
    ExecuteControl, ExecutionMode, Extension, MetadataType, OperatorRecord, OperatorStatus,
    OperatorType,
};
use super::release::Release;
use crate::error::ErrorResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

// =============================================================================
// REGISTRATION
// =============================================================================

/// Options applied to every operator created by one registration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorOptions {
    #[serde(default)]
    pub operator_type: OperatorType,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub is_data_source: bool,
    /// Falls back to the configured defaults when absent
    pub execute_control: Option<ExecuteControl>,
    #[serde(default)]
    pub extension: Extension,
}

/// A function operator definition
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FunctionInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[validate(length(min = 1, message = "Script type is required"))]
    pub script_type: String,
    #[validate(length(min = 1, message = "Function code is required"))]
    pub code: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Where the candidate operators of a registration come from
#[derive(Debug, Clone)]
pub enum RegisterSource {
    /// Raw OpenAPI 3.x document; one candidate per path/method
    OpenApi { document: Vec<u8> },
    Function(FunctionInput),
}

#[derive(Debug, Clone)]
pub struct RegisterRequest {
    pub source: RegisterSource,
    pub options: OperatorOptions,
    /// Register and publish in one transaction (single candidate only)
    pub direct_publish: bool,
    pub is_internal: bool,
    pub business_domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegisterResult {
    pub operator_id: String,
    pub name: String,
    pub metadata_version: String,
    pub status: OperatorStatus,
}

// =============================================================================
// EDITING
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiPatch {
    pub server_url: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub api_spec: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionPatch {
    pub script_type: Option<String>,
    pub code: Option<String>,
    pub dependencies: Option<Vec<String>>,
}

/// Type-specific content changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metadata_type", rename_all = "snake_case")]
pub enum ContentPatch {
    Api(ApiPatch),
    Function(FunctionPatch),
}

impl ContentPatch {
    pub fn metadata_type(&self) -> MetadataType {
        match self {
            ContentPatch::Api(_) => MetadataType::Api,
            ContentPatch::Function(_) => MetadataType::Function,
        }
    }
}

/// Edit of an operator; absent fields keep their current value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditRequest {
    pub operator_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub summary: Option<String>,
    pub content: Option<ContentPatch>,
    pub execution_mode: Option<ExecutionMode>,
    pub is_data_source: Option<bool>,
    pub execute_control: Option<ExecuteControl>,
    pub extension: Option<Extension>,
    /// Publish the edited operator in the same transaction
    #[serde(default)]
    pub publish: bool,
}

impl EditRequest {
    pub fn new(operator_id: impl Into<String>) -> Self {
        Self {
            operator_id: operator_id.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditResult {
    pub operator_id: String,
    pub metadata_version: String,
    pub status: OperatorStatus,
    /// Whether anything at all differed from the stored state
    pub changed: bool,
    /// Whether a new metadata version was minted
    pub forked: bool,
}

// =============================================================================
// STATUS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub operator_id: String,
    pub status: OperatorStatus,
}

// =============================================================================
// QUERIES
// =============================================================================

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

/// Paged operator/market listing query
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct OperatorQuery {
    /// Case-insensitive substring of the name
    pub name: Option<String>,
    pub status: Option<OperatorStatus>,
    pub metadata_type: Option<MetadataType>,
    pub operator_type: Option<OperatorType>,
    pub create_user: Option<String>,
    pub is_data_source: Option<bool>,
    #[serde(default)]
    pub business_domains: Vec<String>,
    #[serde(default = "default_page")]
    #[validate(range(min = 1, message = "Page must be at least 1"))]
    pub page: u32,
    #[serde(default = "default_page_size")]
    #[validate(range(min = 1, max = 100, message = "Page size must be between 1 and 100"))]
    pub page_size: u32,
}

impl Default for OperatorQuery {
    fn default() -> Self {
        Self {
            name: None,
            status: None,
            metadata_type: None,
            operator_type: None,
            create_user: None,
            is_data_source: None,
            business_domains: Vec::new(),
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// An operator with its resolved working metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorView {
    pub operator: OperatorRecord,
    /// Absent when the resolver could not find the version
    pub metadata: Option<Metadata>,
}

/// A published release with its resolved metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketEntry {
    pub release: Release,
    pub metadata: Option<Metadata>,
}

// =============================================================================
// IMPORT / EXPORT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportItem {
    pub operator: OperatorRecord,
    pub metadata: Metadata,
}

/// Portable set of operators with their working metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportBundle {
    pub exported_at: DateTime<Utc>,
    pub items: Vec<ExportItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    /// Existing operator ids are a conflict
    Create,
    /// Existing operator ids are edited
    Upsert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportAction {
    Created,
    Updated,
}

/// Outcome of one import item; items succeed or fail independently
#[derive(Debug, Serialize)]
pub struct ImportItemResult {
    pub operator_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<ImportAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<OperatorStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl ImportItemResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}
