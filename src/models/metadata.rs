//! Metadata records
//!
//! The versioned content of an operator. A record is identified by a
//! generated version id that is never reused; once a Release or a history
//! entry points at a version it must not be mutated.

use super::operator::MetadataType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Description of a wrapped HTTP endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiMetadata {
    pub version: String,
    pub summary: String,
    pub description: String,
    pub server_url: String,
    pub path: String,
    pub method: String,
    /// Operation object taken from the source document
    #[serde(default)]
    pub api_spec: serde_json::Value,
    pub create_user: String,
    pub create_time: DateTime<Utc>,
    pub update_user: String,
    pub update_time: DateTime<Utc>,
}

/// A user-supplied function body and its signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionMetadata {
    pub version: String,
    pub summary: String,
    pub description: String,
    pub script_type: String,
    pub code: String,
    /// Package requirements, e.g. `requests==2.31.0`
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub create_user: String,
    pub create_time: DateTime<Utc>,
    pub update_user: String,
    pub update_time: DateTime<Utc>,
}

/// Metadata content of either shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "metadata_type", rename_all = "snake_case")]
pub enum Metadata {
    Api(ApiMetadata),
    Function(FunctionMetadata),
}

impl Metadata {
    pub fn metadata_type(&self) -> MetadataType {
        match self {
            Metadata::Api(_) => MetadataType::Api,
            Metadata::Function(_) => MetadataType::Function,
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Metadata::Api(m) => &m.version,
            Metadata::Function(m) => &m.version,
        }
    }

    pub fn set_version(&mut self, version: String) {
        match self {
            Metadata::Api(m) => m.version = version,
            Metadata::Function(m) => m.version = version,
        }
    }

    pub fn summary(&self) -> &str {
        match self {
            Metadata::Api(m) => &m.summary,
            Metadata::Function(m) => &m.summary,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Metadata::Api(m) => &m.description,
            Metadata::Function(m) => &m.description,
        }
    }

    pub fn set_summary(&mut self, summary: &str) {
        match self {
            Metadata::Api(m) => m.summary = summary.to_string(),
            Metadata::Function(m) => m.summary = summary.to_string(),
        }
    }

    pub fn set_description(&mut self, description: &str) {
        match self {
            Metadata::Api(m) => m.description = description.to_string(),
            Metadata::Function(m) => m.description = description.to_string(),
        }
    }

    /// Reset create/update audit fields, used when a version is minted
    pub fn stamp_created(&mut self, user: &str, now: DateTime<Utc>) {
        let (cu, ct, uu, ut) = self.audit_fields_mut();
        *cu = user.to_string();
        *ct = now;
        *uu = user.to_string();
        *ut = now;
    }

    pub fn stamp_updated(&mut self, user: &str, now: DateTime<Utc>) {
        let (_, _, uu, ut) = self.audit_fields_mut();
        *uu = user.to_string();
        *ut = now;
    }

    fn audit_fields_mut(
        &mut self,
    ) -> (
        &mut String,
        &mut DateTime<Utc>,
        &mut String,
        &mut DateTime<Utc>,
    ) {
        match self {
            Metadata::Api(m) => (
                &mut m.create_user,
                &mut m.create_time,
                &mut m.update_user,
                &mut m.update_time,
            ),
            Metadata::Function(m) => (
                &mut m.create_user,
                &mut m.create_time,
                &mut m.update_user,
                &mut m.update_time,
            ),
        }
    }

    /// Names of required fields that are blank for this shape
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        match self {
            Metadata::Api(m) => {
                if m.server_url.trim().is_empty() {
                    missing.push("server_url");
                }
                if m.path.trim().is_empty() {
                    missing.push("path");
                }
                if m.method.trim().is_empty() {
                    missing.push("method");
                }
            }
            Metadata::Function(m) => {
                if m.script_type.trim().is_empty() {
                    missing.push("script_type");
                }
                if m.code.trim().is_empty() {
                    missing.push("code");
                }
            }
        }
        missing
    }

    /// Compare content, ignoring version and audit fields
    pub fn same_content(&self, other: &Metadata) -> bool {
        match (self, other) {
            (Metadata::Api(a), Metadata::Api(b)) => {
                a.summary == b.summary
                    && a.description == b.description
                    && a.server_url == b.server_url
                    && a.path == b.path
                    && a.method == b.method
                    && a.api_spec == b.api_spec
            }
            (Metadata::Function(a), Metadata::Function(b)) => {
                a.summary == b.summary
                    && a.description == b.description
                    && a.script_type == b.script_type
                    && a.code == b.code
                    && a.dependencies == b.dependencies
            }
            _ => false,
        }
    }
}
