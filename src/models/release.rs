//! Release snapshot and release history
//!
//! A Release is the publicly visible copy of an operator; history entries
//! archive every state the Release has been in.

use super::operator::{OperatorRecord, OperatorStatus};
use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The currently published snapshot of an operator (at most one per operator)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    /// Denormalized registry fields at publish time
    #[serde(flatten)]
    pub operator: OperatorRecord,
    /// Incremented on every publish, starting at 1
    pub tag: u64,
    pub release_user: String,
    pub release_time: DateTime<Utc>,
}

impl Release {
    pub fn operator_id(&self) -> &str {
        &self.operator.operator_id
    }

    pub fn status(&self) -> OperatorStatus {
        self.operator.status
    }

    pub fn metadata_version(&self) -> &str {
        &self.operator.metadata_version
    }
}

/// One archived Release state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseHistory {
    pub id: String,
    pub operator_id: String,
    pub metadata_version: String,
    pub tag: u64,
    /// Serialized Release as it was when this entry was written
    pub release_desc: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl ReleaseHistory {
    pub fn from_release(release: &Release, now: DateTime<Utc>) -> Result<Self, AppError> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            operator_id: release.operator.operator_id.clone(),
            metadata_version: release.operator.metadata_version.clone(),
            tag: release.tag,
            release_desc: serialize_release(release)?,
            create_time: now,
            update_time: now,
        })
    }

    /// Rewrite the archived snapshot, keeping identity and tag
    pub fn refresh(&mut self, release: &Release, now: DateTime<Utc>) -> Result<(), AppError> {
        self.release_desc = serialize_release(release)?;
        self.update_time = now;
        Ok(())
    }

    /// Decode the archived snapshot
    pub fn snapshot(&self) -> Result<Release, AppError> {
        serde_json::from_str(&self.release_desc).map_err(|e| {
            AppError::internal(format!(
                "corrupt history entry {} for operator {}: {}",
                self.id, self.operator_id, e
            ))
        })
    }
}

fn serialize_release(release: &Release) -> Result<String, AppError> {
    serde_json::to_string(release)
        .map_err(|e| AppError::internal(format!("failed to serialize release: {}", e)))
}
