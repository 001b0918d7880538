//! Persistence contract for the registry engine
//!
//! A backend provides transactions over four tables (registry, metadata,
//! release, release history) plus committed-state batch reads used by the
//! concurrent resolver. Dropping a transaction without committing rolls it
//! back. Backends must give row-level transactional isolation: two
//! concurrent transitions on the same operator cannot both commit without one
//! observing the other.

pub mod memory;
pub mod postgres;
mod queries;
pub mod schema;

pub use memory::{FailPoint, MemoryStore};
pub use postgres::PgStore;

use crate::error::AppError;
use crate::models::{
    Metadata, MetadataType, OperatorQuery, OperatorRecord, OperatorStatus, OperatorType,
    Release, ReleaseHistory,
};
use async_trait::async_trait;

/// Row filter shared by registry and release listings
#[derive(Debug, Clone, Default)]
pub struct OperatorFilter {
    pub name: Option<String>,
    pub status: Option<OperatorStatus>,
    pub metadata_type: Option<MetadataType>,
    pub operator_type: Option<OperatorType>,
    pub create_user: Option<String>,
    pub is_data_source: Option<bool>,
}

impl OperatorFilter {
    pub fn matches(&self, record: &OperatorRecord) -> bool {
        if let Some(name) = &self.name {
            if !record.name.to_lowercase().contains(&name.to_lowercase()) {
                return false;
            }
        }
        self.status.is_none_or(|s| record.status == s)
            && self.metadata_type.is_none_or(|t| record.metadata_type == t)
            && self.operator_type.is_none_or(|t| record.operator_type == t)
            && self
                .create_user
                .as_ref()
                .is_none_or(|u| &record.create_user == u)
            && self.is_data_source.is_none_or(|d| record.is_data_source == d)
    }
}

impl From<&OperatorQuery> for OperatorFilter {
    fn from(query: &OperatorQuery) -> Self {
        Self {
            name: query.name.clone().filter(|n| !n.trim().is_empty()),
            status: query.status,
            metadata_type: query.metadata_type,
            operator_type: query.operator_type,
            create_user: query.create_user.clone(),
            is_data_source: query.is_data_source,
        }
    }
}

/// A storage backend
#[async_trait]
pub trait Store: Send + Sync + 'static {
    type Tx: StoreTx;

    /// Open a transaction
    async fn begin(&self) -> Result<Self::Tx, AppError>;

    /// Committed-state batch read of metadata versions; missing versions are
    /// simply absent from the result
    async fn batch_get_metadata(
        &self,
        metadata_type: MetadataType,
        versions: &[String],
    ) -> Result<Vec<Metadata>, AppError>;

    /// Committed-state batch read of registry rows
    async fn get_operators(&self, ids: &[String]) -> Result<Vec<OperatorRecord>, AppError>;
}

/// Operations available inside one transaction
#[async_trait]
pub trait StoreTx: Send + Sized {
    // ---- registry ----

    async fn get_operator(&mut self, operator_id: &str) -> Result<Option<OperatorRecord>, AppError>;

    /// Same as `get_operator` but locks the row for the rest of the transaction
    async fn lock_operator(&mut self, operator_id: &str)
        -> Result<Option<OperatorRecord>, AppError>;

    async fn get_operators(&mut self, ids: &[String]) -> Result<Vec<OperatorRecord>, AppError>;

    /// Published operators carrying exactly this name
    async fn find_published_by_name(&mut self, name: &str)
        -> Result<Vec<OperatorRecord>, AppError>;

    /// Fails with `Conflict` when the id is taken
    async fn insert_operator(&mut self, record: &OperatorRecord) -> Result<(), AppError>;

    async fn update_operator(&mut self, record: &OperatorRecord) -> Result<(), AppError>;

    async fn delete_operator(&mut self, operator_id: &str) -> Result<(), AppError>;

    /// Matching ids ordered by update time, newest first
    async fn list_operator_ids(&mut self, filter: &OperatorFilter) -> Result<Vec<String>, AppError>;

    // ---- metadata ----

    async fn insert_metadata(&mut self, metadata: &Metadata) -> Result<(), AppError>;

    async fn get_metadata(
        &mut self,
        metadata_type: MetadataType,
        version: &str,
    ) -> Result<Option<Metadata>, AppError>;

    async fn update_metadata(&mut self, metadata: &Metadata) -> Result<(), AppError>;

    async fn delete_metadata(
        &mut self,
        metadata_type: MetadataType,
        versions: &[String],
    ) -> Result<(), AppError>;

    async fn batch_get_metadata(
        &mut self,
        metadata_type: MetadataType,
        versions: &[String],
    ) -> Result<Vec<Metadata>, AppError>;

    // ---- release ----

    async fn get_release(&mut self, operator_id: &str) -> Result<Option<Release>, AppError>;

    async fn get_releases(&mut self, ids: &[String]) -> Result<Vec<Release>, AppError>;

    async fn insert_release(&mut self, release: &Release) -> Result<(), AppError>;

    async fn update_release(&mut self, release: &Release) -> Result<(), AppError>;

    async fn delete_release(&mut self, operator_id: &str) -> Result<(), AppError>;

    /// Operator ids of matching releases ordered by release time, newest first
    async fn list_release_ids(&mut self, filter: &OperatorFilter) -> Result<Vec<String>, AppError>;

    // ---- release history ----

    async fn insert_history(&mut self, entry: &ReleaseHistory) -> Result<(), AppError>;

    async fn update_history(&mut self, entry: &ReleaseHistory) -> Result<(), AppError>;

    /// All entries of an operator ordered by tag ascending
    async fn list_history(&mut self, operator_id: &str) -> Result<Vec<ReleaseHistory>, AppError>;

    async fn delete_history(&mut self, operator_id: &str) -> Result<(), AppError>;

    // ---- completion ----

    async fn commit(self) -> Result<(), AppError>;

    async fn rollback(self) -> Result<(), AppError>;
}
