//! In-memory storage backend
//!
//! All tables live behind one async mutex. A transaction holds the lock for
//! its whole lifetime and stages writes in a copy-on-write clone of the
//! tables; commit swaps the staged copy in, drop discards it. This gives
//! serializable isolation, at the cost of serializing every transaction.
//!
//! Do not call the committed-state readers (`batch_get_metadata`,
//! `get_operators`) while holding a transaction on the same store: they wait
//! for the same lock.

use super::{OperatorFilter, Store, StoreTx};
use crate::error::{conflict_error, not_found_error, AppError};
use crate::models::{
    ApiMetadata, FunctionMetadata, Metadata, MetadataType, OperatorRecord, OperatorStatus,
    Release, ReleaseHistory,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Operations that can be made to fail, for rollback testing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertOperator,
    UpdateOperator,
    DeleteOperator,
    InsertMetadata,
    UpdateMetadata,
    DeleteMetadata,
    InsertRelease,
    UpdateRelease,
    DeleteRelease,
    InsertHistory,
    UpdateHistory,
    DeleteHistory,
    /// Committed-state metadata reads (resolver path)
    BatchGetMetadata,
    /// Committed-state operator reads (resolver path)
    GetOperators,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    operators: HashMap<String, OperatorRecord>,
    api_metadata: HashMap<String, ApiMetadata>,
    function_metadata: HashMap<String, FunctionMetadata>,
    releases: HashMap<String, Release>,
    /// Operator id -> entries in insertion order
    history: HashMap<String, Vec<ReleaseHistory>>,
}

impl Tables {
    fn metadata(&self, metadata_type: MetadataType, version: &str) -> Option<Metadata> {
        match metadata_type {
            MetadataType::Api => self.api_metadata.get(version).cloned().map(Metadata::Api),
            MetadataType::Function => self
                .function_metadata
                .get(version)
                .cloned()
                .map(Metadata::Function),
        }
    }

    fn has_metadata(&self, metadata: &Metadata) -> bool {
        match metadata {
            Metadata::Api(m) => self.api_metadata.contains_key(&m.version),
            Metadata::Function(m) => self.function_metadata.contains_key(&m.version),
        }
    }

    fn put_metadata(&mut self, metadata: &Metadata) {
        match metadata {
            Metadata::Api(m) => {
                self.api_metadata.insert(m.version.clone(), m.clone());
            }
            Metadata::Function(m) => {
                self.function_metadata.insert(m.version.clone(), m.clone());
            }
        }
    }

    fn batch_metadata(&self, metadata_type: MetadataType, versions: &[String]) -> Vec<Metadata> {
        versions
            .iter()
            .filter_map(|v| self.metadata(metadata_type, v))
            .collect()
    }

    fn operators_by_ids(&self, ids: &[String]) -> Vec<OperatorRecord> {
        ids.iter()
            .filter_map(|id| self.operators.get(id).cloned())
            .collect()
    }
}

/// Thread-safe in-memory store
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Faults>,
    metadata_writes: Arc<AtomicU64>,
    batch_reads: Arc<AtomicU64>,
    read_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every committed-state read, to exercise deadlines
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    /// Make the next call at `point` fail with an internal error
    pub fn fail_once(&self, point: FailPoint) {
        self.fail_times(point, 1);
    }

    /// Make the next `times` calls at `point` fail
    pub fn fail_times(&self, point: FailPoint, times: usize) {
        *lock_faults(&self.faults).entry(point).or_default() += times;
    }

    /// Injected failures at `point` not yet triggered
    pub fn armed(&self, point: FailPoint) -> usize {
        lock_faults(&self.faults).get(&point).copied().unwrap_or_default()
    }

    /// Number of metadata inserts, updates and deletes issued (committed or not)
    pub fn metadata_writes(&self) -> u64 {
        self.metadata_writes.load(Ordering::SeqCst)
    }

    /// Number of committed-state metadata round-trips
    pub fn batch_reads(&self) -> u64 {
        self.batch_reads.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Fail point -> remaining injected failures
type Faults = std::sync::Mutex<HashMap<FailPoint, usize>>;

fn lock_faults(faults: &Faults) -> std::sync::MutexGuard<'_, HashMap<FailPoint, usize>> {
    faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn trip(faults: &Faults, point: FailPoint) -> Result<(), AppError> {
    let mut faults = lock_faults(faults);
    match faults.get_mut(&point) {
        Some(remaining) if *remaining > 0 => {
            *remaining -= 1;
            if *remaining == 0 {
                faults.remove(&point);
            }
            debug!("Injected failure at {:?}", point);
            Err(AppError::internal(format!("injected failure at {:?}", point)))
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, AppError> {
        let guard = self.tables.clone().lock_owned().await;
        Ok(MemoryTx {
            guard,
            staged: None,
            faults: self.faults.clone(),
            metadata_writes: self.metadata_writes.clone(),
        })
    }

    async fn batch_get_metadata(
        &self,
        metadata_type: MetadataType,
        versions: &[String],
    ) -> Result<Vec<Metadata>, AppError> {
        self.delay().await;
        trip(&self.faults, FailPoint::BatchGetMetadata)?;
        self.batch_reads.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.lock().await;
        Ok(tables.batch_metadata(metadata_type, versions))
    }

    async fn get_operators(&self, ids: &[String]) -> Result<Vec<OperatorRecord>, AppError> {
        self.delay().await;
        trip(&self.faults, FailPoint::GetOperators)?;
        let tables = self.tables.lock().await;
        Ok(tables.operators_by_ids(ids))
    }
}

/// Transaction over the in-memory tables
pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    staged: Option<Tables>,
    faults: Arc<Faults>,
    metadata_writes: Arc<AtomicU64>,
}

impl MemoryTx {
    fn read(&self) -> &Tables {
        self.staged.as_ref().unwrap_or(&*self.guard)
    }

    fn write(&mut self) -> &mut Tables {
        let committed = &self.guard;
        self.staged.get_or_insert_with(|| (**committed).clone())
    }

    fn trip(&self, point: FailPoint) -> Result<(), AppError> {
        trip(&self.faults, point)
    }

    fn count_metadata_write(&self) {
        self.metadata_writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn get_operator(&mut self, operator_id: &str) -> Result<Option<OperatorRecord>, AppError> {
        Ok(self.read().operators.get(operator_id).cloned())
    }

    async fn lock_operator(
        &mut self,
        operator_id: &str,
    ) -> Result<Option<OperatorRecord>, AppError> {
        // The whole store is already locked by this transaction
        self.get_operator(operator_id).await
    }

    async fn get_operators(&mut self, ids: &[String]) -> Result<Vec<OperatorRecord>, AppError> {
        Ok(self.read().operators_by_ids(ids))
    }

    async fn find_published_by_name(
        &mut self,
        name: &str,
    ) -> Result<Vec<OperatorRecord>, AppError> {
        Ok(self
            .read()
            .operators
            .values()
            .filter(|op| op.status == OperatorStatus::Published && op.name == name)
            .cloned()
            .collect())
    }

    async fn insert_operator(&mut self, record: &OperatorRecord) -> Result<(), AppError> {
        self.trip(FailPoint::InsertOperator)?;
        if self.read().operators.contains_key(&record.operator_id) {
            return Err(conflict_error(format!(
                "Operator {} already exists",
                record.operator_id
            )));
        }
        self.write()
            .operators
            .insert(record.operator_id.clone(), record.clone());
        Ok(())
    }

    async fn update_operator(&mut self, record: &OperatorRecord) -> Result<(), AppError> {
        self.trip(FailPoint::UpdateOperator)?;
        if !self.read().operators.contains_key(&record.operator_id) {
            return Err(not_found_error(format!(
                "Operator {} not found",
                record.operator_id
            )));
        }
        self.write()
            .operators
            .insert(record.operator_id.clone(), record.clone());
        Ok(())
    }

    async fn delete_operator(&mut self, operator_id: &str) -> Result<(), AppError> {
        self.trip(FailPoint::DeleteOperator)?;
        self.write().operators.remove(operator_id);
        Ok(())
    }

    async fn list_operator_ids(&mut self, filter: &OperatorFilter) -> Result<Vec<String>, AppError> {
        let mut matched: Vec<&OperatorRecord> = self
            .read()
            .operators
            .values()
            .filter(|op| filter.matches(op))
            .collect();
        matched.sort_by(|a, b| {
            b.update_time
                .cmp(&a.update_time)
                .then_with(|| a.operator_id.cmp(&b.operator_id))
        });
        Ok(matched.into_iter().map(|op| op.operator_id.clone()).collect())
    }

    async fn insert_metadata(&mut self, metadata: &Metadata) -> Result<(), AppError> {
        self.trip(FailPoint::InsertMetadata)?;
        self.count_metadata_write();
        if self.read().has_metadata(metadata) {
            return Err(conflict_error(format!(
                "Metadata version {} already exists",
                metadata.version()
            )));
        }
        self.write().put_metadata(metadata);
        Ok(())
    }

    async fn get_metadata(
        &mut self,
        metadata_type: MetadataType,
        version: &str,
    ) -> Result<Option<Metadata>, AppError> {
        Ok(self.read().metadata(metadata_type, version))
    }

    async fn update_metadata(&mut self, metadata: &Metadata) -> Result<(), AppError> {
        self.trip(FailPoint::UpdateMetadata)?;
        self.count_metadata_write();
        if !self.read().has_metadata(metadata) {
            return Err(not_found_error(format!(
                "Metadata version {} not found",
                metadata.version()
            )));
        }
        self.write().put_metadata(metadata);
        Ok(())
    }

    async fn delete_metadata(
        &mut self,
        metadata_type: MetadataType,
        versions: &[String],
    ) -> Result<(), AppError> {
        self.trip(FailPoint::DeleteMetadata)?;
        self.count_metadata_write();
        let tables = self.write();
        for version in versions {
            match metadata_type {
                MetadataType::Api => {
                    tables.api_metadata.remove(version);
                }
                MetadataType::Function => {
                    tables.function_metadata.remove(version);
                }
            }
        }
        Ok(())
    }

    async fn batch_get_metadata(
        &mut self,
        metadata_type: MetadataType,
        versions: &[String],
    ) -> Result<Vec<Metadata>, AppError> {
        Ok(self.read().batch_metadata(metadata_type, versions))
    }

    async fn get_release(&mut self, operator_id: &str) -> Result<Option<Release>, AppError> {
        Ok(self.read().releases.get(operator_id).cloned())
    }

    async fn get_releases(&mut self, ids: &[String]) -> Result<Vec<Release>, AppError> {
        let tables = self.read();
        Ok(ids
            .iter()
            .filter_map(|id| tables.releases.get(id).cloned())
            .collect())
    }

    async fn insert_release(&mut self, release: &Release) -> Result<(), AppError> {
        self.trip(FailPoint::InsertRelease)?;
        if self.read().releases.contains_key(release.operator_id()) {
            return Err(conflict_error(format!(
                "Release for operator {} already exists",
                release.operator_id()
            )));
        }
        self.write()
            .releases
            .insert(release.operator_id().to_string(), release.clone());
        Ok(())
    }

    async fn update_release(&mut self, release: &Release) -> Result<(), AppError> {
        self.trip(FailPoint::UpdateRelease)?;
        if !self.read().releases.contains_key(release.operator_id()) {
            return Err(not_found_error(format!(
                "Release for operator {} not found",
                release.operator_id()
            )));
        }
        self.write()
            .releases
            .insert(release.operator_id().to_string(), release.clone());
        Ok(())
    }

    async fn delete_release(&mut self, operator_id: &str) -> Result<(), AppError> {
        self.trip(FailPoint::DeleteRelease)?;
        self.write().releases.remove(operator_id);
        Ok(())
    }

    async fn list_release_ids(&mut self, filter: &OperatorFilter) -> Result<Vec<String>, AppError> {
        let mut matched: Vec<&Release> = self
            .read()
            .releases
            .values()
            .filter(|r| filter.matches(&r.operator))
            .collect();
        matched.sort_by(|a, b| {
            b.release_time
                .cmp(&a.release_time)
                .then_with(|| a.operator_id().cmp(b.operator_id()))
        });
        Ok(matched
            .into_iter()
            .map(|r| r.operator_id().to_string())
            .collect())
    }

    async fn insert_history(&mut self, entry: &ReleaseHistory) -> Result<(), AppError> {
        self.trip(FailPoint::InsertHistory)?;
        self.write()
            .history
            .entry(entry.operator_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn update_history(&mut self, entry: &ReleaseHistory) -> Result<(), AppError> {
        self.trip(FailPoint::UpdateHistory)?;
        let slot = self
            .write()
            .history
            .get_mut(&entry.operator_id)
            .and_then(|entries| entries.iter_mut().find(|e| e.id == entry.id));
        match slot {
            Some(existing) => {
                *existing = entry.clone();
                Ok(())
            }
            None => Err(not_found_error(format!(
                "History entry {} not found",
                entry.id
            ))),
        }
    }

    async fn list_history(&mut self, operator_id: &str) -> Result<Vec<ReleaseHistory>, AppError> {
        let mut entries = self
            .read()
            .history
            .get(operator_id)
            .cloned()
            .unwrap_or_default();
        entries.sort_by_key(|e| e.tag);
        Ok(entries)
    }

    async fn delete_history(&mut self, operator_id: &str) -> Result<(), AppError> {
        self.trip(FailPoint::DeleteHistory)?;
        self.write().history.remove(operator_id);
        Ok(())
    }

    async fn commit(mut self) -> Result<(), AppError> {
        self.trip(FailPoint::Commit)?;
        if let Some(staged) = self.staged.take() {
            *self.guard = staged;
        }
        Ok(())
    }

    async fn rollback(self) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{function_metadata, operator_record};

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let store = MemoryStore::new();
        let metadata = function_metadata("v1", "def main(): pass");
        let record = operator_record("op-1", "adder", &metadata);

        let mut tx = store.begin().await.unwrap();
        tx.insert_metadata(&metadata).await.unwrap();
        tx.insert_operator(&record).await.unwrap();
        tx.commit().await.unwrap();

        let found = store.get_operators(&["op-1".to_string()]).await.unwrap();
        assert_eq!(found.len(), 1);
        let found = store
            .batch_get_metadata(MetadataType::Function, &["v1".to_string()])
            .await
            .unwrap();
        assert_eq!(found, vec![metadata]);
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        let metadata = function_metadata("v1", "def main(): pass");
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_metadata(&metadata).await.unwrap();
            assert!(tx
                .get_metadata(MetadataType::Function, "v1")
                .await
                .unwrap()
                .is_some());
        }
        let found = store
            .batch_get_metadata(MetadataType::Function, &["v1".to_string()])
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_operator_is_conflict() {
        let store = MemoryStore::new();
        let metadata = function_metadata("v1", "def main(): pass");
        let record = operator_record("op-1", "adder", &metadata);

        let mut tx = store.begin().await.unwrap();
        tx.insert_operator(&record).await.unwrap();
        let err = tx.insert_operator(&record).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT");
    }

    #[tokio::test]
    async fn test_fail_point_trips_once() {
        let store = MemoryStore::new();
        store.fail_once(FailPoint::BatchGetMetadata);
        assert!(store
            .batch_get_metadata(MetadataType::Api, &["x".to_string()])
            .await
            .is_err());
        assert!(store
            .batch_get_metadata(MetadataType::Api, &["x".to_string()])
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_fail_point_trips_the_requested_number_of_times() {
        let store = MemoryStore::new();
        store.fail_times(FailPoint::GetOperators, 2);
        assert_eq!(store.armed(FailPoint::GetOperators), 2);

        let ids = ["op-1".to_string()];
        assert!(store.get_operators(&ids).await.is_err());
        assert!(store.get_operators(&ids).await.is_err());
        assert!(store.get_operators(&ids).await.is_ok());
        assert_eq!(store.armed(FailPoint::GetOperators), 0);
    }
}
