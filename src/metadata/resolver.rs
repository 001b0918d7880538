//! Concurrent batch resolution of metadata
//!
//! A request groups identifiers by source type. Each non-empty group is
//! fetched by its own task, bounded by a shared semaphore, in pages of
//! `page_size`. All tasks write into one result map; failures go to a
//! separate mailbox and raise a flag that makes the remaining work stop
//! early. Operator ids are resolved to their working (type, version) and
//! fetched through a nested resolution.
//!
//! Resolution reads committed state only and must not be awaited while the
//! caller holds a transaction on a store that serializes transactions.

use crate::config::ResolverConfig;
use crate::error::{AppError, AppResult, Step};
use crate::models::{Metadata, MetadataType};
use crate::store::Store;
use futures::future::{join_all, BoxFuture, FutureExt};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

/// Identifier -> resolved metadata
pub type Resolved = HashMap<String, Metadata>;

/// Kind of identifier in a resolve request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceType {
    /// API metadata version
    Api,
    /// Function metadata version
    Function,
    /// Operator id
    Operator,
}

impl SourceType {
    fn metadata_type(&self) -> Option<MetadataType> {
        match self {
            SourceType::Api => Some(MetadataType::Api),
            SourceType::Function => Some(MetadataType::Function),
            SourceType::Operator => None,
        }
    }
}

impl From<MetadataType> for SourceType {
    fn from(metadata_type: MetadataType) -> Self {
        match metadata_type {
            MetadataType::Api => SourceType::Api,
            MetadataType::Function => SourceType::Function,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceType::Api => "api",
            SourceType::Function => "function",
            SourceType::Operator => "operator",
        };
        f.write_str(name)
    }
}

/// Identifiers to resolve, deduplicated per source type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveRequest {
    partitions: BTreeMap<SourceType, BTreeSet<String>>,
}

impl ResolveRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: SourceType, id: impl Into<String>) -> &mut Self {
        let id = id.into();
        if !id.is_empty() {
            self.partitions.entry(source).or_default().insert(id);
        }
        self
    }

    pub fn with(mut self, source: SourceType, id: impl Into<String>) -> Self {
        self.add(source, id);
        self
    }

    pub fn extend<I>(&mut self, source: SourceType, ids: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        for id in ids {
            self.add(source, id);
        }
        self
    }

    /// Total number of distinct identifiers
    pub fn len(&self) -> usize {
        self.partitions.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct Shared {
    results: Mutex<Resolved>,
    errors: Mutex<Vec<AppError>>,
    failed: AtomicBool,
}

impl Shared {
    fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    async fn fail(&self, err: AppError) {
        self.failed.store(true, Ordering::SeqCst);
        self.errors.lock().await.push(err);
    }
}

/// Aborts still-running partition tasks when resolution is abandoned
struct TaskGuard(Vec<AbortHandle>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Fan-out/fan-in metadata resolver
pub struct BatchResolver<S: Store> {
    store: Arc<S>,
    page_size: usize,
    permits: Arc<Semaphore>,
}

impl<S: Store> Clone for BatchResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            page_size: self.page_size,
            permits: self.permits.clone(),
        }
    }
}

impl<S: Store> BatchResolver<S> {
    pub fn new(store: Arc<S>, config: &ResolverConfig) -> Self {
        Self {
            store,
            page_size: config.page_size.max(1),
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
        }
    }

    /// Resolve every identifier of the request.
    ///
    /// Missing identifiers are simply absent from the map. On failure the
    /// first recorded error is returned and the others are logged.
    pub fn resolve(&self, request: ResolveRequest) -> BoxFuture<'static, AppResult<Resolved>> {
        let this = self.clone();
        async move { this.run(request).await }.boxed()
    }

    /// Like `resolve`, abandoned with an internal error once `deadline` passes
    pub async fn resolve_within(
        &self,
        request: ResolveRequest,
        deadline: Duration,
    ) -> AppResult<Resolved> {
        match tokio::time::timeout(deadline, self.resolve(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Metadata resolution exceeded {:?}, discarding partial results", deadline);
                Err(AppError::Internal {
                    step: Some(Step::Resolve),
                    message: format!("resolution did not finish within {:?}", deadline),
                })
            }
        }
    }

    async fn run(self, request: ResolveRequest) -> AppResult<Resolved> {
        if request.is_empty() {
            return Ok(Resolved::new());
        }

        let shared = Arc::new(Shared::default());
        let handles: Vec<_> = request
            .partitions
            .into_iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(source, ids)| {
                let this = self.clone();
                let shared = shared.clone();
                let ids: Vec<String> = ids.into_iter().collect();
                tokio::spawn(async move { this.run_partition(source, ids, &shared).await })
            })
            .collect();

        let guard = TaskGuard(handles.iter().map(|h| h.abort_handle()).collect());
        let outcomes = join_all(handles).await;
        drop(guard);

        for outcome in outcomes {
            if let Err(join_err) = outcome {
                shared
                    .fail(AppError::internal(format!("resolver task failed: {}", join_err)))
                    .await;
            }
        }

        let mut errors = std::mem::take(&mut *shared.errors.lock().await);
        if !errors.is_empty() {
            for (i, err) in errors.iter().enumerate() {
                warn!("Metadata resolution error {}/{}: {}", i + 1, errors.len(), err);
            }
            return Err(as_internal(errors.remove(0)));
        }

        let resolved = std::mem::take(&mut *shared.results.lock().await);
        Ok(resolved)
    }

    async fn run_partition(&self, source: SourceType, ids: Vec<String>, shared: &Shared) {
        let permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                shared
                    .fail(AppError::internal("resolver semaphore closed"))
                    .await;
                return;
            }
        };
        if shared.failed() {
            return;
        }

        debug!("Resolving {} {} identifiers", ids.len(), source);
        // Failures are recorded before the permit is released so that queued
        // partitions observe the flag
        match source.metadata_type() {
            Some(metadata_type) => {
                if let Err(err) = self.fetch_metadata(metadata_type, &ids, shared).await {
                    shared.fail(err).await;
                }
                drop(permit);
            }
            None => {
                if let Err(err) = self.fetch_operators(&ids, permit, shared).await {
                    shared.fail(err).await;
                }
            }
        }
    }

    async fn fetch_metadata(
        &self,
        metadata_type: MetadataType,
        versions: &[String],
        shared: &Shared,
    ) -> AppResult<()> {
        for page in versions.chunks(self.page_size) {
            if shared.failed() {
                return Ok(());
            }
            let found = self.store.batch_get_metadata(metadata_type, page).await?;
            let mut results = shared.results.lock().await;
            for metadata in found {
                results.insert(metadata.version().to_string(), metadata);
            }
        }
        Ok(())
    }

    /// Load operator rows, then resolve their working versions and key the
    /// results by operator id
    async fn fetch_operators(
        &self,
        operator_ids: &[String],
        permit: OwnedSemaphorePermit,
        shared: &Shared,
    ) -> AppResult<()> {
        let mut records = Vec::with_capacity(operator_ids.len());
        for page in operator_ids.chunks(self.page_size) {
            if shared.failed() {
                return Ok(());
            }
            match self.store.get_operators(page).await {
                Ok(found) => records.extend(found),
                Err(err) => {
                    shared.fail(err).await;
                    return Ok(());
                }
            }
        }
        // The nested resolution needs permits of its own
        drop(permit);

        let mut nested = ResolveRequest::new();
        let mut owners: HashMap<String, Vec<String>> = HashMap::new();
        for record in records {
            nested.add(record.metadata_type.into(), record.metadata_version.clone());
            owners
                .entry(record.metadata_version)
                .or_default()
                .push(record.operator_id);
        }
        if nested.is_empty() || shared.failed() {
            return Ok(());
        }

        let resolved = self.resolve(nested).await?;
        let mut results = shared.results.lock().await;
        for (version, operator_ids) in owners {
            if let Some(metadata) = resolved.get(&version) {
                for operator_id in operator_ids {
                    results.insert(operator_id, metadata.clone());
                }
            }
        }
        Ok(())
    }
}

fn as_internal(err: AppError) -> AppError {
    match err {
        AppError::Internal { .. } | AppError::Database(_) | AppError::Pool(_) => {
            err.at_step(Step::Resolve)
        }
        other => AppError::Internal {
            step: Some(Step::Resolve),
            message: other.to_string(),
        },
    }
}
