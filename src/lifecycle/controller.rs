//! Lifecycle orchestration
//!
//! Every mutating operation resolves the caller, checks permissions and
//! validates its input first, then performs all of its writes in a single
//! transaction. Owner policies are written before commit; audit, rename
//! propagation, domain tagging and delete events run after commit and only
//! log when they fail.
//!
//! Read paths release their transaction before calling the resolver.

use super::diff::{self, EditPlan};
use super::transition::{self, StatusAction};
use super::validate::{check_execution, NamePolicy};
use crate::collaborators::{
    Accessor, AuditEntry, Collaborators, Operation, ResourceType, OPERATOR_DELETED_TOPIC,
};
use crate::config::{ExecuteDefaults, Settings};
use crate::error::{
    not_found_error, validation_error_with, AppError, AppResult, ResultExt, Step,
};
use crate::metadata::{BatchResolver, MetadataStore, ResolveRequest, Resolved};
use crate::models::{
    ApiMetadata, EditRequest, EditResult, ExecuteControl, FunctionMetadata, MarketEntry,
    Metadata, OperatorQuery, OperatorRecord, OperatorStatus, OperatorView, Page, RegisterRequest,
    RegisterResult, RegisterSource, Release, ReleaseHistory, RetryPolicy, StatusChange,
};
use crate::registry::OperatorRegistry;
use crate::release::{PublishOutcome, ReleaseManager};
use crate::store::{OperatorFilter, Store, StoreTx};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use validator::Validate;

/// Entry point for every lifecycle operation
pub struct LifecycleController<S: Store> {
    pub(super) store: Arc<S>,
    pub(super) resolver: BatchResolver<S>,
    pub(super) collaborators: Collaborators,
    pub(super) policy: NamePolicy,
    pub(super) export_timeout: Duration,
    execute_defaults: ExecuteDefaults,
}

/// Outcome of the shared edit step
pub(super) struct AppliedEdit {
    pub record: OperatorRecord,
    pub changed: bool,
    pub forked: bool,
    pub published: Option<PublishOutcome>,
}

impl<S: Store> LifecycleController<S> {
    pub fn new(store: Arc<S>, settings: &Settings, collaborators: Collaborators) -> Self {
        Self {
            resolver: BatchResolver::new(store.clone(), &settings.resolver),
            store,
            collaborators,
            policy: NamePolicy::new(&settings.limits),
            export_timeout: settings.resolver.export_timeout(),
            execute_defaults: settings.execute.clone(),
        }
    }

    pub fn resolver(&self) -> &BatchResolver<S> {
        &self.resolver
    }

    // =========================================================================
    // REGISTRATION
    // =========================================================================

    /// Register one operator per candidate of the source.
    ///
    /// With `direct_publish` the source must define exactly one candidate,
    /// which is published in the same transaction.
    pub async fn register(
        &self,
        user_id: &str,
        request: RegisterRequest,
    ) -> AppResult<Vec<RegisterResult>> {
        let accessor = self.accessor(user_id).await?;
        self.authorize(&accessor, "", Operation::Create).await?;
        if request.direct_publish {
            self.authorize(&accessor, "", Operation::Publish).await?;
        }
        let options = &request.options;
        check_execution(options.is_data_source, options.execution_mode)?;

        let now = Utc::now();
        let candidates = self.candidates(&request.source, user_id, now)?;
        if request.direct_publish && candidates.len() != 1 {
            return Err(validation_error_with(
                "DIRECT_PUBLISH_SINGLE",
                format!(
                    "Direct publish needs exactly one operator, the source defines {}",
                    candidates.len()
                ),
                vec![candidates.len().to_string()],
            ));
        }
        for (name, metadata) in &candidates {
            self.policy.check_name(name)?;
            self.policy.check_description(metadata.description())?;
        }

        let execute_control = options
            .execute_control
            .clone()
            .unwrap_or_else(|| self.default_execute_control());

        let mut tx = self.store.begin().await.at_step(Step::Lookup)?;
        let mut created = Vec::with_capacity(candidates.len());
        for (name, metadata) in candidates {
            let metadata_type = metadata.metadata_type();
            let version = MetadataStore::new(&mut tx).create(metadata).await?;
            let mut record = OperatorRecord {
                operator_id: uuid::Uuid::new_v4().to_string(),
                name,
                metadata_type,
                metadata_version: version,
                status: OperatorStatus::Unpublished,
                operator_type: options.operator_type,
                execution_mode: options.execution_mode,
                is_data_source: options.is_data_source,
                is_internal: request.is_internal,
                execute_control: execute_control.clone(),
                extension: options.extension.clone(),
                create_user: user_id.to_string(),
                create_time: now,
                update_user: user_id.to_string(),
                update_time: now,
            };
            OperatorRegistry::new(&mut tx).insert(&record).await?;
            if request.direct_publish {
                publish_in_tx(&mut tx, &mut record, user_id, now).await?;
            }
            created.push(record);
        }
        for record in &created {
            self.create_owner_policy(&accessor, record).await?;
        }
        tx.commit().await.at_step(Step::Commit)?;

        for record in &created {
            if let Some(domain) = &request.business_domain {
                if let Err(e) = self
                    .collaborators
                    .domains
                    .associate(domain, &record.operator_id, ResourceType::Operator)
                    .await
                {
                    warn!(
                        "Failed to tag operator {} with domain {}: {}",
                        record.operator_id, domain, e
                    );
                }
            }
            self.audit(&accessor, Operation::Create, record, None);
            if request.direct_publish {
                self.audit(
                    &accessor,
                    Operation::Publish,
                    record,
                    Some("direct publish".to_string()),
                );
            }
        }

        info!("Registered {} operator(s) for {}", created.len(), user_id);
        Ok(created
            .into_iter()
            .map(|record| RegisterResult {
                operator_id: record.operator_id,
                name: record.name,
                metadata_version: record.metadata_version,
                status: record.status,
            })
            .collect())
    }

    fn candidates(
        &self,
        source: &RegisterSource,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Vec<(String, Metadata)>> {
        match source {
            RegisterSource::OpenApi { document } => {
                let operations = self.collaborators.openapi.parse(document)?;
                Ok(operations
                    .into_iter()
                    .map(|op| {
                        let metadata = Metadata::Api(ApiMetadata {
                            version: String::new(),
                            summary: op.summary,
                            description: op.description,
                            server_url: op.server_url,
                            path: op.path,
                            method: op.method,
                            api_spec: op.spec,
                            create_user: user_id.to_string(),
                            create_time: now,
                            update_user: user_id.to_string(),
                            update_time: now,
                        });
                        (op.name, metadata)
                    })
                    .collect())
            }
            RegisterSource::Function(input) => {
                input.validate()?;
                let metadata = Metadata::Function(FunctionMetadata {
                    version: String::new(),
                    summary: input.name.clone(),
                    description: input.description.clone(),
                    script_type: input.script_type.clone(),
                    code: input.code.clone(),
                    dependencies: input.dependencies.clone(),
                    create_user: user_id.to_string(),
                    create_time: now,
                    update_user: user_id.to_string(),
                    update_time: now,
                });
                Ok(vec![(input.name.clone(), metadata)])
            }
        }
    }

    fn default_execute_control(&self) -> ExecuteControl {
        ExecuteControl {
            timeout_ms: self.execute_defaults.timeout_ms,
            retry_policy: RetryPolicy {
                max_attempts: self.execute_defaults.retry_attempts,
                ..RetryPolicy::default()
            },
        }
    }

    // =========================================================================
    // EDIT
    // =========================================================================

    /// Apply an edit; an edit that changes nothing writes nothing
    pub async fn edit(&self, user_id: &str, edit: EditRequest) -> AppResult<EditResult> {
        let accessor = self.accessor(user_id).await?;
        self.authorize(&accessor, &edit.operator_id, Operation::Modify)
            .await?;
        if edit.publish {
            self.authorize(&accessor, &edit.operator_id, Operation::Publish)
                .await?;
        }
        if let Some(name) = &edit.name {
            self.policy.check_name(name)?;
        }
        if let Some(description) = &edit.description {
            self.policy.check_description(description)?;
        }

        let now = Utc::now();
        let mut tx = self.store.begin().await.at_step(Step::Lookup)?;
        let record = OperatorRegistry::new(&mut tx).lock(&edit.operator_id).await?;
        let applied = self.apply_edit(&mut tx, record, &edit, user_id, now).await?;

        if !applied.changed && applied.published.is_none() {
            tx.rollback().await.at_step(Step::Commit)?;
            debug!("Edit of operator {} changed nothing", edit.operator_id);
            return Ok(EditResult {
                operator_id: applied.record.operator_id,
                metadata_version: applied.record.metadata_version,
                status: applied.record.status,
                changed: false,
                forked: false,
            });
        }
        tx.commit().await.at_step(Step::Commit)?;

        if applied.changed {
            let detail = applied
                .forked
                .then(|| format!("new version {}", applied.record.metadata_version));
            self.audit(&accessor, Operation::Modify, &applied.record, detail);
        }
        if let Some(outcome) = &applied.published {
            self.notify_rename(outcome).await;
            self.audit(&accessor, Operation::Publish, &applied.record, None);
        }

        info!(
            "Edited operator {} (version {}, status {}, forked: {})",
            applied.record.operator_id,
            applied.record.metadata_version,
            applied.record.status,
            applied.forked
        );
        Ok(EditResult {
            operator_id: applied.record.operator_id,
            metadata_version: applied.record.metadata_version,
            status: applied.record.status,
            changed: applied.changed,
            forked: applied.forked,
        })
    }

    /// Diff `edit` against the locked row, write what changed and publish
    /// when asked to
    pub(super) async fn apply_edit(
        &self,
        tx: &mut S::Tx,
        record: OperatorRecord,
        edit: &EditRequest,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> AppResult<AppliedEdit> {
        if record.is_internal {
            return Err(AppError::Forbidden(format!(
                "Operator {} is internal and cannot be edited",
                record.operator_id
            )));
        }

        let current = MetadataStore::new(tx)
            .get(record.metadata_type, &record.metadata_version)
            .await?
            .ok_or_else(|| AppError::Internal {
                step: Some(Step::Lookup),
                message: format!(
                    "metadata version {} of operator {} is missing",
                    record.metadata_version, record.operator_id
                ),
            })?;

        let plan = diff::plan(&record, &current, edit)?;
        check_execution(plan.record.is_data_source, plan.record.execution_mode)?;
        let changed = plan.changed();
        let EditPlan {
            record: mut next,
            mut metadata,
            metadata_changed,
            ..
        } = plan;

        let mut forked = false;
        if changed {
            if metadata_changed {
                let referenced = ReleaseManager::new(tx)
                    .referenced_versions(&record.operator_id)
                    .await?
                    .contains(&record.metadata_version);
                if diff::should_fork(record.status, referenced) {
                    metadata.set_version(String::new());
                    metadata.stamp_created(user_id, now);
                    next.metadata_version = MetadataStore::new(tx).create(metadata).await?;
                    forked = true;
                } else {
                    metadata.stamp_updated(user_id, now);
                    MetadataStore::new(tx).update(&metadata).await?;
                }
            }
            next.status = transition::after_edit(record.status);
            next.touch(user_id, now);
            OperatorRegistry::new(tx).update(&next).await?;
        }

        let published = if edit.publish {
            Some(publish_in_tx(tx, &mut next, user_id, now).await?)
        } else {
            None
        };

        Ok(AppliedEdit {
            record: next,
            changed,
            forked,
            published,
        })
    }

    // =========================================================================
    // STATUS
    // =========================================================================

    /// Apply several status changes atomically.
    ///
    /// Returns the resulting status of every operator in request order.
    pub async fn update_status(
        &self,
        user_id: &str,
        changes: Vec<StatusChange>,
    ) -> AppResult<Vec<StatusChange>> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        let accessor = self.accessor(user_id).await?;
        for change in &changes {
            let operation = match transition::check_target(change.status)? {
                StatusAction::Publish => Operation::Publish,
                StatusAction::Unpublish => Operation::Unpublish,
            };
            self.authorize(&accessor, &change.operator_id, operation)
                .await?;
        }

        let now = Utc::now();
        let mut tx = self.store.begin().await.at_step(Step::Lookup)?;
        let mut applied = Vec::with_capacity(changes.len());
        let mut published = Vec::new();
        for change in &changes {
            let mut record = OperatorRegistry::new(&mut tx)
                .lock(&change.operator_id)
                .await?;
            match transition::requested(record.status, change.status)? {
                StatusAction::Publish => {
                    published.push(publish_in_tx(&mut tx, &mut record, user_id, now).await?);
                }
                StatusAction::Unpublish => {
                    record.status = OperatorStatus::Offline;
                    record.touch(user_id, now);
                    OperatorRegistry::new(&mut tx).update(&record).await?;
                    ReleaseManager::new(&mut tx)
                        .unpublish(&record.operator_id, user_id, now)
                        .await?;
                }
            }
            applied.push(record);
        }
        tx.commit().await.at_step(Step::Commit)?;

        for outcome in &published {
            self.notify_rename(outcome).await;
        }
        for record in &applied {
            let operation = match record.status {
                OperatorStatus::Published => Operation::Publish,
                _ => Operation::Unpublish,
            };
            self.audit(&accessor, operation, record, None);
            info!("Operator {} is now {}", record.operator_id, record.status);
        }

        Ok(applied
            .into_iter()
            .map(|record| StatusChange {
                operator_id: record.operator_id,
                status: record.status,
            })
            .collect())
    }

    pub async fn publish(&self, user_id: &str, operator_id: &str) -> AppResult<OperatorStatus> {
        self.set_status(user_id, operator_id, OperatorStatus::Published)
            .await
    }

    pub async fn unpublish(&self, user_id: &str, operator_id: &str) -> AppResult<OperatorStatus> {
        self.set_status(user_id, operator_id, OperatorStatus::Offline)
            .await
    }

    async fn set_status(
        &self,
        user_id: &str,
        operator_id: &str,
        status: OperatorStatus,
    ) -> AppResult<OperatorStatus> {
        let change = StatusChange {
            operator_id: operator_id.to_string(),
            status,
        };
        let mut applied = self.update_status(user_id, vec![change]).await?;
        applied
            .pop()
            .map(|change| change.status)
            .ok_or_else(|| AppError::internal("status update returned no result"))
    }

    // =========================================================================
    // DELETE
    // =========================================================================

    /// Delete operators with their release, history and every metadata
    /// version they reference, atomically
    pub async fn delete(&self, user_id: &str, operator_ids: Vec<String>) -> AppResult<()> {
        let ids = dedup(operator_ids);
        if ids.is_empty() {
            return Ok(());
        }
        let accessor = self.accessor(user_id).await?;
        for id in &ids {
            self.authorize(&accessor, id, Operation::Delete).await?;
        }

        let mut tx = self.store.begin().await.at_step(Step::Lookup)?;
        let mut removed = Vec::with_capacity(ids.len());
        for id in &ids {
            let record = OperatorRegistry::new(&mut tx).lock(id).await?;
            if record.is_internal {
                return Err(AppError::Forbidden(format!(
                    "Operator {} is internal and cannot be deleted",
                    id
                )));
            }
            transition::check_delete(record.status)?;

            let mut versions = ReleaseManager::new(&mut tx).referenced_versions(id).await?;
            versions.insert(record.metadata_version.clone());
            let versions: Vec<String> = versions.into_iter().collect();

            ReleaseManager::new(&mut tx).purge(id).await?;
            MetadataStore::new(&mut tx)
                .delete(record.metadata_type, &versions)
                .await?;
            OperatorRegistry::new(&mut tx).delete(id).await?;
            debug!("Deleted operator {} with {} version(s)", id, versions.len());
            removed.push(record);
        }
        tx.commit().await.at_step(Step::Commit)?;

        for record in &removed {
            let payload = json!({
                "operator_id": record.operator_id,
                "name": record.name,
                "metadata_type": record.metadata_type,
                "deleted_by": user_id,
            });
            if let Err(e) = self
                .collaborators
                .bus
                .publish(OPERATOR_DELETED_TOPIC, payload)
                .await
            {
                warn!(
                    "Failed to announce deletion of operator {}: {}",
                    record.operator_id, e
                );
            }
            self.audit(&accessor, Operation::Delete, record, None);
        }
        if let Err(e) = self
            .collaborators
            .access
            .delete_policy(&ids, ResourceType::Operator)
            .await
        {
            warn!("Failed to drop policies of deleted operators: {}", e);
        }
        if let Err(e) = self
            .collaborators
            .domains
            .disassociate(&ids, ResourceType::Operator)
            .await
        {
            warn!("Failed to untag deleted operators: {}", e);
        }

        info!("Deleted {} operator(s)", removed.len());
        Ok(())
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Operator detail with its working metadata
    pub async fn get_operator(&self, user_id: &str, operator_id: &str) -> AppResult<OperatorView> {
        let accessor = self.accessor(user_id).await?;
        self.authorize(&accessor, operator_id, Operation::View)
            .await?;

        let record = self
            .store
            .get_operators(&[operator_id.to_string()])
            .await
            .at_step(Step::Lookup)?
            .into_iter()
            .next()
            .ok_or_else(|| not_found_error(format!("Operator {} not found", operator_id)))?;

        let mut resolved = self
            .resolver
            .resolve(
                ResolveRequest::new()
                    .with(record.metadata_type.into(), record.metadata_version.clone()),
            )
            .await?;
        Ok(OperatorView {
            metadata: resolved.remove(&record.metadata_version),
            operator: record,
        })
    }

    /// Paged, permission-filtered listing of registry rows
    pub async fn list_operators(
        &self,
        user_id: &str,
        query: OperatorQuery,
    ) -> AppResult<Page<OperatorView>> {
        query.validate()?;
        let accessor = self.accessor(user_id).await?;

        let filter = OperatorFilter::from(&query);
        let mut tx = self.store.begin().await.at_step(Step::Lookup)?;
        let ids = OperatorRegistry::new(&mut tx).list_ids(&filter).await?;
        tx.rollback().await.at_step(Step::Lookup)?;

        let ids = self.visible(&accessor, ids, &query.business_domains).await?;
        let (total, page_ids) = paginate(ids, query.page, query.page_size);

        let records = self
            .store
            .get_operators(&page_ids)
            .await
            .at_step(Step::Lookup)?;
        let records = in_order(&page_ids, records, |r| r.operator_id.clone());

        let resolved = self
            .resolve_versions(records.iter().map(|r| (r, r.metadata_version.as_str())))
            .await?;
        let items = records
            .into_iter()
            .map(|operator| OperatorView {
                metadata: resolved.get(&operator.metadata_version).cloned(),
                operator,
            })
            .collect();

        Ok(Page {
            items,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    /// Paged listing of published releases
    pub async fn list_market(
        &self,
        user_id: &str,
        query: OperatorQuery,
    ) -> AppResult<Page<MarketEntry>> {
        query.validate()?;
        let accessor = self.accessor(user_id).await?;

        let mut filter = OperatorFilter::from(&query);
        filter.status = Some(OperatorStatus::Published);
        let mut tx = self.store.begin().await.at_step(Step::Lookup)?;
        let ids = ReleaseManager::new(&mut tx).list_ids(&filter).await?;
        tx.rollback().await.at_step(Step::Lookup)?;

        let ids = self.visible(&accessor, ids, &query.business_domains).await?;
        let (total, page_ids) = paginate(ids, query.page, query.page_size);

        let mut tx = self.store.begin().await.at_step(Step::Lookup)?;
        let releases = ReleaseManager::new(&mut tx).get_many(&page_ids).await?;
        tx.rollback().await.at_step(Step::Lookup)?;
        let releases = in_order(&page_ids, releases, |r| r.operator_id().to_string());

        let resolved = self
            .resolve_versions(releases.iter().map(|r| (&r.operator, r.metadata_version())))
            .await?;
        let items = releases
            .into_iter()
            .map(|release| MarketEntry {
                metadata: resolved.get(release.metadata_version()).cloned(),
                release,
            })
            .collect();

        Ok(Page {
            items,
            total,
            page: query.page,
            page_size: query.page_size,
        })
    }

    /// The live release of one operator
    pub async fn market_detail(&self, user_id: &str, operator_id: &str) -> AppResult<MarketEntry> {
        let accessor = self.accessor(user_id).await?;
        self.authorize(&accessor, operator_id, Operation::View)
            .await?;

        let mut tx = self.store.begin().await.at_step(Step::Lookup)?;
        let release = ReleaseManager::new(&mut tx).get(operator_id).await?;
        tx.rollback().await.at_step(Step::Lookup)?;
        let release = release
            .filter(|r| r.status() == OperatorStatus::Published)
            .ok_or_else(|| {
                not_found_error(format!("Operator {} is not on the market", operator_id))
            })?;

        let mut resolved = self
            .resolve_versions(std::iter::once((&release.operator, release.metadata_version())))
            .await?;
        Ok(MarketEntry {
            metadata: resolved.remove(release.metadata_version()),
            release,
        })
    }

    /// Release history ordered by tag ascending
    pub async fn list_history(
        &self,
        user_id: &str,
        operator_id: &str,
    ) -> AppResult<Vec<ReleaseHistory>> {
        let accessor = self.accessor(user_id).await?;
        self.authorize(&accessor, operator_id, Operation::View)
            .await?;

        let mut tx = self.store.begin().await.at_step(Step::Lookup)?;
        OperatorRegistry::new(&mut tx).require(operator_id).await?;
        let history = ReleaseManager::new(&mut tx).history(operator_id).await?;
        tx.rollback().await.at_step(Step::Lookup)?;
        Ok(history)
    }

    /// The release as it was archived under `tag`
    pub async fn history_snapshot(
        &self,
        user_id: &str,
        operator_id: &str,
        tag: u64,
    ) -> AppResult<Release> {
        let accessor = self.accessor(user_id).await?;
        self.authorize(&accessor, operator_id, Operation::View)
            .await?;

        let mut tx = self.store.begin().await.at_step(Step::Lookup)?;
        let release = ReleaseManager::new(&mut tx).snapshot_at(operator_id, tag).await?;
        tx.rollback().await.at_step(Step::Lookup)?;
        Ok(release)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    pub(super) async fn accessor(&self, user_id: &str) -> AppResult<Accessor> {
        self.collaborators.access.resolve_accessor(user_id).await
    }

    pub(super) async fn authorize(
        &self,
        accessor: &Accessor,
        resource_id: &str,
        operation: Operation,
    ) -> AppResult<()> {
        let allowed = self
            .collaborators
            .access
            .check_permission(accessor, resource_id, ResourceType::Operator, operation)
            .await?;
        if allowed {
            return Ok(());
        }
        let target = if resource_id.is_empty() {
            "operators".to_string()
        } else {
            format!("operator {}", resource_id)
        };
        Err(AppError::Forbidden(format!(
            "{} may not {} {}",
            accessor.user_id, operation, target
        )))
    }

    pub(super) async fn create_owner_policy(
        &self,
        accessor: &Accessor,
        record: &OperatorRecord,
    ) -> AppResult<()> {
        self.collaborators
            .access
            .create_owner_policy(
                accessor,
                &record.operator_id,
                &record.name,
                ResourceType::Operator,
            )
            .await
            .at_step(Step::PolicyWrite)
    }

    pub(super) async fn notify_rename(&self, outcome: &PublishOutcome) {
        if !outcome.name_changed() {
            return;
        }
        let release = &outcome.release;
        if let Err(e) = self
            .collaborators
            .access
            .notify_resource_change(
                release.operator_id(),
                &release.operator.name,
                ResourceType::Operator,
            )
            .await
        {
            warn!(
                "Failed to propagate new name of operator {}: {}",
                release.operator_id(),
                e
            );
        }
    }

    pub(super) fn audit(
        &self,
        accessor: &Accessor,
        operation: Operation,
        record: &OperatorRecord,
        detail: Option<String>,
    ) {
        self.collaborators.audit.record(AuditEntry {
            operation,
            resource_type: ResourceType::Operator,
            resource_id: record.operator_id.clone(),
            resource_name: record.name.clone(),
            user_id: accessor.user_id.clone(),
            detail,
            at: Utc::now(),
        });
    }

    /// Ids the accessor may view, restricted to the given business domains
    async fn visible(
        &self,
        accessor: &Accessor,
        ids: Vec<String>,
        domains: &[String],
    ) -> AppResult<Vec<String>> {
        let mut ids = self
            .collaborators
            .access
            .filter_by_permission(accessor, ids, ResourceType::Operator, Operation::View)
            .await?;
        if !domains.is_empty() {
            let members: HashSet<String> = self
                .collaborators
                .domains
                .batch_resource_list(domains, ResourceType::Operator)
                .await?
                .into_iter()
                .collect();
            ids.retain(|id| members.contains(id));
        }
        Ok(ids)
    }

    async fn resolve_versions<'a>(
        &self,
        entries: impl Iterator<Item = (&'a OperatorRecord, &'a str)>,
    ) -> AppResult<Resolved> {
        let mut request = ResolveRequest::new();
        for (record, version) in entries {
            request.add(record.metadata_type.into(), version);
        }
        self.resolver.resolve(request).await
    }
}

/// Name check, registry status and Release/history writes of one publish
pub(super) async fn publish_in_tx<T: StoreTx>(
    tx: &mut T,
    record: &mut OperatorRecord,
    user_id: &str,
    now: DateTime<Utc>,
) -> AppResult<PublishOutcome> {
    transition::check_publish(record.status)?;
    OperatorRegistry::new(tx)
        .ensure_name_available(&record.name, &record.operator_id)
        .await?;
    record.status = OperatorStatus::Published;
    record.touch(user_id, now);
    OperatorRegistry::new(tx).update(record).await?;
    ReleaseManager::new(tx).publish(record, user_id, now).await
}

/// Drop duplicates, keeping first occurrences in order
pub(super) fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

fn paginate(ids: Vec<String>, page: u32, page_size: u32) -> (u64, Vec<String>) {
    let total = ids.len() as u64;
    let skip = (page.saturating_sub(1) as usize).saturating_mul(page_size as usize);
    let page_ids = ids.into_iter().skip(skip).take(page_size as usize).collect();
    (total, page_ids)
}

/// Reorder `items` to follow `ids`, dropping ids with no item
fn in_order<T>(ids: &[String], items: Vec<T>, key: impl Fn(&T) -> String) -> Vec<T> {
    let mut by_id: HashMap<String, T> = items.into_iter().map(|item| (key(&item), item)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate_bounds() {
        let ids: Vec<String> = (0..5).map(|i| i.to_string()).collect();
        assert_eq!(paginate(ids.clone(), 1, 2), (5, vec!["0".to_string(), "1".to_string()]));
        assert_eq!(paginate(ids.clone(), 3, 2), (5, vec!["4".to_string()]));
        assert_eq!(paginate(ids, 4, 2), (5, vec![]));
    }

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let ids = vec!["b", "a", "b", "", "c", "a"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(dedup(ids), vec!["b", "a", "c"]);
    }
}
