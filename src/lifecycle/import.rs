//! Import and export of operator bundles
//!
//! Export walks the component graph of composite operators breadth-first and
//! bundles every reached operator with its working metadata. Import applies
//! each bundle item in its own transaction.

use super::controller::{dedup, publish_in_tx, LifecycleController};
use super::diff;
use super::validate::check_execution;
use crate::collaborators::{Accessor, Operation, ResourceType};
use crate::error::{
    conflict_error, not_found_error, validation_error_with, AppError, AppResult, ErrorResponse,
    ResultExt, Step,
};
use crate::metadata::{MetadataStore, ResolveRequest, SourceType};
use crate::models::{
    EditRequest, ExportBundle, ExportItem, ImportAction, ImportItemResult, ImportMode,
    OperatorRecord, OperatorStatus,
};
use crate::registry::OperatorRegistry;
use crate::store::{Store, StoreTx};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

impl<S: Store> LifecycleController<S> {
    /// Export the requested operators and, transitively, their components
    pub async fn export(&self, user_id: &str, operator_ids: Vec<String>) -> AppResult<ExportBundle> {
        let accessor = self.accessor(user_id).await?;
        let requested = dedup(operator_ids);
        let permitted: HashSet<String> = self
            .collaborators
            .access
            .filter_by_permission(
                &accessor,
                requested.clone(),
                ResourceType::Operator,
                Operation::Export,
            )
            .await?
            .into_iter()
            .collect();
        if let Some(denied) = requested.iter().find(|id| !permitted.contains(*id)) {
            return Err(AppError::Forbidden(format!(
                "{} may not export operator {}",
                accessor.user_id, denied
            )));
        }

        let items = match tokio::time::timeout(self.export_timeout, self.collect_export(requested))
            .await
        {
            Ok(items) => items?,
            Err(_) => {
                warn!("Export exceeded {:?}, abandoning", self.export_timeout);
                return Err(AppError::Internal {
                    step: Some(Step::Resolve),
                    message: format!("export did not finish within {:?}", self.export_timeout),
                });
            }
        };

        info!("Exported {} operator(s) for {}", items.len(), user_id);
        Ok(ExportBundle {
            exported_at: Utc::now(),
            items,
        })
    }

    async fn collect_export(&self, roots: Vec<String>) -> AppResult<Vec<ExportItem>> {
        let mut visited: HashSet<String> = roots.iter().cloned().collect();
        let mut frontier = roots;
        let mut items = Vec::new();

        while !frontier.is_empty() {
            let mut request = ResolveRequest::new();
            request.extend(SourceType::Operator, frontier.iter().cloned());
            let mut resolved = self.resolver.resolve(request).await?;
            let mut records: HashMap<String, OperatorRecord> = self
                .store
                .get_operators(&frontier)
                .await
                .at_step(Step::Resolve)?
                .into_iter()
                .map(|r| (r.operator_id.clone(), r))
                .collect();

            let mut next = Vec::new();
            for id in frontier {
                let operator = records
                    .remove(&id)
                    .ok_or_else(|| not_found_error(format!("Operator {} not found", id)))?;
                let metadata = resolved.remove(&id).ok_or_else(|| {
                    not_found_error(format!("Metadata of operator {} not found", id))
                })?;
                for component in operator.component_ids() {
                    if visited.insert(component.clone()) {
                        next.push(component);
                    }
                }
                items.push(ExportItem { operator, metadata });
            }
            debug!("Export reached {} operator(s), {} queued", items.len(), next.len());
            frontier = next;
        }
        Ok(items)
    }

    /// Import a bundle; every item succeeds or fails on its own
    pub async fn import(
        &self,
        user_id: &str,
        bundle: ExportBundle,
        mode: ImportMode,
    ) -> AppResult<Vec<ImportItemResult>> {
        let accessor = self.accessor(user_id).await?;
        self.authorize(&accessor, "", Operation::Import).await?;

        let total = bundle.items.len();
        let mut results = Vec::with_capacity(total);
        for item in bundle.items {
            let operator_id = item.operator.operator_id.clone();
            let result = match self.import_item(&accessor, item, mode).await {
                Ok((action, status)) => ImportItemResult {
                    operator_id,
                    action: Some(action),
                    status: Some(status),
                    error: None,
                },
                Err(err) => {
                    warn!("Import of operator {} failed: {}", operator_id, err);
                    ImportItemResult {
                        operator_id,
                        action: None,
                        status: None,
                        error: Some(ErrorResponse::from(&err)),
                    }
                }
            };
            results.push(result);
        }

        let imported = results.iter().filter(|r| r.is_ok()).count();
        info!("Imported {}/{} operator(s) for {}", imported, total, user_id);
        Ok(results)
    }

    async fn import_item(
        &self,
        accessor: &Accessor,
        item: ExportItem,
        mode: ImportMode,
    ) -> AppResult<(ImportAction, OperatorStatus)> {
        let ExportItem { operator, metadata } = item;
        if operator.metadata_type != metadata.metadata_type() {
            return Err(validation_error_with(
                "METADATA_TYPE_MISMATCH",
                format!(
                    "Operator {} declares {} metadata but carries {}",
                    operator.operator_id,
                    operator.metadata_type,
                    metadata.metadata_type()
                ),
                vec![
                    operator.metadata_type.to_string(),
                    metadata.metadata_type().to_string(),
                ],
            ));
        }
        self.policy.check_name(&operator.name)?;
        self.policy.check_description(metadata.description())?;
        check_execution(operator.is_data_source, operator.execution_mode)?;

        let user_id = accessor.user_id.as_str();
        let publish = operator.status == OperatorStatus::Published;
        let now = Utc::now();

        let mut tx = self.store.begin().await.at_step(Step::Lookup)?;
        let existing = OperatorRegistry::new(&mut tx)
            .get(&operator.operator_id)
            .await?;

        let (action, record, outcome) = match existing {
            Some(_) if mode == ImportMode::Create => {
                return Err(conflict_error(format!(
                    "Operator {} already exists",
                    operator.operator_id
                )));
            }
            Some(_) => {
                let current = OperatorRegistry::new(&mut tx)
                    .lock(&operator.operator_id)
                    .await?;
                let edit = EditRequest {
                    operator_id: operator.operator_id.clone(),
                    name: Some(operator.name.clone()),
                    description: Some(metadata.description().to_string()),
                    summary: Some(metadata.summary().to_string()),
                    content: Some(diff::patch_from(&metadata)),
                    execution_mode: Some(operator.execution_mode),
                    is_data_source: Some(operator.is_data_source),
                    execute_control: Some(operator.execute_control.clone()),
                    extension: Some(operator.extension.clone()),
                    publish: false,
                };
                let applied = self.apply_edit(&mut tx, current, &edit, user_id, now).await?;
                let mut record = applied.record;
                let outcome = if publish && record.status != OperatorStatus::Published {
                    Some(publish_in_tx(&mut tx, &mut record, user_id, now).await?)
                } else {
                    None
                };
                (ImportAction::Updated, record, outcome)
            }
            None => {
                let mut metadata = metadata;
                let taken = MetadataStore::new(&mut tx)
                    .get(metadata.metadata_type(), metadata.version())
                    .await?
                    .is_some();
                if taken {
                    metadata.set_version(String::new());
                }
                metadata.stamp_created(user_id, now);
                let version = MetadataStore::new(&mut tx).create(metadata).await?;

                let mut record = operator;
                record.metadata_version = version;
                record.status = OperatorStatus::Unpublished;
                record.create_user = user_id.to_string();
                record.create_time = now;
                record.touch(user_id, now);
                OperatorRegistry::new(&mut tx).insert(&record).await?;
                self.create_owner_policy(accessor, &record).await?;

                let outcome = if publish {
                    Some(publish_in_tx(&mut tx, &mut record, user_id, now).await?)
                } else {
                    None
                };
                (ImportAction::Created, record, outcome)
            }
        };
        tx.commit().await.at_step(Step::Commit)?;

        if let Some(outcome) = &outcome {
            self.notify_rename(outcome).await;
        }
        let detail = match action {
            ImportAction::Created => "created",
            ImportAction::Updated => "updated",
        };
        self.audit(accessor, Operation::Import, &record, Some(detail.to_string()));
        Ok((action, record.status))
    }
}
