//! Edit diffing and the fork decision

use crate::error::{validation_error_with, AppResult};
use crate::models::{
    ApiPatch, ContentPatch, EditRequest, FunctionPatch, Metadata, OperatorRecord, OperatorStatus,
};

/// An edit merged onto the stored state, before anything is written
#[derive(Debug, Clone)]
pub struct EditPlan {
    /// Registry row with the edited registry fields; status, version and
    /// audit fields are still the stored ones
    pub record: OperatorRecord,
    pub metadata: Metadata,
    pub metadata_changed: bool,
    pub registry_changed: bool,
}

impl EditPlan {
    pub fn changed(&self) -> bool {
        self.metadata_changed || self.registry_changed
    }
}

/// Merge `edit` onto the stored row and metadata
pub fn plan(record: &OperatorRecord, current: &Metadata, edit: &EditRequest) -> AppResult<EditPlan> {
    let mut metadata = current.clone();
    if let Some(summary) = &edit.summary {
        metadata.set_summary(summary);
    }
    if let Some(description) = &edit.description {
        metadata.set_description(description);
    }
    match (&mut metadata, &edit.content) {
        (_, None) => {}
        (Metadata::Api(api), Some(ContentPatch::Api(patch))) => {
            if let Some(server_url) = &patch.server_url {
                api.server_url = server_url.clone();
            }
            if let Some(path) = &patch.path {
                api.path = path.clone();
            }
            if let Some(method) = &patch.method {
                api.method = method.to_uppercase();
            }
            if let Some(spec) = &patch.api_spec {
                api.api_spec = spec.clone();
            }
        }
        (Metadata::Function(function), Some(ContentPatch::Function(patch))) => {
            if let Some(script_type) = &patch.script_type {
                function.script_type = script_type.clone();
            }
            if let Some(code) = &patch.code {
                function.code = code.clone();
            }
            if let Some(dependencies) = &patch.dependencies {
                function.dependencies = dependencies.clone();
            }
        }
        (stored, Some(patch)) => {
            return Err(validation_error_with(
                "METADATA_TYPE_IMMUTABLE",
                format!(
                    "Operator {} holds {} metadata and cannot take {} content",
                    record.operator_id,
                    stored.metadata_type(),
                    patch.metadata_type()
                ),
                vec![
                    stored.metadata_type().to_string(),
                    patch.metadata_type().to_string(),
                ],
            ));
        }
    }

    let mut next = record.clone();
    if let Some(name) = &edit.name {
        next.name = name.clone();
    }
    if let Some(mode) = edit.execution_mode {
        next.execution_mode = mode;
    }
    if let Some(is_data_source) = edit.is_data_source {
        next.is_data_source = is_data_source;
    }
    if let Some(control) = &edit.execute_control {
        next.execute_control = control.clone();
    }
    if let Some(extension) = &edit.extension {
        next.extension = extension.clone();
    }

    Ok(EditPlan {
        metadata_changed: !metadata.same_content(current),
        registry_changed: next != *record,
        record: next,
        metadata,
    })
}

/// Changed metadata gets a new version when the working one may be pinned:
/// the operator has a release, or the Release or a history entry points at
/// the working version.
pub fn should_fork(status: OperatorStatus, version_referenced: bool) -> bool {
    status.has_release() || version_referenced
}

/// Content patch that turns any metadata of the same shape into `metadata`
pub fn patch_from(metadata: &Metadata) -> ContentPatch {
    match metadata {
        Metadata::Api(api) => ContentPatch::Api(ApiPatch {
            server_url: Some(api.server_url.clone()),
            path: Some(api.path.clone()),
            method: Some(api.method.clone()),
            api_spec: Some(api.api_spec.clone()),
        }),
        Metadata::Function(function) => ContentPatch::Function(FunctionPatch {
            script_type: Some(function.script_type.clone()),
            code: Some(function.code.clone()),
            dependencies: Some(function.dependencies.clone()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExecutionMode;
    use crate::test_support::{api_metadata, function_metadata, operator_record};

    #[test]
    fn test_identical_edit_changes_nothing() {
        let metadata = function_metadata("v1", "def main(): pass");
        let record = operator_record("op-1", "adder", &metadata);
        let mut edit = EditRequest::new("op-1");
        edit.name = Some("adder".to_string());
        edit.content = Some(patch_from(&metadata));

        let plan = plan(&record, &metadata, &edit).unwrap();
        assert!(!plan.changed());
    }

    #[test]
    fn test_registry_and_metadata_changes_are_told_apart() {
        let metadata = function_metadata("v1", "def main(): pass");
        let record = operator_record("op-1", "adder", &metadata);

        let mut edit = EditRequest::new("op-1");
        edit.execution_mode = Some(ExecutionMode::Async);
        let registry_only = plan(&record, &metadata, &edit).unwrap();
        assert!(registry_only.registry_changed);
        assert!(!registry_only.metadata_changed);

        let mut edit = EditRequest::new("op-1");
        edit.description = Some("adds two numbers".to_string());
        let metadata_only = plan(&record, &metadata, &edit).unwrap();
        assert!(metadata_only.metadata_changed);
        assert!(!metadata_only.registry_changed);
        assert_eq!(metadata_only.metadata.description(), "adds two numbers");
    }

    #[test]
    fn test_content_type_cannot_change() {
        let metadata = function_metadata("v1", "def main(): pass");
        let record = operator_record("op-1", "adder", &metadata);
        let mut edit = EditRequest::new("op-1");
        edit.content = Some(patch_from(&api_metadata("a1", "/items")));

        let err = plan(&record, &metadata, &edit).unwrap_err();
        assert_eq!(err.code(), "METADATA_TYPE_IMMUTABLE");
    }

    #[test]
    fn test_fork_rules() {
        assert!(!should_fork(OperatorStatus::Unpublished, false));
        assert!(!should_fork(OperatorStatus::Editing, false));
        assert!(should_fork(OperatorStatus::Editing, true));
        assert!(should_fork(OperatorStatus::Published, false));
        assert!(should_fork(OperatorStatus::Offline, false));
    }
}
