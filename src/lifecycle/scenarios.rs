//! End-to-end lifecycle scenarios against the in-memory store

use super::controller::LifecycleController;
use crate::collaborators::{Operation, OPERATOR_DELETED_TOPIC};
use crate::config::Settings;
use crate::error::{ErrorKind, Step};
use crate::models::{
    ContentPatch, EditRequest, ExecutionMode, FunctionInput, FunctionPatch, Metadata,
    OperatorOptions, OperatorQuery, OperatorStatus, RegisterRequest, RegisterSource,
    StatusChange,
};
use crate::store::{FailPoint, MemoryStore, Store, StoreTx};
use crate::test_support::{api_metadata, function_metadata, operator_record, seed, Fakes};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

struct Harness {
    store: MemoryStore,
    fakes: Fakes,
    controller: LifecycleController<MemoryStore>,
}

impl Harness {
    fn new() -> Self {
        let store = MemoryStore::new();
        let fakes = Fakes::default();
        let controller = LifecycleController::new(
            Arc::new(store.clone()),
            &Settings::default(),
            fakes.collaborators(),
        );
        Self {
            store,
            fakes,
            controller,
        }
    }

    async fn seed_api(&self, id: &str, name: &str) {
        let metadata = api_metadata(&format!("{}-v1", id), "/items");
        seed(&self.store, &operator_record(id, name, &metadata), &metadata).await;
    }

    async fn release_count(&self) -> usize {
        let mut tx = self.store.begin().await.unwrap();
        let ids = tx.list_release_ids(&Default::default()).await.unwrap();
        tx.rollback().await.unwrap();
        ids.len()
    }
}

fn function_request(name: &str) -> RegisterRequest {
    RegisterRequest {
        source: RegisterSource::Function(FunctionInput {
            name: name.to_string(),
            description: "adds two numbers".to_string(),
            script_type: "python".to_string(),
            code: "def main(a, b): return a + b".to_string(),
            dependencies: vec![],
        }),
        options: OperatorOptions::default(),
        direct_publish: false,
        is_internal: false,
        business_domain: None,
    }
}

fn openapi_request(paths: serde_json::Value) -> RegisterRequest {
    let document = json!({
        "openapi": "3.0.3",
        "info": {"title": "pets", "version": "1"},
        "servers": [{"url": "https://api.example.com"}],
        "paths": paths,
    });
    RegisterRequest {
        source: RegisterSource::OpenApi {
            document: serde_json::to_vec(&document).unwrap(),
        },
        options: OperatorOptions::default(),
        direct_publish: false,
        is_internal: false,
        business_domain: None,
    }
}

fn path_edit(id: &str, path: &str) -> EditRequest {
    let mut edit = EditRequest::new(id);
    edit.content = Some(ContentPatch::Api(crate::models::ApiPatch {
        path: Some(path.to_string()),
        ..Default::default()
    }));
    edit
}

#[tokio::test]
async fn test_publish_edit_republish_unpublish() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;
    let c = &h.controller;

    assert_eq!(c.publish("alice", "op-1").await.unwrap(), OperatorStatus::Published);
    let history = c.list_history("alice", "op-1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].tag, 1);
    assert_eq!(history[0].metadata_version, "op-1-v1");

    let edited = c.edit("alice", path_edit("op-1", "/items/v2")).await.unwrap();
    assert!(edited.changed);
    assert!(edited.forked);
    assert_eq!(edited.status, OperatorStatus::Editing);
    assert_ne!(edited.metadata_version, "op-1-v1");

    // the market still serves the released version
    let live = c.market_detail("alice", "op-1").await.unwrap();
    assert_eq!(live.release.metadata_version(), "op-1-v1");
    match live.metadata.unwrap() {
        Metadata::Api(api) => assert_eq!(api.path, "/items"),
        other => panic!("unexpected metadata {:?}", other),
    }

    c.publish("alice", "op-1").await.unwrap();
    let live = c.market_detail("alice", "op-1").await.unwrap();
    assert_eq!(live.release.tag, 2);
    assert_eq!(live.release.metadata_version(), edited.metadata_version);
    let history = c.list_history("alice", "op-1").await.unwrap();
    assert_eq!(history.len(), 2);

    assert_eq!(c.unpublish("bob", "op-1").await.unwrap(), OperatorStatus::Offline);
    let history = c.list_history("alice", "op-1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].tag, 2);
    assert_eq!(history[1].snapshot().unwrap().status(), OperatorStatus::Offline);

    let archived = c.history_snapshot("alice", "op-1", 1).await.unwrap();
    assert_eq!(archived.metadata_version(), "op-1-v1");
    assert_eq!(
        c.market_detail("alice", "op-1").await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
}

#[tokio::test]
async fn test_repeated_publishes_keep_one_release() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;
    let c = &h.controller;

    for round in 0..3 {
        c.publish("alice", "op-1").await.unwrap();
        c.edit("alice", path_edit("op-1", &format!("/items/{}", round)))
            .await
            .unwrap();
    }
    c.publish("alice", "op-1").await.unwrap();

    assert_eq!(h.release_count().await, 1);
    let tags: Vec<u64> = c
        .list_history("alice", "op-1")
        .await
        .unwrap()
        .iter()
        .map(|e| e.tag)
        .collect();
    assert_eq!(tags, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_identical_edit_writes_nothing() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;
    let before = h.store.metadata_writes();

    let mut edit = path_edit("op-1", "/items");
    edit.name = Some("list_items".to_string());
    let result = h.controller.edit("alice", edit).await.unwrap();

    assert!(!result.changed);
    assert_eq!(result.status, OperatorStatus::Unpublished);
    assert_eq!(result.metadata_version, "op-1-v1");
    assert_eq!(h.store.metadata_writes(), before);
    assert!(h.fakes.audit.entries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_draft_edits_update_in_place() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;

    let result = h
        .controller
        .edit("alice", path_edit("op-1", "/things"))
        .await
        .unwrap();
    assert!(result.changed);
    assert!(!result.forked);
    assert_eq!(result.metadata_version, "op-1-v1");
    assert_eq!(result.status, OperatorStatus::Unpublished);
}

#[tokio::test]
async fn test_editing_offline_operator_forks_to_unpublished() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;
    let c = &h.controller;
    c.publish("alice", "op-1").await.unwrap();
    c.unpublish("alice", "op-1").await.unwrap();

    let result = c.edit("alice", path_edit("op-1", "/next")).await.unwrap();
    assert!(result.forked);
    assert_eq!(result.status, OperatorStatus::Unpublished);

    // the forked draft is not referenced yet, so further edits stay in place
    let again = c.edit("alice", path_edit("op-1", "/later")).await.unwrap();
    assert!(!again.forked);
    assert_eq!(again.metadata_version, result.metadata_version);
}

#[tokio::test]
async fn test_registry_only_edit_of_published_operator() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;
    let c = &h.controller;
    c.publish("alice", "op-1").await.unwrap();

    let mut edit = EditRequest::new("op-1");
    edit.execution_mode = Some(ExecutionMode::Async);
    let result = c.edit("alice", edit).await.unwrap();
    assert!(result.changed);
    assert!(!result.forked);
    assert_eq!(result.status, OperatorStatus::Editing);
    assert_eq!(result.metadata_version, "op-1-v1");
}

#[tokio::test]
async fn test_edit_and_publish_in_one_step_propagates_rename() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;
    let c = &h.controller;
    c.publish("alice", "op-1").await.unwrap();

    let mut edit = EditRequest::new("op-1");
    edit.name = Some("list_all_items".to_string());
    edit.publish = true;
    let result = c.edit("alice", edit).await.unwrap();

    assert_eq!(result.status, OperatorStatus::Published);
    assert_eq!(
        *h.fakes.access.renamed.lock().unwrap(),
        vec![("op-1".to_string(), "list_all_items".to_string())]
    );
}

#[tokio::test]
async fn test_requested_transitions_follow_state_machine() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;
    let c = &h.controller;

    let err = c.unpublish("alice", "op-1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStatus);

    c.publish("alice", "op-1").await.unwrap();
    let err = c.publish("alice", "op-1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStatus);

    let err = c
        .update_status(
            "alice",
            vec![StatusChange {
                operator_id: "op-1".to_string(),
                status: OperatorStatus::Editing,
            }],
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStatus);

    c.unpublish("alice", "op-1").await.unwrap();
    assert_eq!(c.publish("alice", "op-1").await.unwrap(), OperatorStatus::Published);
}

#[tokio::test]
async fn test_batch_status_change_is_all_or_nothing() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;
    h.seed_api("op-2", "get_item").await;
    let c = &h.controller;
    c.publish("alice", "op-2").await.unwrap();

    let err = c
        .update_status(
            "alice",
            vec![
                StatusChange {
                    operator_id: "op-1".to_string(),
                    status: OperatorStatus::Published,
                },
                StatusChange {
                    operator_id: "op-2".to_string(),
                    status: OperatorStatus::Published,
                },
            ],
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStatus);

    let view = c.get_operator("alice", "op-1").await.unwrap();
    assert_eq!(view.operator.status, OperatorStatus::Unpublished);
    assert_eq!(h.release_count().await, 1);
}

#[tokio::test]
async fn test_published_names_are_unique() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;
    h.seed_api("op-2", "list_items").await;
    let c = &h.controller;

    assert_ok!(c.publish("alice", "op-1").await);
    let err = assert_err!(c.publish("alice", "op-2").await);
    assert_eq!(err.kind(), ErrorKind::Conflict);

    assert_ok!(c.unpublish("alice", "op-1").await);
    assert_ok!(c.publish("alice", "op-2").await);
}

#[tokio::test]
async fn test_failed_release_write_rolls_back_everything() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;
    h.store.fail_once(FailPoint::InsertHistory);

    let err = h.controller.publish("alice", "op-1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.step(), Some(Step::ReleaseWrite));

    let view = h.controller.get_operator("alice", "op-1").await.unwrap();
    assert_eq!(view.operator.status, OperatorStatus::Unpublished);
    assert_eq!(h.release_count().await, 0);

    assert_ok!(h.controller.publish("alice", "op-1").await);
}

#[tokio::test]
async fn test_failed_fork_leaves_published_state() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;
    h.controller.publish("alice", "op-1").await.unwrap();
    h.store.fail_once(FailPoint::UpdateOperator);

    let err = h
        .controller
        .edit("alice", path_edit("op-1", "/new"))
        .await
        .unwrap_err();
    assert_eq!(err.step(), Some(Step::RegistryWrite));

    let view = h.controller.get_operator("alice", "op-1").await.unwrap();
    assert_eq!(view.operator.status, OperatorStatus::Published);
    assert_eq!(view.operator.metadata_version, "op-1-v1");
}

#[tokio::test]
async fn test_register_function_creates_unpublished_operator() {
    let h = Harness::new();
    let mut request = function_request("adder");
    request.business_domain = Some("finance".to_string());

    let created = h.controller.register("alice", request).await.unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].status, OperatorStatus::Unpublished);

    let id = &created[0].operator_id;
    let view = h.controller.get_operator("alice", id).await.unwrap();
    assert_eq!(view.operator.execute_control.timeout_ms, 60_000);
    match view.metadata.unwrap() {
        Metadata::Function(f) => assert_eq!(f.version, created[0].metadata_version),
        other => panic!("unexpected metadata {:?}", other),
    }
    assert_eq!(*h.fakes.access.owner_policies.lock().unwrap(), vec![id.clone()]);
    assert_eq!(
        h.fakes.domains.members.lock().unwrap().get("finance"),
        Some(&vec![id.clone()])
    );
}

#[tokio::test]
async fn test_register_openapi_creates_one_operator_per_operation() {
    let h = Harness::new();
    let request = openapi_request(json!({
        "/pets": {
            "get": {"operationId": "listPets", "summary": "List pets"},
            "post": {"operationId": "createPet", "summary": "Create a pet"}
        }
    }));

    let created = h.controller.register("alice", request).await.unwrap();
    let mut names: Vec<&str> = created.iter().map(|r| r.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["createPet", "listPets"]);
}

#[tokio::test]
async fn test_direct_publish_needs_single_candidate() {
    let h = Harness::new();
    let mut request = openapi_request(json!({
        "/pets": {
            "get": {"operationId": "listPets"},
            "post": {"operationId": "createPet"}
        }
    }));
    request.direct_publish = true;

    let err = h.controller.register("alice", request).await.unwrap_err();
    assert_eq!(err.code(), "DIRECT_PUBLISH_SINGLE");
    assert_eq!(h.store.metadata_writes(), 0);

    let mut request = function_request("adder");
    request.direct_publish = true;
    let created = h.controller.register("alice", request).await.unwrap();
    assert_eq!(created[0].status, OperatorStatus::Published);
    assert_eq!(h.release_count().await, 1);
}

#[tokio::test]
async fn test_register_rejects_bad_input() {
    let h = Harness::new();

    let err = h
        .controller
        .register("alice", function_request("a/b"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NAME_INVALID_CHARS");

    let mut request = function_request("feed");
    request.options = OperatorOptions {
        is_data_source: true,
        execution_mode: ExecutionMode::Stream,
        ..Default::default()
    };
    let err = h.controller.register("alice", request).await.unwrap_err();
    assert_eq!(err.code(), "DATA_SOURCE_MODE");

    let err = h
        .controller
        .register("alice", openapi_request(json!({})))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "OPENAPI_SPEC_ERROR");
    assert_eq!(h.store.metadata_writes(), 0);
}

#[tokio::test]
async fn test_internal_operators_cannot_be_edited_or_deleted() {
    let h = Harness::new();
    let mut request = function_request("builtin");
    request.is_internal = true;
    let created = h.controller.register("system", request).await.unwrap();
    let id = created[0].operator_id.clone();

    let mut edit = EditRequest::new(&id);
    edit.content = Some(ContentPatch::Function(FunctionPatch {
        code: Some("def main(): return 0".to_string()),
        ..Default::default()
    }));
    let err = h.controller.edit("alice", edit).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = h.controller.delete("alice", vec![id]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_denied_permission_is_forbidden() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;
    h.fakes.access.deny("op-1", Operation::Publish);

    let err = h.controller.publish("alice", "op-1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(h.release_count().await, 0);
}

#[tokio::test]
async fn test_delete_cascades_and_announces() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;
    let c = &h.controller;
    c.publish("alice", "op-1").await.unwrap();
    let forked = c.edit("alice", path_edit("op-1", "/v2")).await.unwrap();

    let err = c.delete("alice", vec!["op-1".to_string()]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStatus);

    c.publish("alice", "op-1").await.unwrap();
    c.unpublish("alice", "op-1").await.unwrap();
    c.delete("alice", vec!["op-1".to_string(), "op-1".to_string()])
        .await
        .unwrap();

    assert_eq!(
        c.get_operator("alice", "op-1").await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(h.release_count().await, 0);

    let mut tx = h.store.begin().await.unwrap();
    assert!(tx.list_history("op-1").await.unwrap().is_empty());
    for version in ["op-1-v1", forked.metadata_version.as_str()] {
        assert!(tx
            .get_metadata(crate::models::MetadataType::Api, version)
            .await
            .unwrap()
            .is_none());
    }
    tx.rollback().await.unwrap();

    let messages = h.fakes.bus.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].0, OPERATOR_DELETED_TOPIC);
    assert_eq!(messages[0].1["operator_id"], "op-1");
    assert_eq!(*h.fakes.access.deleted.lock().unwrap(), vec!["op-1".to_string()]);
    assert_eq!(*h.fakes.domains.removed.lock().unwrap(), vec!["op-1".to_string()]);
}

#[tokio::test]
async fn test_delete_unpublished_fork_removes_release_and_every_version() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;
    let c = &h.controller;
    c.publish("alice", "op-1").await.unwrap();
    c.unpublish("alice", "op-1").await.unwrap();
    let forked = c.edit("alice", path_edit("op-1", "/v2")).await.unwrap();
    assert!(forked.forked);
    assert_eq!(forked.status, OperatorStatus::Unpublished);
    assert_eq!(h.release_count().await, 1);

    assert_ok!(c.delete("alice", vec!["op-1".to_string()]).await);

    assert_eq!(h.release_count().await, 0);
    let mut tx = h.store.begin().await.unwrap();
    assert!(tx.get_operator("op-1").await.unwrap().is_none());
    assert!(tx.list_history("op-1").await.unwrap().is_empty());
    for version in ["op-1-v1", forked.metadata_version.as_str()] {
        assert!(tx
            .get_metadata(crate::models::MetadataType::Api, version)
            .await
            .unwrap()
            .is_none());
    }
    tx.rollback().await.unwrap();
    assert_eq!(h.fakes.bus.messages.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishes_of_one_operator_succeed_once() {
    let h = Arc::new(Harness::new());
    h.seed_api("op-1", "list_items").await;

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let h = h.clone();
            tokio::spawn(async move {
                h.controller
                    .publish(&format!("user-{}", i), "op-1")
                    .await
            })
        })
        .collect();

    let mut published = 0;
    let mut rejected = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(status) => {
                assert_eq!(status, OperatorStatus::Published);
                published += 1;
            }
            Err(err) => {
                assert_eq!(err.kind(), ErrorKind::InvalidStatus);
                rejected += 1;
            }
        }
    }

    assert_eq!(published, 1);
    assert_eq!(rejected, 7);
    assert_eq!(h.release_count().await, 1);
    assert_eq!(h.controller.list_history("alice", "op-1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_filters_permissions_domains_and_pages() {
    let h = Harness::new();
    for i in 1..=5 {
        h.seed_api(&format!("op-{}", i), &format!("items_{}", i)).await;
    }
    let c = &h.controller;
    h.fakes.access.deny("op-3", Operation::View);

    let page = c
        .list_operators(
            "alice",
            OperatorQuery {
                page_size: 2,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.items.len(), 2);
    assert!(page.items.iter().all(|v| v.metadata.is_some()));

    h.fakes
        .domains
        .members
        .lock()
        .unwrap()
        .insert("sales".to_string(), vec!["op-2".to_string(), "op-3".to_string()]);
    let page = c
        .list_operators(
            "alice",
            OperatorQuery {
                business_domains: vec!["sales".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].operator.operator_id, "op-2");

    let err = c
        .list_operators(
            "alice",
            OperatorQuery {
                page: 0,
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailed);
}

#[tokio::test]
async fn test_market_lists_only_published_releases() {
    let h = Harness::new();
    h.seed_api("op-1", "list_items").await;
    h.seed_api("op-2", "get_item").await;
    h.seed_api("op-3", "put_item").await;
    let c = &h.controller;
    c.publish("alice", "op-1").await.unwrap();
    c.publish("alice", "op-2").await.unwrap();
    c.unpublish("alice", "op-2").await.unwrap();

    let market = c.list_market("alice", OperatorQuery::default()).await.unwrap();
    assert_eq!(market.total, 1);
    assert_eq!(market.items[0].release.operator_id(), "op-1");
    assert!(market.items[0].metadata.is_some());

    // a draft edit does not change what the market shows
    c.edit("alice", path_edit("op-1", "/draft")).await.unwrap();
    let market = c.list_market("alice", OperatorQuery::default()).await.unwrap();
    assert_eq!(market.items[0].release.metadata_version(), "op-1-v1");
}

#[tokio::test]
async fn test_content_patch_must_match_metadata_type() {
    let h = Harness::new();
    let metadata = function_metadata("fn-v1", "def main(): pass");
    seed(&h.store, &operator_record("fn-1", "adder", &metadata), &metadata).await;

    let err = h
        .controller
        .edit("alice", path_edit("fn-1", "/items"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "METADATA_TYPE_IMMUTABLE");
}
