//! Fixtures and collaborator fakes shared by the unit tests

use crate::collaborators::{
    AccessControl, Accessor, AuditEntry, AuditSink, BusinessDomainTagger, Collaborators,
    MessageBus, Operation, ResourceType,
};
use crate::error::AppResult;
use crate::models::{
    ApiMetadata, ExecuteControl, ExecutionMode, Extension, FunctionMetadata, Metadata,
    OperatorRecord, OperatorStatus, OperatorType,
};
use crate::store::{MemoryStore, Store, StoreTx};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub fn function_metadata(version: &str, code: &str) -> Metadata {
    let now = Utc::now();
    Metadata::Function(FunctionMetadata {
        version: version.to_string(),
        summary: "adds numbers".to_string(),
        description: String::new(),
        script_type: "python".to_string(),
        code: code.to_string(),
        dependencies: vec![],
        create_user: "alice".to_string(),
        create_time: now,
        update_user: "alice".to_string(),
        update_time: now,
    })
}

pub fn api_metadata(version: &str, path: &str) -> Metadata {
    let now = Utc::now();
    Metadata::Api(ApiMetadata {
        version: version.to_string(),
        summary: "lists items".to_string(),
        description: String::new(),
        server_url: "https://api.example.com".to_string(),
        path: path.to_string(),
        method: "GET".to_string(),
        api_spec: serde_json::json!({"operationId": "listItems"}),
        create_user: "alice".to_string(),
        create_time: now,
        update_user: "alice".to_string(),
        update_time: now,
    })
}

pub fn operator_record(id: &str, name: &str, metadata: &Metadata) -> OperatorRecord {
    let now = Utc::now();
    OperatorRecord {
        operator_id: id.to_string(),
        name: name.to_string(),
        metadata_type: metadata.metadata_type(),
        metadata_version: metadata.version().to_string(),
        status: OperatorStatus::Unpublished,
        operator_type: OperatorType::Base,
        execution_mode: ExecutionMode::Sync,
        is_data_source: false,
        is_internal: false,
        execute_control: ExecuteControl::default(),
        extension: Extension::new(),
        create_user: "alice".to_string(),
        create_time: now,
        update_user: "alice".to_string(),
        update_time: now,
    }
}

/// Commit one operator and its metadata
pub async fn seed(store: &MemoryStore, record: &OperatorRecord, metadata: &Metadata) {
    let mut tx = store.begin().await.unwrap();
    tx.insert_metadata(metadata).await.unwrap();
    tx.insert_operator(record).await.unwrap();
    tx.commit().await.unwrap();
}

/// Access control that denies listed (resource, operation) pairs and records
/// policy side effects
#[derive(Default)]
pub struct ScriptedAccess {
    denied: Mutex<HashSet<(String, Operation)>>,
    pub owner_policies: Mutex<Vec<String>>,
    pub renamed: Mutex<Vec<(String, String)>>,
    pub deleted: Mutex<Vec<String>>,
}

impl ScriptedAccess {
    pub fn deny(&self, resource_id: &str, operation: Operation) {
        self.denied
            .lock()
            .unwrap()
            .insert((resource_id.to_string(), operation));
    }

    fn allowed(&self, resource_id: &str, operation: Operation) -> bool {
        !self
            .denied
            .lock()
            .unwrap()
            .contains(&(resource_id.to_string(), operation))
    }
}

#[async_trait]
impl AccessControl for ScriptedAccess {
    async fn resolve_accessor(&self, user_id: &str) -> AppResult<Accessor> {
        Ok(Accessor::new(user_id))
    }

    async fn check_permission(
        &self,
        _accessor: &Accessor,
        resource_id: &str,
        _resource_type: ResourceType,
        operation: Operation,
    ) -> AppResult<bool> {
        Ok(self.allowed(resource_id, operation))
    }

    async fn filter_by_permission(
        &self,
        _accessor: &Accessor,
        resource_ids: Vec<String>,
        _resource_type: ResourceType,
        operation: Operation,
    ) -> AppResult<Vec<String>> {
        Ok(resource_ids
            .into_iter()
            .filter(|id| self.allowed(id, operation))
            .collect())
    }

    async fn create_owner_policy(
        &self,
        _accessor: &Accessor,
        resource_id: &str,
        _resource_name: &str,
        _resource_type: ResourceType,
    ) -> AppResult<()> {
        self.owner_policies
            .lock()
            .unwrap()
            .push(resource_id.to_string());
        Ok(())
    }

    async fn notify_resource_change(
        &self,
        resource_id: &str,
        resource_name: &str,
        _resource_type: ResourceType,
    ) -> AppResult<()> {
        self.renamed
            .lock()
            .unwrap()
            .push((resource_id.to_string(), resource_name.to_string()));
        Ok(())
    }

    async fn delete_policy(
        &self,
        resource_ids: &[String],
        _resource_type: ResourceType,
    ) -> AppResult<()> {
        self.deleted.lock().unwrap().extend(resource_ids.iter().cloned());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingAudit {
    pub entries: Mutex<Vec<AuditEntry>>,
}

impl AuditSink for RecordingAudit {
    fn record(&self, entry: AuditEntry) {
        self.entries.lock().unwrap().push(entry);
    }
}

#[derive(Default)]
pub struct RecordingBus {
    pub messages: Mutex<Vec<(String, serde_json::Value)>>,
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> AppResult<()> {
        self.messages
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

/// Domain -> resource ids
#[derive(Default)]
pub struct MapDomains {
    pub members: Mutex<HashMap<String, Vec<String>>>,
    pub removed: Mutex<Vec<String>>,
}

#[async_trait]
impl BusinessDomainTagger for MapDomains {
    async fn associate(
        &self,
        domain_id: &str,
        resource_id: &str,
        _resource_type: ResourceType,
    ) -> AppResult<()> {
        self.members
            .lock()
            .unwrap()
            .entry(domain_id.to_string())
            .or_default()
            .push(resource_id.to_string());
        Ok(())
    }

    async fn disassociate(
        &self,
        resource_ids: &[String],
        _resource_type: ResourceType,
    ) -> AppResult<()> {
        self.removed.lock().unwrap().extend(resource_ids.iter().cloned());
        Ok(())
    }

    async fn batch_resource_list(
        &self,
        domain_ids: &[String],
        _resource_type: ResourceType,
    ) -> AppResult<Vec<String>> {
        let members = self.members.lock().unwrap();
        Ok(domain_ids
            .iter()
            .filter_map(|d| members.get(d))
            .flatten()
            .cloned()
            .collect())
    }
}

/// All recording fakes wired into one collaborator set
#[derive(Clone, Default)]
pub struct Fakes {
    pub access: Arc<ScriptedAccess>,
    pub audit: Arc<RecordingAudit>,
    pub bus: Arc<RecordingBus>,
    pub domains: Arc<MapDomains>,
}

impl Fakes {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators::default()
            .with_access(self.access.clone())
            .with_audit(self.audit.clone())
            .with_bus(self.bus.clone())
            .with_domains(self.domains.clone())
    }
}
