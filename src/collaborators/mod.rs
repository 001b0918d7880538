//! External collaborators of the lifecycle engine
//!
//! Authorization, audit, messaging, business-domain tagging and OpenAPI
//! parsing are owned by other services. The engine talks to them through
//! these traits; the defaults allow everything, log audit events through
//! `tracing` and drop messages.

pub mod openapi;

pub use openapi::{ApiOperation, DocumentOpenApiParser, OpenApiError, OpenApiParser};

use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Topic announced on operator deletion
pub const OPERATOR_DELETED_TOPIC: &str = "operator.deleted";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Operator,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Operator => "operator",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    View,
    Create,
    Modify,
    Delete,
    Publish,
    Unpublish,
    Import,
    Export,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::View => "view",
            Operation::Create => "create",
            Operation::Modify => "modify",
            Operation::Delete => "delete",
            Operation::Publish => "publish",
            Operation::Unpublish => "unpublish",
            Operation::Import => "import",
            Operation::Export => "export",
        };
        f.write_str(name)
    }
}

/// The authenticated caller of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accessor {
    pub user_id: String,
    pub display_name: String,
}

impl Accessor {
    pub fn new(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            display_name: user_id.clone(),
            user_id,
        }
    }
}

#[async_trait]
pub trait AccessControl: Send + Sync {
    async fn resolve_accessor(&self, user_id: &str) -> AppResult<Accessor>;

    async fn check_permission(
        &self,
        accessor: &Accessor,
        resource_id: &str,
        resource_type: ResourceType,
        operation: Operation,
    ) -> AppResult<bool>;

    /// The subset of `resource_ids` the accessor may perform `operation` on
    async fn filter_by_permission(
        &self,
        accessor: &Accessor,
        resource_ids: Vec<String>,
        resource_type: ResourceType,
        operation: Operation,
    ) -> AppResult<Vec<String>>;

    async fn create_owner_policy(
        &self,
        accessor: &Accessor,
        resource_id: &str,
        resource_name: &str,
        resource_type: ResourceType,
    ) -> AppResult<()>;

    /// Propagate a changed display name to existing policies
    async fn notify_resource_change(
        &self,
        resource_id: &str,
        resource_name: &str,
        resource_type: ResourceType,
    ) -> AppResult<()>;

    async fn delete_policy(&self, resource_ids: &[String], resource_type: ResourceType)
        -> AppResult<()>;
}

/// Grants every permission
#[derive(Debug, Clone, Default)]
pub struct AllowAll;

#[async_trait]
impl AccessControl for AllowAll {
    async fn resolve_accessor(&self, user_id: &str) -> AppResult<Accessor> {
        Ok(Accessor::new(user_id))
    }

    async fn check_permission(
        &self,
        _accessor: &Accessor,
        _resource_id: &str,
        _resource_type: ResourceType,
        _operation: Operation,
    ) -> AppResult<bool> {
        Ok(true)
    }

    async fn filter_by_permission(
        &self,
        _accessor: &Accessor,
        resource_ids: Vec<String>,
        _resource_type: ResourceType,
        _operation: Operation,
    ) -> AppResult<Vec<String>> {
        Ok(resource_ids)
    }

    async fn create_owner_policy(
        &self,
        _accessor: &Accessor,
        _resource_id: &str,
        _resource_name: &str,
        _resource_type: ResourceType,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn notify_resource_change(
        &self,
        _resource_id: &str,
        _resource_name: &str,
        _resource_type: ResourceType,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn delete_policy(
        &self,
        _resource_ids: &[String],
        _resource_type: ResourceType,
    ) -> AppResult<()> {
        Ok(())
    }
}

/// One audited action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub operation: Operation,
    pub resource_type: ResourceType,
    pub resource_id: String,
    pub resource_name: String,
    pub user_id: String,
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Fire-and-forget audit log
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
}

/// Writes audit entries as `tracing` events under the `audit` target
#[derive(Debug, Clone, Default)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, entry: AuditEntry) {
        info!(
            target: "audit",
            operation = %entry.operation,
            resource_type = entry.resource_type.as_str(),
            resource_id = %entry.resource_id,
            resource_name = %entry.resource_name,
            user = %entry.user_id,
            detail = entry.detail.as_deref().unwrap_or(""),
            "audit"
        );
    }
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> AppResult<()>;
}

/// Drops every message
#[derive(Debug, Clone, Default)]
pub struct NoopBus;

#[async_trait]
impl MessageBus for NoopBus {
    async fn publish(&self, _topic: &str, _payload: serde_json::Value) -> AppResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait BusinessDomainTagger: Send + Sync {
    async fn associate(
        &self,
        domain_id: &str,
        resource_id: &str,
        resource_type: ResourceType,
    ) -> AppResult<()>;

    async fn disassociate(&self, resource_ids: &[String], resource_type: ResourceType)
        -> AppResult<()>;

    /// Ids of the resources tagged with any of `domain_ids`
    async fn batch_resource_list(
        &self,
        domain_ids: &[String],
        resource_type: ResourceType,
    ) -> AppResult<Vec<String>>;
}

/// Tags nothing; every domain is empty
#[derive(Debug, Clone, Default)]
pub struct NoopTagger;

#[async_trait]
impl BusinessDomainTagger for NoopTagger {
    async fn associate(
        &self,
        _domain_id: &str,
        _resource_id: &str,
        _resource_type: ResourceType,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn disassociate(
        &self,
        _resource_ids: &[String],
        _resource_type: ResourceType,
    ) -> AppResult<()> {
        Ok(())
    }

    async fn batch_resource_list(
        &self,
        _domain_ids: &[String],
        _resource_type: ResourceType,
    ) -> AppResult<Vec<String>> {
        Ok(Vec::new())
    }
}

/// The set of collaborators injected into the controller
#[derive(Clone)]
pub struct Collaborators {
    pub access: Arc<dyn AccessControl>,
    pub audit: Arc<dyn AuditSink>,
    pub bus: Arc<dyn MessageBus>,
    pub domains: Arc<dyn BusinessDomainTagger>,
    pub openapi: Arc<dyn OpenApiParser>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            access: Arc::new(AllowAll),
            audit: Arc::new(TracingAudit),
            bus: Arc::new(NoopBus),
            domains: Arc::new(NoopTagger),
            openapi: Arc::new(DocumentOpenApiParser),
        }
    }
}

impl Collaborators {
    pub fn with_access(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = access;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn with_domains(mut self, domains: Arc<dyn BusinessDomainTagger>) -> Self {
        self.domains = domains;
        self
    }
}
