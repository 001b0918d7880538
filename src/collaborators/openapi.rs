//! OpenAPI document parsing
//!
//! Structural parsing only: the document is read as JSON or YAML and every
//! (path, method) pair becomes one candidate operation. Schema validation of
//! request/response bodies is left to the parser implementation injected by
//! the host.

use crate::error::{validation_error_with, AppError};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// HTTP methods an OpenAPI path item may define
const METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "patch", "head", "options", "trace",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpenApiError {
    #[error("Malformed document: {0}")]
    Syntax(String),

    #[error("Schema violation: {0}")]
    Schema(String),

    #[error("Unsupported specification: {0}")]
    Specification(String),
}

impl From<OpenApiError> for AppError {
    fn from(err: OpenApiError) -> Self {
        let (code, detail) = match &err {
            OpenApiError::Syntax(detail) => ("OPENAPI_SYNTAX_ERROR", detail.clone()),
            OpenApiError::Schema(detail) => ("OPENAPI_SCHEMA_ERROR", detail.clone()),
            OpenApiError::Specification(detail) => ("OPENAPI_SPEC_ERROR", detail.clone()),
        };
        validation_error_with(code, err.to_string(), vec![detail])
    }
}

/// One endpoint extracted from a document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiOperation {
    pub name: String,
    pub summary: String,
    pub description: String,
    pub server_url: String,
    pub path: String,
    /// Upper-case HTTP method
    pub method: String,
    /// The raw operation object
    pub spec: Value,
}

pub trait OpenApiParser: Send + Sync {
    fn parse(&self, document: &[u8]) -> Result<Vec<ApiOperation>, OpenApiError>;
}

/// JSON first, then YAML
fn read_document(document: &[u8]) -> Result<Value, OpenApiError> {
    match serde_json::from_slice(document) {
        Ok(root) => Ok(root),
        Err(json_err) => serde_yaml::from_slice(document).map_err(|yaml_err| {
            OpenApiError::Syntax(format!("not JSON ({}) nor YAML ({})", json_err, yaml_err))
        }),
    }
}

/// Parser for OpenAPI 3.x documents in JSON or YAML form
#[derive(Debug, Clone, Default)]
pub struct DocumentOpenApiParser;

impl OpenApiParser for DocumentOpenApiParser {
    fn parse(&self, document: &[u8]) -> Result<Vec<ApiOperation>, OpenApiError> {
        let root = read_document(document)?;
        let root = root
            .as_object()
            .ok_or_else(|| OpenApiError::Schema("document root must be an object".to_string()))?;

        match root.get("openapi").and_then(Value::as_str) {
            Some(version) if version.starts_with("3.") => {}
            Some(version) => {
                return Err(OpenApiError::Specification(format!(
                    "OpenAPI version {} is not supported",
                    version
                )))
            }
            None => {
                return Err(OpenApiError::Specification(
                    "missing 'openapi' version field".to_string(),
                ))
            }
        }

        let paths = root
            .get("paths")
            .and_then(Value::as_object)
            .ok_or_else(|| OpenApiError::Schema("'paths' must be an object".to_string()))?;
        let document_server = first_server(root);

        let mut operations = Vec::new();
        for (path, item) in paths {
            let item = item.as_object().ok_or_else(|| {
                OpenApiError::Schema(format!("path item '{}' must be an object", path))
            })?;
            let path_server = first_server(item);

            for method in METHODS {
                let Some(operation) = item.get(method) else {
                    continue;
                };
                let op = operation.as_object().ok_or_else(|| {
                    OpenApiError::Schema(format!("operation {} {} must be an object", method, path))
                })?;

                let server_url = first_server(op)
                    .or_else(|| path_server.clone())
                    .or_else(|| document_server.clone())
                    .ok_or_else(|| {
                        OpenApiError::Specification(format!(
                            "no server url declared for {} {}",
                            method, path
                        ))
                    })?;

                let summary = text(op, "summary");
                let name = text(op, "operationId")
                    .filter(|s| !s.trim().is_empty())
                    .or_else(|| summary.clone().filter(|s| !s.trim().is_empty()))
                    .unwrap_or_else(|| fallback_name(method, path));

                operations.push(ApiOperation {
                    summary: summary.unwrap_or_else(|| name.clone()),
                    name,
                    description: text(op, "description").unwrap_or_default(),
                    server_url,
                    path: path.clone(),
                    method: method.to_uppercase(),
                    spec: operation.clone(),
                });
            }
        }

        if operations.is_empty() {
            return Err(OpenApiError::Specification(
                "document defines no operations".to_string(),
            ));
        }
        Ok(operations)
    }
}

fn text(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(String::from)
}

fn first_server(object: &Map<String, Value>) -> Option<String> {
    object
        .get("servers")
        .and_then(Value::as_array)
        .and_then(|servers| servers.first())
        .and_then(|server| server.get("url"))
        .and_then(Value::as_str)
        .filter(|url| !url.trim().is_empty())
        .map(String::from)
}

/// `get /pets/{id}` -> `get_pets_id`
fn fallback_name(method: &str, path: &str) -> String {
    let mut name = String::from(method);
    for part in path.split(|c: char| !c.is_ascii_alphanumeric()) {
        if !part.is_empty() {
            name.push('_');
            name.push_str(part);
        }
    }
    name
}
