//! Operator Hub - operator registration, versioning and release lifecycle
//!
//! Operators are registered from OpenAPI documents or function definitions,
//! edited as working copies with versioned metadata, and published as
//! immutable releases with a full release history.
//!
//! - `lifecycle`: the transactional orchestration of every operation
//! - `registry`, `metadata`, `release`: per-table components bound to a
//!   transaction
//! - `store`: the persistence contract with Postgres and in-memory backends
//! - `collaborators`: access control, audit, messaging, domain tagging and
//!   OpenAPI parsing

pub mod collaborators;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod metadata;
pub mod models;
pub mod registry;
pub mod release;
pub mod state;
pub mod store;

#[cfg(test)]
mod test_support;

pub use error::{AppError, AppResult, ErrorKind, Step};
pub use lifecycle::LifecycleController;
