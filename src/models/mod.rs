//! Data models and DTOs
//!
//! Persisted shapes (registry record, metadata, release, history) and the
//! request/response structures used by the lifecycle engine.

pub mod metadata;
pub mod operator;
pub mod release;
pub mod request;

// Re-export commonly used types
pub use metadata::*;
pub use operator::*;
pub use release::*;
pub use request::*;
