//! Metadata storage and batch resolution

pub mod resolver;
pub mod store;

pub use resolver::{BatchResolver, ResolveRequest, Resolved, SourceType};
pub use store::MetadataStore;
