//! Operator lifecycle: registration, editing, status transitions, deletion,
//! listing and import/export

pub mod controller;
mod diff;
mod import;
pub mod transition;
mod validate;

#[cfg(test)]
mod scenarios;

pub use controller::LifecycleController;
pub use transition::StatusAction;
pub use validate::NamePolicy;
