//! Operator status state machine

use crate::error::{AppError, AppResult};
use crate::models::OperatorStatus;

/// Status-changing action requested explicitly by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Publish,
    Unpublish,
}

/// Status after an edit that changed something
pub fn after_edit(current: OperatorStatus) -> OperatorStatus {
    match current {
        OperatorStatus::Published => OperatorStatus::Editing,
        OperatorStatus::Offline => OperatorStatus::Unpublished,
        draft => draft,
    }
}

pub fn check_publish(current: OperatorStatus) -> AppResult<()> {
    match current {
        OperatorStatus::Unpublished | OperatorStatus::Editing | OperatorStatus::Offline => Ok(()),
        OperatorStatus::Published => Err(invalid(current, OperatorStatus::Published)),
    }
}

pub fn check_unpublish(current: OperatorStatus) -> AppResult<()> {
    match current {
        OperatorStatus::Published => Ok(()),
        other => Err(invalid(other, OperatorStatus::Offline)),
    }
}

pub fn check_delete(current: OperatorStatus) -> AppResult<()> {
    match current {
        OperatorStatus::Unpublished | OperatorStatus::Offline => Ok(()),
        other => Err(AppError::InvalidStatus(format!(
            "an operator in status {} cannot be deleted",
            other
        ))),
    }
}

/// Editing and Unpublished are reached through edits only
pub fn check_target(target: OperatorStatus) -> AppResult<StatusAction> {
    match target {
        OperatorStatus::Published => Ok(StatusAction::Publish),
        OperatorStatus::Offline => Ok(StatusAction::Unpublish),
        other => Err(AppError::InvalidStatus(format!(
            "status {} cannot be requested directly",
            other
        ))),
    }
}

/// Validate a requested (current, target) pair
pub fn requested(current: OperatorStatus, target: OperatorStatus) -> AppResult<StatusAction> {
    let action = check_target(target)?;
    match action {
        StatusAction::Publish => check_publish(current)?,
        StatusAction::Unpublish => check_unpublish(current)?,
    }
    Ok(action)
}

fn invalid(from: OperatorStatus, to: OperatorStatus) -> AppError {
    AppError::InvalidStatus(format!("cannot move from {} to {}", from, to))
}
