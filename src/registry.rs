//! Operator registry access
//!
//! The registry row is the mutable working configuration of an operator.

use crate::error::{conflict_error, not_found_error, AppResult, ResultExt, Step};
use crate::models::OperatorRecord;
use crate::store::{OperatorFilter, StoreTx};

/// Registry operations scoped to one open transaction
pub struct OperatorRegistry<'t, T: StoreTx> {
    tx: &'t mut T,
}

impl<'t, T: StoreTx> OperatorRegistry<'t, T> {
    pub fn new(tx: &'t mut T) -> Self {
        Self { tx }
    }

    pub async fn get(&mut self, operator_id: &str) -> AppResult<Option<OperatorRecord>> {
        self.tx.get_operator(operator_id).await.at_step(Step::Lookup)
    }

    pub async fn require(&mut self, operator_id: &str) -> AppResult<OperatorRecord> {
        self.get(operator_id)
            .await?
            .ok_or_else(|| not_found_error(format!("Operator {} not found", operator_id)))
    }

    /// Load and lock the row for the rest of the transaction
    pub async fn lock(&mut self, operator_id: &str) -> AppResult<OperatorRecord> {
        self.tx
            .lock_operator(operator_id)
            .await
            .at_step(Step::Lookup)?
            .ok_or_else(|| not_found_error(format!("Operator {} not found", operator_id)))
    }

    pub async fn insert(&mut self, record: &OperatorRecord) -> AppResult<()> {
        self.tx
            .insert_operator(record)
            .await
            .at_step(Step::RegistryWrite)
    }

    pub async fn update(&mut self, record: &OperatorRecord) -> AppResult<()> {
        self.tx
            .update_operator(record)
            .await
            .at_step(Step::RegistryWrite)
    }

    pub async fn delete(&mut self, operator_id: &str) -> AppResult<()> {
        self.tx
            .delete_operator(operator_id)
            .await
            .at_step(Step::RegistryWrite)
    }

    pub async fn list_ids(&mut self, filter: &OperatorFilter) -> AppResult<Vec<String>> {
        self.tx.list_operator_ids(filter).await.at_step(Step::Lookup)
    }

    /// Names are unique among Published operators only.
    ///
    /// `exclude` is the operator being published itself.
    pub async fn ensure_name_available(&mut self, name: &str, exclude: &str) -> AppResult<()> {
        let holders = self
            .tx
            .find_published_by_name(name)
            .await
            .at_step(Step::Lookup)?;
        match holders.iter().find(|op| op.operator_id != exclude) {
            Some(holder) => Err(conflict_error(format!(
                "Operator name '{}' is already used by published operator {}",
                name, holder.operator_id
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::models::OperatorStatus;
    use crate::store::{MemoryStore, Store};
    use crate::test_support::{function_metadata, operator_record};

    #[tokio::test]
    async fn test_require_missing_is_not_found() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = OperatorRegistry::new(&mut tx).require("ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_name_uniqueness_ignores_drafts_and_self() {
        let store = MemoryStore::new();
        let metadata = function_metadata("v1", "def main(): pass");
        let mut live = operator_record("op-1", "adder", &metadata);
        live.status = OperatorStatus::Published;
        let draft = operator_record("op-2", "adder", &metadata);

        let mut tx = store.begin().await.unwrap();
        let mut registry = OperatorRegistry::new(&mut tx);
        registry.insert(&live).await.unwrap();
        registry.insert(&draft).await.unwrap();

        registry.ensure_name_available("adder", "op-1").await.unwrap();
        let err = registry
            .ensure_name_available("adder", "op-2")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        registry.ensure_name_available("subtractor", "op-2").await.unwrap();
    }
}
