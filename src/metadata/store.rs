//! Version-keyed metadata access inside a transaction

use crate::error::{validation_error_with, AppResult, ResultExt, Step};
use crate::models::{Metadata, MetadataType};
use crate::store::StoreTx;
use std::collections::BTreeSet;
use tracing::debug;

/// Metadata operations scoped to one open transaction
pub struct MetadataStore<'t, T: StoreTx> {
    tx: &'t mut T,
}

impl<'t, T: StoreTx> MetadataStore<'t, T> {
    pub fn new(tx: &'t mut T) -> Self {
        Self { tx }
    }

    /// Persist a new record and return its version id.
    ///
    /// A blank version is replaced by a fresh UUID. Fails with a validation
    /// error naming the missing fields before anything is written.
    pub async fn create(&mut self, mut metadata: Metadata) -> AppResult<String> {
        ensure_complete(&metadata)?;
        if metadata.version().trim().is_empty() {
            metadata.set_version(uuid::Uuid::new_v4().to_string());
        }
        self.tx
            .insert_metadata(&metadata)
            .await
            .at_step(Step::MetadataWrite)?;
        debug!(
            "Created {} metadata version {}",
            metadata.metadata_type(),
            metadata.version()
        );
        Ok(metadata.version().to_string())
    }

    /// `Ok(None)` when the version does not exist
    pub async fn get(
        &mut self,
        metadata_type: MetadataType,
        version: &str,
    ) -> AppResult<Option<Metadata>> {
        self.tx
            .get_metadata(metadata_type, version)
            .await
            .at_step(Step::Lookup)
    }

    /// Overwrite a version in place.
    ///
    /// Callers must only pass drafts that no Release or history entry
    /// references.
    pub async fn update(&mut self, metadata: &Metadata) -> AppResult<()> {
        ensure_complete(metadata)?;
        self.tx
            .update_metadata(metadata)
            .await
            .at_step(Step::MetadataWrite)
    }

    pub async fn delete(&mut self, metadata_type: MetadataType, versions: &[String]) -> AppResult<()> {
        let unique: Vec<String> = versions
            .iter()
            .filter(|v| !v.is_empty())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return Ok(());
        }
        self.tx
            .delete_metadata(metadata_type, &unique)
            .await
            .at_step(Step::MetadataWrite)
    }

    /// Fetch many versions at once; missing versions are absent
    pub async fn batch_get(
        &mut self,
        metadata_type: MetadataType,
        versions: &[String],
    ) -> AppResult<Vec<Metadata>> {
        if versions.is_empty() {
            return Ok(Vec::new());
        }
        self.tx
            .batch_get_metadata(metadata_type, versions)
            .await
            .at_step(Step::Lookup)
    }
}

fn ensure_complete(metadata: &Metadata) -> AppResult<()> {
    let missing = metadata.missing_fields();
    if missing.is_empty() {
        return Ok(());
    }
    Err(validation_error_with(
        "METADATA_FIELD_MISSING",
        format!(
            "Missing required {} metadata fields: {}",
            metadata.metadata_type(),
            missing.join(", ")
        ),
        missing.into_iter().map(String::from).collect(),
    ))
}
