//! Release snapshot and release history maintenance
//!
//! Every publish bumps the tag of the single Release row and appends one
//! history entry. Unpublishing rewrites the latest history entry of the
//! released version instead of appending.

use crate::error::{not_found_error, AppError, AppResult, ResultExt, Step};
use crate::models::{OperatorRecord, OperatorStatus, Release, ReleaseHistory};
use crate::store::{OperatorFilter, StoreTx};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::debug;

/// Result of one publish
#[derive(Debug, Clone, PartialEq)]
pub struct PublishOutcome {
    pub release: Release,
    /// Name carried by the previous Release, if there was one
    pub previous_name: Option<String>,
}

impl PublishOutcome {
    /// The public name differs from the previous release
    pub fn name_changed(&self) -> bool {
        self.previous_name
            .as_deref()
            .is_some_and(|prev| prev != self.release.operator.name)
    }
}

/// Release and history operations scoped to one open transaction
pub struct ReleaseManager<'t, T: StoreTx> {
    tx: &'t mut T,
}

impl<'t, T: StoreTx> ReleaseManager<'t, T> {
    pub fn new(tx: &'t mut T) -> Self {
        Self { tx }
    }

    pub async fn get(&mut self, operator_id: &str) -> AppResult<Option<Release>> {
        self.tx.get_release(operator_id).await.at_step(Step::Lookup)
    }

    pub async fn get_many(&mut self, operator_ids: &[String]) -> AppResult<Vec<Release>> {
        if operator_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.tx.get_releases(operator_ids).await.at_step(Step::Lookup)
    }

    /// Matching release ids, most recently released first
    pub async fn list_ids(&mut self, filter: &OperatorFilter) -> AppResult<Vec<String>> {
        self.tx.list_release_ids(filter).await.at_step(Step::Lookup)
    }

    /// Snapshot `record` as the live Release and archive it
    pub async fn publish(
        &mut self,
        record: &OperatorRecord,
        user: &str,
        now: DateTime<Utc>,
    ) -> AppResult<PublishOutcome> {
        let previous = self.get(&record.operator_id).await?;

        let mut operator = record.clone();
        operator.status = OperatorStatus::Published;
        let release = Release {
            operator,
            tag: previous.as_ref().map_or(1, |r| r.tag + 1),
            release_user: user.to_string(),
            release_time: now,
        };

        if previous.is_some() {
            self.tx
                .update_release(&release)
                .await
                .at_step(Step::ReleaseWrite)?;
        } else {
            self.tx
                .insert_release(&release)
                .await
                .at_step(Step::ReleaseWrite)?;
        }

        let entry = ReleaseHistory::from_release(&release, now).at_step(Step::ReleaseWrite)?;
        self.tx
            .insert_history(&entry)
            .await
            .at_step(Step::ReleaseWrite)?;

        debug!(
            "Released operator {} tag {} (version {})",
            record.operator_id,
            release.tag,
            release.metadata_version()
        );
        Ok(PublishOutcome {
            release,
            previous_name: previous.map(|r| r.operator.name),
        })
    }

    /// Take the live Release offline
    pub async fn unpublish(
        &mut self,
        operator_id: &str,
        user: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Release> {
        let mut release = self.get(operator_id).await?.ok_or_else(|| {
            AppError::Internal {
                step: Some(Step::Lookup),
                message: format!("published operator {} has no release", operator_id),
            }
        })?;
        release.operator.status = OperatorStatus::Offline;
        release.operator.touch(user, now);
        self.tx
            .update_release(&release)
            .await
            .at_step(Step::ReleaseWrite)?;

        let history = self.history(operator_id).await?;
        let latest = history
            .into_iter()
            .filter(|e| e.metadata_version == release.metadata_version())
            .max_by_key(|e| e.tag);
        match latest {
            Some(mut entry) => {
                entry.refresh(&release, now).at_step(Step::ReleaseWrite)?;
                self.tx
                    .update_history(&entry)
                    .await
                    .at_step(Step::ReleaseWrite)?;
            }
            None => {
                let entry =
                    ReleaseHistory::from_release(&release, now).at_step(Step::ReleaseWrite)?;
                self.tx
                    .insert_history(&entry)
                    .await
                    .at_step(Step::ReleaseWrite)?;
            }
        }

        debug!("Operator {} release tag {} is offline", operator_id, release.tag);
        Ok(release)
    }

    /// Versions pinned by the Release or any history entry
    pub async fn referenced_versions(&mut self, operator_id: &str) -> AppResult<BTreeSet<String>> {
        let mut versions: BTreeSet<String> = self
            .history(operator_id)
            .await?
            .into_iter()
            .map(|e| e.metadata_version)
            .collect();
        if let Some(release) = self.get(operator_id).await? {
            versions.insert(release.operator.metadata_version);
        }
        Ok(versions)
    }

    /// Remove the Release and every history entry
    pub async fn purge(&mut self, operator_id: &str) -> AppResult<()> {
        self.tx
            .delete_release(operator_id)
            .await
            .at_step(Step::ReleaseWrite)?;
        self.tx
            .delete_history(operator_id)
            .await
            .at_step(Step::ReleaseWrite)
    }

    /// History ordered by tag ascending
    pub async fn history(&mut self, operator_id: &str) -> AppResult<Vec<ReleaseHistory>> {
        self.tx.list_history(operator_id).await.at_step(Step::Lookup)
    }

    /// The Release as archived under `tag`; the most recently written entry
    /// wins when a tag was archived more than once
    pub async fn snapshot_at(&mut self, operator_id: &str, tag: u64) -> AppResult<Release> {
        let entry = self
            .history(operator_id)
            .await?
            .into_iter()
            .filter(|e| e.tag == tag)
            .max_by_key(|e| e.update_time)
            .ok_or_else(|| {
                not_found_error(format!(
                    "Operator {} has no release tagged {}",
                    operator_id, tag
                ))
            })?;
        entry.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};
    use crate::test_support::{function_metadata, operator_record};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_each_publish_bumps_tag_and_appends_history() {
        let store = MemoryStore::new();
        let metadata = function_metadata("v1", "def main(): pass");
        let record = operator_record("op-1", "adder", &metadata);

        let mut tx = store.begin().await.unwrap();
        let mut releases = ReleaseManager::new(&mut tx);
        for expected in 1..=3 {
            let outcome = releases.publish(&record, "alice", Utc::now()).await.unwrap();
            assert_eq!(outcome.release.tag, expected);
            assert!(!outcome.name_changed());
        }

        let tags: Vec<u64> = releases
            .history("op-1")
            .await
            .unwrap()
            .iter()
            .map(|e| e.tag)
            .collect();
        assert_eq!(tags, vec![1, 2, 3]);
        assert_eq!(
            releases.get("op-1").await.unwrap().unwrap().status(),
            OperatorStatus::Published
        );
    }

    #[tokio::test]
    async fn test_publish_reports_rename() {
        let store = MemoryStore::new();
        let metadata = function_metadata("v1", "def main(): pass");
        let mut record = operator_record("op-1", "adder", &metadata);

        let mut tx = store.begin().await.unwrap();
        let mut releases = ReleaseManager::new(&mut tx);
        releases.publish(&record, "alice", Utc::now()).await.unwrap();
        record.name = "summer".to_string();
        let outcome = releases.publish(&record, "alice", Utc::now()).await.unwrap();

        assert_eq!(outcome.previous_name.as_deref(), Some("adder"));
        assert!(outcome.name_changed());
    }

    #[tokio::test]
    async fn test_unpublish_rewrites_latest_entry_in_place() {
        let store = MemoryStore::new();
        let metadata = function_metadata("v1", "def main(): pass");
        let record = operator_record("op-1", "adder", &metadata);

        let mut tx = store.begin().await.unwrap();
        let mut releases = ReleaseManager::new(&mut tx);
        releases.publish(&record, "alice", Utc::now()).await.unwrap();
        releases.publish(&record, "alice", Utc::now()).await.unwrap();
        let release = releases.unpublish("op-1", "bob", Utc::now()).await.unwrap();

        assert_eq!(release.status(), OperatorStatus::Offline);
        assert_eq!(release.tag, 2);
        let history = releases.history("op-1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].snapshot().unwrap().status(), OperatorStatus::Offline);
        assert_eq!(history[0].snapshot().unwrap().status(), OperatorStatus::Published);

        let archived = releases.snapshot_at("op-1", 1).await.unwrap();
        assert_eq!(archived.tag, 1);
        assert!(releases.snapshot_at("op-1", 9).await.is_err());
    }

    #[tokio::test]
    async fn test_purge_removes_release_and_history() {
        let store = MemoryStore::new();
        let metadata = function_metadata("v1", "def main(): pass");
        let record = operator_record("op-1", "adder", &metadata);

        let mut tx = store.begin().await.unwrap();
        let mut releases = ReleaseManager::new(&mut tx);
        releases.publish(&record, "alice", Utc::now()).await.unwrap();
        assert_eq!(
            releases.referenced_versions("op-1").await.unwrap(),
            BTreeSet::from(["v1".to_string()])
        );

        releases.purge("op-1").await.unwrap();
        assert!(releases.get("op-1").await.unwrap().is_none());
        assert!(releases.history("op-1").await.unwrap().is_empty());
    }
}
