//! `DashMap`-backed repositories.

use super::{ActivationRepository, CampaignRepository};
use crate::core::StageOutcome;
use crate::errors::{EngineError, Result};
use crate::model::{ActivationState, CampaignSpec};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

/// Splits a version into alternating runs of digits and non-digits.
fn version_segments(version: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_digits = None;
    for (i, c) in version.char_indices() {
        let digit = c.is_ascii_digit();
        if in_digits.is_some_and(|d| d != digit) {
            segments.push(&version[start..i]);
            start = i;
        }
        in_digits = Some(digit);
    }
    if start < version.len() {
        segments.push(&version[start..]);
    }
    segments
}

/// Orders versions segment by segment, comparing digit runs by value so
/// that `10` sorts after `9` and `v1.10` after `v1.9`.
fn compare_versions(a: &str, b: &str) -> Ordering {
    let (left, right) = (version_segments(a), version_segments(b));
    for (l, r) in left.iter().zip(&right) {
        let numeric = |s: &str| s.starts_with(|c: char| c.is_ascii_digit());
        let order = if numeric(l) && numeric(r) {
            let (l, r) = (l.trim_start_matches('0'), r.trim_start_matches('0'));
            l.len().cmp(&r.len()).then_with(|| l.cmp(r))
        } else {
            l.cmp(r)
        };
        if order != Ordering::Equal {
            return order;
        }
    }
    left.len().cmp(&right.len())
}

/// Campaigns keyed by (namespace, name), then by version.
#[derive(Debug, Default)]
pub struct InMemoryCampaignRepository {
    campaigns: DashMap<Key, BTreeMap<String, CampaignSpec>>,
}

impl InMemoryCampaignRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a campaign, replacing the same version if present.
    pub fn upsert(&self, namespace: &str, campaign: CampaignSpec) {
        self.campaigns
            .entry(key(namespace, &campaign.name))
            .or_default()
            .insert(campaign.version.clone(), campaign);
    }

    /// Removes every version of a campaign. Returns true if anything was
    /// removed.
    pub fn delete(&self, namespace: &str, name: &str) -> bool {
        self.campaigns.remove(&key(namespace, name)).is_some()
    }

    /// Lists the campaigns of a namespace, all versions.
    #[must_use]
    pub fn list(&self, namespace: &str) -> Vec<CampaignSpec> {
        self.campaigns
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .flat_map(|entry| entry.value().values().cloned().collect::<Vec<_>>())
            .collect()
    }
}

#[async_trait]
impl CampaignRepository for InMemoryCampaignRepository {
    async fn get_campaign(&self, name: &str, namespace: &str) -> Result<CampaignSpec> {
        let (base, version) = match name.split_once(':') {
            Some((base, version)) => (base, Some(version)),
            None => (name, None),
        };
        let versions = self
            .campaigns
            .get(&key(namespace, base))
            .ok_or_else(|| EngineError::not_found("campaign", name))?;

        let found = match version {
            Some(version) => versions.get(version),
            None => versions
                .values()
                .max_by(|a, b| compare_versions(&a.version, &b.version)),
        };
        found
            .cloned()
            .ok_or_else(|| EngineError::not_found("campaign", name))
    }
}

/// Activations keyed by (namespace, id).
#[derive(Debug, Default)]
pub struct InMemoryActivationRepository {
    activations: DashMap<Key, ActivationState>,
}

impl InMemoryActivationRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an activation, replacing any record with the same id.
    pub fn upsert(&self, activation: ActivationState) {
        self.activations
            .insert(key(&activation.namespace, &activation.id), activation);
    }

    /// Removes an activation. Returns true if it existed.
    pub fn delete(&self, id: &str, namespace: &str) -> bool {
        self.activations.remove(&key(namespace, id)).is_some()
    }

    /// Lists the activations of a namespace.
    #[must_use]
    pub fn list(&self, namespace: &str) -> Vec<ActivationState> {
        self.activations
            .iter()
            .filter(|entry| entry.key().0 == namespace)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

#[async_trait]
impl ActivationRepository for InMemoryActivationRepository {
    async fn get_activation(&self, id: &str, namespace: &str) -> Result<ActivationState> {
        self.activations
            .get(&key(namespace, id))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::not_found("activation", id))
    }

    async fn report_stage_outcome(
        &self,
        id: &str,
        namespace: &str,
        mut outcome: StageOutcome,
    ) -> Result<()> {
        let mut entry = self
            .activations
            .get_mut(&key(namespace, id))
            .ok_or_else(|| EngineError::not_found("activation", id))?;

        // Reports for the same stage accumulate outputs; a new stage starts clean.
        if let Some(previous) = entry.status.take() {
            if previous.stage == outcome.stage {
                for (k, v) in previous.outputs {
                    outcome.outputs.entry(k).or_insert(v);
                }
            }
        }
        outcome.update_time = Some(Utc::now());

        debug!(
            activation = %id,
            stage = %outcome.stage,
            status = %outcome.status,
            active = outcome.is_active,
            "Stage outcome recorded"
        );
        entry.status = Some(outcome);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::State;
    use serde_json::json;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_campaign_versions() {
        let repo = InMemoryCampaignRepository::new();
        repo.upsert("default", CampaignSpec::new("c").with_version("v1"));
        repo.upsert("default", CampaignSpec::new("c").with_version("v2"));

        let latest = repo.get_campaign("c", "default").await.unwrap();
        assert_eq!(latest.version, "v2");

        let pinned = repo.get_campaign("c:v1", "default").await.unwrap();
        assert_eq!(pinned.version, "v1");

        let missing = repo.get_campaign("c:v9", "default").await.unwrap_err();
        assert!(missing.is_not_found());
        assert_eq!(repo.list("default").len(), 2);
    }

    #[tokio::test]
    async fn test_latest_version_compares_numbers_by_value() {
        let repo = InMemoryCampaignRepository::new();
        repo.upsert("default", CampaignSpec::new("c").with_version("9"));
        repo.upsert("default", CampaignSpec::new("c").with_version("10"));

        let latest = repo.get_campaign("c", "default").await.unwrap();
        assert_eq!(latest.version, "10");
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("v1.10", "v1.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.2.3", "1.2.3"), Ordering::Equal);
        assert_eq!(compare_versions("007", "7"), Ordering::Equal);
        assert_eq!(compare_versions("1.2", "1.2.1"), Ordering::Less);
        assert_eq!(compare_versions("v2", "v10"), Ordering::Less);
        assert_eq!(compare_versions("alpha", "beta"), Ordering::Less);
    }

    #[tokio::test]
    async fn test_campaign_namespaces_are_separate() {
        let repo = InMemoryCampaignRepository::new();
        repo.upsert("team-a", CampaignSpec::new("c"));

        assert!(repo.get_campaign("c", "team-b").await.is_err());
        assert!(repo.delete("team-a", "c"));
        assert!(repo.get_campaign("c", "team-a").await.is_err());
    }

    #[tokio::test]
    async fn test_report_on_missing_activation() {
        let repo = InMemoryActivationRepository::new();
        let err = repo
            .report_stage_outcome("ghost", "default", StageOutcome::untouched("a"))
            .await
            .unwrap_err();
        assert_eq!(err.state(), State::NotFound);
    }

    #[tokio::test]
    async fn test_report_merges_and_stamps() {
        let repo = InMemoryActivationRepository::new();
        repo.upsert(ActivationState::new("act1", "c").with_input("foo", json!(1)));

        let mut first = StageOutcome::running("a", "1");
        first.outputs.insert("kept".to_string(), json!(true));
        assert_ok!(repo.report_stage_outcome("act1", "default", first).await);

        let mut second = StageOutcome::untouched("a").finished();
        second.outputs.insert("result".to_string(), json!(2));
        assert_ok!(repo.report_stage_outcome("act1", "default", second).await);

        let activation = repo.get_activation("act1", "default").await.unwrap();
        let status = activation.status.clone().unwrap();
        assert_eq!(status.status, State::Done);
        assert_eq!(status.outputs["kept"], json!(true));
        assert_eq!(status.outputs["result"], json!(2));
        assert!(status.update_time.is_some());
        assert!(!activation.is_active());
        assert_eq!(activation.spec.inputs["foo"], json!(1));
    }

    #[tokio::test]
    async fn test_report_for_new_stage_replaces_outputs() {
        let repo = InMemoryActivationRepository::new();
        repo.upsert(ActivationState::new("act1", "c"));

        let mut first = StageOutcome::untouched("a").advanced("b");
        first.outputs.insert("from_a".to_string(), json!(1));
        assert_ok!(repo.report_stage_outcome("act1", "default", first).await);
        assert_ok!(
            repo.report_stage_outcome("act1", "default", StageOutcome::running("b", ""))
                .await
        );

        let status = repo
            .get_activation("act1", "default")
            .await
            .unwrap()
            .status
            .unwrap();
        assert_eq!(status.stage, "b");
        assert!(status.outputs.is_empty());
    }
}
