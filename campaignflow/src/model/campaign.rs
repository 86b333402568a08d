//! Campaign and stage definitions.

use crate::core::ValueMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One named stage of a campaign.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSpec {
    /// Stage name.
    #[serde(default)]
    pub name: String,
    /// Provider identifier, e.g. `providers.stage.mock`.
    #[serde(default)]
    pub provider: String,
    /// Free-form provider config.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
    /// Inputs; string values may be `${{ }}` templates.
    #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
    pub inputs: ValueMap,
    /// Expression yielding the next stage name, or empty to stop.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stage_selector: String,
    /// Expression yielding the site or sites the stage runs on.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub contexts: serde_json::Value,
}

impl StageSpec {
    /// Creates a stage bound to a provider.
    #[must_use]
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            ..Self::default()
        }
    }

    /// Sets the provider config.
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Adds an input.
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    /// Sets the stage selector.
    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.stage_selector = selector.into();
        self
    }

    /// Sets the sites expression.
    #[must_use]
    pub fn with_contexts(mut self, contexts: serde_json::Value) -> Self {
        self.contexts = contexts;
        self
    }
}

/// A campaign: a named graph of stages. Read-only to the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSpec {
    /// Campaign name.
    #[serde(default)]
    pub name: String,
    /// Campaign version.
    #[serde(default)]
    pub version: String,
    /// Whether the engine chains stages on its own.
    #[serde(default)]
    pub self_driving: bool,
    /// Stage used when an activation does not request one.
    #[serde(default)]
    pub first_stage: String,
    /// Stage definitions keyed by name.
    #[serde(default)]
    pub stages: HashMap<String, StageSpec>,
}

impl CampaignSpec {
    /// Creates an empty campaign.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the self-driving flag.
    #[must_use]
    pub fn self_driving(mut self, enabled: bool) -> Self {
        self.self_driving = enabled;
        self
    }

    /// Adds a stage. The first stage added becomes `first_stage` unless
    /// one was set already.
    #[must_use]
    pub fn with_stage(mut self, stage: StageSpec) -> Self {
        if self.first_stage.is_empty() {
            self.first_stage.clone_from(&stage.name);
        }
        self.stages.insert(stage.name.clone(), stage);
        self
    }

    /// Overrides the first stage.
    #[must_use]
    pub fn with_first_stage(mut self, stage: impl Into<String>) -> Self {
        self.first_stage = stage.into();
        self
    }

    /// Returns a stage by name.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageSpec> {
        self.stages.get(name)
    }

    /// Returns the `name:version` reference, or the bare name when
    /// unversioned.
    #[must_use]
    pub fn reference(&self) -> String {
        if self.version.is_empty() {
            self.name.clone()
        } else {
            format!("{}:{}", self.name, self.version)
        }
    }
}
