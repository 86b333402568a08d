//! Activation records.

use crate::core::{StageOutcome, ValueMap, DEFAULT_NAMESPACE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What an activation asks for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationSpec {
    /// Campaign reference (`name` or `name:version`).
    #[serde(default)]
    pub campaign: String,
    /// Display name.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Requested stage; empty means the campaign's first stage.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stage: String,
    /// Activation inputs, handed to the first stage.
    #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
    pub inputs: ValueMap,
    /// Generation marker.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generation: String,
}

/// A run instance of a campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationState {
    /// Activation id.
    pub id: String,
    /// Namespace.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Labels and annotations.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// The request.
    #[serde(default)]
    pub spec: ActivationSpec,
    /// The latest merged stage outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StageOutcome>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl ActivationState {
    /// Creates an activation of a campaign in the default namespace.
    #[must_use]
    pub fn new(id: impl Into<String>, campaign: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            namespace: default_namespace(),
            metadata: HashMap::new(),
            spec: ActivationSpec {
                campaign: campaign.into(),
                ..ActivationSpec::default()
            },
            status: None,
        }
    }

    /// Sets the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the requested stage.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.spec.stage = stage.into();
        self
    }

    /// Adds an input.
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.spec.inputs.insert(key.into(), value);
        self
    }

    /// Sets the generation marker.
    #[must_use]
    pub fn with_generation(mut self, generation: impl Into<String>) -> Self {
        self.spec.generation = generation.into();
        self
    }

    /// Returns true while the activation has not reached a terminal outcome.
    /// An activation that never ran is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.as_ref().map_or(true, |s| s.is_active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::State;

    #[test]
    fn test_new_activation_is_active() {
        let activation = ActivationState::new("act1", "c").with_stage("a");
        assert!(activation.is_active());
        assert_eq!(activation.namespace, "default");
        assert_eq!(activation.spec.stage, "a");
    }

    #[test]
    fn test_inactive_after_terminal_outcome() {
        let mut activation = ActivationState::new("act1", "c");
        activation.status = Some(StageOutcome::untouched("a").failed(State::BadRequest, "boom"));
        assert!(!activation.is_active());
    }
}
