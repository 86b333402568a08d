//! Envelopes that travel on the bus and across sites.
//!
//! None of these are persisted; they are the messages, not the records.

use super::ValueMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Namespace used when a message does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Stage outputs keyed by the stage that produced them.
pub type StageOutputs = HashMap<String, ValueMap>;

/// A request to run one concrete stage of an activation.
///
/// Published on the `activation` and `trigger` topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationEnvelope {
    /// Campaign reference (`name` or `name:version`).
    #[serde(default)]
    pub campaign: String,
    /// Activation id.
    #[serde(default)]
    pub activation: String,
    /// Generation marker copied from the activation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub activation_generation: String,
    /// Stage to execute.
    #[serde(default)]
    pub stage: String,
    /// Input map for the stage.
    #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
    pub inputs: ValueMap,
    /// Outputs of the stages that already ran.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub outputs: StageOutputs,
    /// Namespace of the activation.
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Optional schedule marker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// When set, outcomes are published on `report` instead of being
    /// written to the local repository.
    #[serde(default, rename = "needsReport")]
    pub needs_report: bool,
    /// Provider override; empty means "use the stage definition".
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider: String,
    /// Provider config override; null means "use the stage definition".
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,
}

impl Default for ActivationEnvelope {
    fn default() -> Self {
        Self {
            campaign: String::new(),
            activation: String::new(),
            activation_generation: String::new(),
            stage: String::new(),
            inputs: ValueMap::new(),
            outputs: StageOutputs::new(),
            namespace: default_namespace(),
            schedule: None,
            needs_report: false,
            provider: String::new(),
            config: serde_json::Value::Null,
        }
    }
}

impl ActivationEnvelope {
    /// Creates an envelope for an activation of a campaign.
    #[must_use]
    pub fn new(activation: impl Into<String>, campaign: impl Into<String>) -> Self {
        Self {
            activation: activation.into(),
            campaign: campaign.into(),
            ..Self::default()
        }
    }

    /// Sets the stage.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    /// Sets the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the activation generation.
    #[must_use]
    pub fn with_generation(mut self, generation: impl Into<String>) -> Self {
        self.activation_generation = generation.into();
        self
    }

    /// Adds an input.
    #[must_use]
    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    /// Returns the namespace, falling back to the default for blank values.
    #[must_use]
    pub fn namespace(&self) -> &str {
        if self.namespace.is_empty() {
            DEFAULT_NAMESPACE
        } else {
            &self.namespace
        }
    }
}

/// A cross-site job: an action tag plus an opaque body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Job id, if the sender assigned one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Action tag.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    /// Opaque body; an [`InputOutputData`] packet on the remote path.
    #[serde(default)]
    pub body: serde_json::Value,
}

/// The only schema guaranteed to survive a site boundary: two untyped maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputOutputData {
    /// Business inputs plus reserved correlation keys.
    #[serde(default)]
    pub inputs: ValueMap,
    /// Outputs carried along with the job.
    #[serde(default)]
    pub outputs: ValueMap,
}
