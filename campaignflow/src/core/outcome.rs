//! Stage outcome: the persisted result of executing one stage.

use super::{State, ValueMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The result of executing (or attempting) one stage.
///
/// Written after every stage execution and merged into the activation
/// record by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageOutcome {
    /// The stage this outcome belongs to.
    #[serde(default)]
    pub stage: String,

    /// The stage to run next; empty means stop.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub next_stage: String,

    /// The evaluated inputs the stage ran with.
    #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
    pub inputs: ValueMap,

    /// The stage outputs. May carry reserved correlation keys.
    #[serde(default, skip_serializing_if = "ValueMap::is_empty")]
    pub outputs: ValueMap,

    /// The status code.
    #[serde(default)]
    pub status: State,

    /// Human-readable status message.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_message: String,

    /// Error message, empty on success.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,

    /// Whether the activation is still live after this outcome.
    #[serde(default)]
    pub is_active: bool,

    /// Generation marker copied from the trigger.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub activation_generation: String,

    /// When the repository last merged this outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl Default for StageOutcome {
    fn default() -> Self {
        Self::untouched("")
    }
}

impl StageOutcome {
    /// Creates an untouched, active outcome for a stage.
    #[must_use]
    pub fn untouched(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            next_stage: String::new(),
            inputs: ValueMap::new(),
            outputs: ValueMap::new(),
            status: State::Untouched,
            status_message: String::new(),
            error_message: String::new(),
            is_active: true,
            activation_generation: String::new(),
            update_time: None,
        }
    }

    /// Creates the "Running" progress outcome reported before a stage runs.
    #[must_use]
    pub fn running(stage: impl Into<String>, generation: impl Into<String>) -> Self {
        Self::untouched(stage)
            .with_status(State::Running)
            .with_generation(generation)
    }

    /// Sets the status and derives the status message from it.
    #[must_use]
    pub fn with_status(mut self, status: State) -> Self {
        self.status = status;
        self.status_message = status.to_string();
        self
    }

    /// Sets the activation generation.
    #[must_use]
    pub fn with_generation(mut self, generation: impl Into<String>) -> Self {
        self.activation_generation = generation.into();
        self
    }

    /// Sets the outputs.
    #[must_use]
    pub fn with_outputs(mut self, outputs: ValueMap) -> Self {
        self.outputs = outputs;
        self
    }

    /// Marks the outcome as a terminal failure.
    #[must_use]
    pub fn failed(mut self, status: State, message: impl Into<String>) -> Self {
        self.status = status;
        self.status_message = status.to_string();
        self.error_message = message.into();
        self.is_active = false;
        self
    }

    /// Marks the outcome as finished with no further stage.
    #[must_use]
    pub fn finished(mut self) -> Self {
        self.next_stage.clear();
        self.is_active = false;
        self.with_status(State::Done)
    }

    /// Marks the outcome as finished with a follow-up stage.
    #[must_use]
    pub fn advanced(mut self, next_stage: impl Into<String>) -> Self {
        self.next_stage = next_stage.into();
        self.is_active = true;
        self.with_status(State::Done)
    }

    /// Returns true if the outcome asks the engine to keep going.
    #[must_use]
    pub fn continues(&self) -> bool {
        !self.next_stage.is_empty() && self.status != State::Paused
    }
}
