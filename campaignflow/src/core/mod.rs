//! Core domain model types for campaignflow.
//!
//! This module contains the fundamental types used throughout the engine:
//! - The shared status enumeration
//! - Stage outcomes
//! - Bus events and the envelopes they carry

mod envelope;
mod event;
mod outcome;
mod status;

pub use envelope::{
    ActivationEnvelope, InputOutputData, JobEnvelope, StageOutputs, DEFAULT_NAMESPACE,
};
pub use event::{Event, ORIGIN_METADATA};
pub use outcome::StageOutcome;
pub use status::State;

/// An untyped string-keyed map, the lingua franca of stage inputs/outputs.
pub type ValueMap = std::collections::HashMap<String, serde_json::Value>;
