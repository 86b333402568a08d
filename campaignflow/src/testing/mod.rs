//! Testing utilities for campaignflow engines.
//!
//! This module provides:
//! - Recording, failing, pausing and panicking stage providers
//! - A bus observer that records published events per topic
//! - Campaign fixtures and a fully wired engine harness

mod fixtures;
mod mocks;

pub use fixtures::{chain_campaign, EngineHarness, SETTLE_TIMEOUT};
pub use mocks::{
    FailingProvider, PanickingProvider, PausingProvider, RecordingProvider, TopicRecorder,
};
