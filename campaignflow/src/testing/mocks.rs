//! Mock providers and bus observers for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::{Event, StageOutcome, ValueMap};
use crate::errors::{EngineError, Result};
use crate::events::{handler_fn, MessageBus};
use crate::providers::{ProviderOutput, StageProvider};

/// A provider that records every input map and returns configurable
/// outputs.
#[derive(Debug, Default)]
pub struct RecordingProvider {
    outputs: Mutex<ValueMap>,
    calls: Mutex<Vec<ValueMap>>,
}

impl RecordingProvider {
    /// Creates a provider that returns empty outputs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider that returns the given outputs.
    #[must_use]
    pub fn with_outputs(outputs: ValueMap) -> Self {
        Self {
            outputs: Mutex::new(outputs),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Sets the outputs to return.
    pub fn set_outputs(&self, outputs: ValueMap) {
        *self.outputs.lock() = outputs;
    }

    /// Returns the number of times the provider was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the inputs of each call.
    #[must_use]
    pub fn recorded_inputs(&self) -> Vec<ValueMap> {
        self.calls.lock().clone()
    }

    /// Resets call tracking.
    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl StageProvider for RecordingProvider {
    async fn process(&self, inputs: ValueMap) -> Result<ProviderOutput> {
        self.calls.lock().push(inputs);
        Ok(ProviderOutput::done(self.outputs.lock().clone()))
    }
}

/// A provider that always fails.
#[derive(Debug)]
pub struct FailingProvider {
    error: String,
}

impl FailingProvider {
    /// Creates a failing provider.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[async_trait]
impl StageProvider for FailingProvider {
    async fn process(&self, _inputs: ValueMap) -> Result<ProviderOutput> {
        Err(EngineError::provider(self.error.clone()))
    }
}

/// A provider that asks the engine to wait for external input.
#[derive(Debug, Default)]
pub struct PausingProvider;

impl PausingProvider {
    /// Creates a pausing provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageProvider for PausingProvider {
    async fn process(&self, _inputs: ValueMap) -> Result<ProviderOutput> {
        Ok(ProviderOutput::paused(ValueMap::new()))
    }
}

/// A provider that panics on every call.
#[derive(Debug)]
pub struct PanickingProvider {
    message: String,
}

impl PanickingProvider {
    /// Creates a provider that panics with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl StageProvider for PanickingProvider {
    async fn process(&self, _inputs: ValueMap) -> Result<ProviderOutput> {
        panic!("{}", self.message)
    }
}

/// Records every event published on the topics it watches.
#[derive(Debug, Default)]
pub struct TopicRecorder {
    events: Mutex<HashMap<String, Vec<Event>>>,
}

impl TopicRecorder {
    /// Subscribes a new recorder to the given topics.
    pub fn attach(bus: &dyn MessageBus, topics: &[&str]) -> Arc<Self> {
        let recorder = Arc::new(Self::default());
        for topic in topics {
            let sink = recorder.clone();
            bus.subscribe(
                topic,
                handler_fn(move |topic, event| {
                    let sink = sink.clone();
                    async move {
                        sink.events.lock().entry(topic).or_default().push(event);
                        Ok(())
                    }
                }),
            );
        }
        recorder
    }

    /// Returns the events seen on a topic.
    #[must_use]
    pub fn events(&self, topic: &str) -> Vec<Event> {
        self.events.lock().get(topic).cloned().unwrap_or_default()
    }

    /// Returns the number of events seen on a topic.
    #[must_use]
    pub fn count(&self, topic: &str) -> usize {
        self.events.lock().get(topic).map_or(0, Vec::len)
    }

    /// Decodes the events seen on a topic as stage outcomes, skipping
    /// bodies of another shape.
    #[must_use]
    pub fn outcomes(&self, topic: &str) -> Vec<StageOutcome> {
        self.events(topic)
            .iter()
            .filter_map(|event| event.decode().ok())
            .collect()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}
