//! Echo provider used by tests and demos.

use super::{ProviderOutput, StageProvider};
use crate::context::strip_reserved;
use crate::core::ValueMap;
use crate::errors::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Echoes its inputs back as outputs, without the reserved keys.
///
/// A numeric `foo` input comes back incremented, which makes chained
/// stages easy to observe. An integer already at `i64::MAX` is echoed as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockStageProvider;

impl MockStageProvider {
    /// Creates the provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn increment(value: &Value) -> Option<Value> {
    if let Some(n) = value.as_i64() {
        return n.checked_add(1).map(Value::from);
    }
    if let Some(n) = value.as_f64() {
        return Some(Value::from(n + 1.0));
    }
    value
        .as_str()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|n| n.checked_add(1))
        .map(Value::from)
}

#[async_trait]
impl StageProvider for MockStageProvider {
    async fn process(&self, inputs: ValueMap) -> Result<ProviderOutput> {
        let mut outputs = strip_reserved(&inputs);
        if let Some(next) = outputs.get("foo").and_then(increment) {
            outputs.insert("foo".to_string(), next);
        }
        debug!(keys = outputs.len(), "Mock stage processed");
        Ok(ProviderOutput::done(outputs))
    }
}
