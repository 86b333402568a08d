//! Span attributes and timing for stage execution.

use crate::context::Correlation;
use crate::core::ActivationEnvelope;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::Span;

/// Identity fields attached to every handler span.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpanAttributes {
    /// Activation id.
    pub activation: Option<String>,
    /// Campaign reference.
    pub campaign: Option<String>,
    /// Stage name.
    pub stage: Option<String>,
    /// Namespace.
    pub namespace: Option<String>,
    /// Site the stage runs on.
    pub site: Option<String>,
}

impl StageSpanAttributes {
    /// Creates empty attributes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the attributes from a trigger envelope.
    #[must_use]
    pub fn from_envelope(envelope: &ActivationEnvelope) -> Self {
        Self::from_correlation(&Correlation::from_envelope(envelope))
    }

    /// Reads the attributes from a decoded correlation record.
    #[must_use]
    pub fn from_correlation(correlation: &Correlation) -> Self {
        Self {
            activation: correlation.activation.clone(),
            campaign: correlation.campaign.clone(),
            stage: correlation.stage.clone(),
            namespace: Some(correlation.namespace.clone()),
            site: correlation.site.clone(),
        }
    }

    /// Sets the site.
    #[must_use]
    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    /// Opens an `info` span for a handler.
    #[must_use]
    pub fn span(&self, handler: &'static str) -> Span {
        tracing::info_span!(
            "stage_handler",
            handler,
            activation = self.activation.as_deref().unwrap_or_default(),
            campaign = self.campaign.as_deref().unwrap_or_default(),
            stage = self.stage.as_deref().unwrap_or_default(),
            namespace = self.namespace.as_deref().unwrap_or_default(),
            site = self.site.as_deref().unwrap_or_default(),
        )
    }

    /// Flattens to a string map, omitting absent fields.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut attrs = HashMap::new();
        let fields = [
            ("activation", &self.activation),
            ("campaign", &self.campaign),
            ("stage", &self.stage),
            ("namespace", &self.namespace),
            ("site", &self.site),
        ];
        for (key, value) in fields {
            if let Some(v) = value {
                attrs.insert(key.to_string(), v.clone());
            }
        }
        attrs
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the timer and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}
