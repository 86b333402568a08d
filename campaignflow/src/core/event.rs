//! Bus event type.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Metadata key naming the site an event came from.
pub const ORIGIN_METADATA: &str = "origin";

/// An event published on the message bus.
///
/// The body is plain JSON so that handlers decode it into whatever shape
/// their topic expects; metadata is free-form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique id used for log correlation.
    pub id: Uuid,

    /// When the event was created.
    pub timestamp: DateTime<Utc>,

    /// The event payload.
    #[serde(default)]
    pub body: serde_json::Value,

    /// Free-form metadata, e.g. the origin site.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Creates an event with a raw JSON body.
    #[must_use]
    pub fn new(body: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            body,
            metadata: HashMap::new(),
        }
    }

    /// Creates an event by serializing a typed body.
    pub fn from_body<T: Serialize>(body: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_value(body)?))
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Decodes the body into a typed value.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.body)
    }

    /// Returns the origin site, if tagged.
    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.metadata.get(ORIGIN_METADATA).map(String::as_str)
    }
}
