//! Reserved correlation keys and their typed decoding.
//!
//! Stage inputs and outputs are untyped maps. Identity travels inside them
//! under double-underscore keys so that it survives any hop that only
//! preserves primitive data. Handlers decode those keys into a
//! [`Correlation`] as soon as a message arrives and re-encode them only
//! when serializing outward.

use crate::core::{ActivationEnvelope, ValueMap, DEFAULT_NAMESPACE};
use crate::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Prefix shared by every reserved key.
pub const RESERVED_PREFIX: &str = "__";
/// Activation id.
pub const KEY_ACTIVATION: &str = "__activation";
/// Activation generation.
pub const KEY_ACTIVATION_GENERATION: &str = "__activationGeneration";
/// Campaign reference.
pub const KEY_CAMPAIGN: &str = "__campaign";
/// Stage name.
pub const KEY_STAGE: &str = "__stage";
/// Namespace.
pub const KEY_NAMESPACE: &str = "__namespace";
/// Schedule marker.
pub const KEY_SCHEDULE: &str = "__schedule";
/// Site the stage ran on.
pub const KEY_SITE: &str = "__site";
/// Site a remote job came from.
pub const KEY_ORIGIN: &str = "__origin";
/// Operation selector on the remote path. Not prefixed on the wire.
pub const KEY_OPERATION: &str = "operation";

/// Identity of the acting activation, decoded from reserved keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    /// Activation id.
    pub activation: Option<String>,
    /// Activation generation.
    pub activation_generation: Option<String>,
    /// Campaign reference.
    pub campaign: Option<String>,
    /// Stage name.
    pub stage: Option<String>,
    /// Namespace, `default` when absent.
    pub namespace: String,
    /// Schedule marker.
    pub schedule: Option<String>,
    /// Site the stage ran on.
    pub site: Option<String>,
    /// Site a remote job came from.
    pub origin: Option<String>,
}

impl Default for Correlation {
    fn default() -> Self {
        Self {
            activation: None,
            activation_generation: None,
            campaign: None,
            stage: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            schedule: None,
            site: None,
            origin: None,
        }
    }
}

/// Reads a reserved key as a string. Numbers and booleans are accepted
/// because some senders do not quote generations; blanks count as absent.
fn read_key(map: &ValueMap, key: &str) -> Option<String> {
    match map.get(key)? {
        serde_json::Value::String(s) if s.is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl Correlation {
    /// Decodes reserved keys from an input or output map.
    #[must_use]
    pub fn decode(map: &ValueMap) -> Self {
        Self {
            activation: read_key(map, KEY_ACTIVATION),
            activation_generation: read_key(map, KEY_ACTIVATION_GENERATION),
            campaign: read_key(map, KEY_CAMPAIGN),
            stage: read_key(map, KEY_STAGE),
            namespace: read_key(map, KEY_NAMESPACE)
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            schedule: read_key(map, KEY_SCHEDULE),
            site: read_key(map, KEY_SITE),
            origin: read_key(map, KEY_ORIGIN),
        }
    }

    /// Builds the correlation record for a trigger envelope.
    #[must_use]
    pub fn from_envelope(envelope: &ActivationEnvelope) -> Self {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        Self {
            activation: non_empty(&envelope.activation),
            activation_generation: non_empty(&envelope.activation_generation),
            campaign: non_empty(&envelope.campaign),
            stage: non_empty(&envelope.stage),
            namespace: envelope.namespace().to_string(),
            schedule: envelope.schedule.clone(),
            site: read_key(&envelope.inputs, KEY_SITE),
            origin: read_key(&envelope.inputs, KEY_ORIGIN),
        }
    }

    /// Writes the known keys into a map. Keys this record does not hold are
    /// left untouched, so unknown reserved keys pass through verbatim.
    pub fn encode_into(&self, map: &mut ValueMap) {
        let pairs = [
            (KEY_ACTIVATION, &self.activation),
            (KEY_ACTIVATION_GENERATION, &self.activation_generation),
            (KEY_CAMPAIGN, &self.campaign),
            (KEY_STAGE, &self.stage),
            (KEY_SCHEDULE, &self.schedule),
            (KEY_SITE, &self.site),
            (KEY_ORIGIN, &self.origin),
        ];
        for (key, value) in pairs {
            if let Some(value) = value {
                map.insert(key.to_string(), serde_json::Value::String(value.clone()));
            }
        }
        map.insert(
            KEY_NAMESPACE.to_string(),
            serde_json::Value::String(self.namespace.clone()),
        );
    }

    /// Returns the campaign reference or a BadRequest error.
    pub fn require_campaign(&self) -> Result<&str> {
        self.campaign
            .as_deref()
            .ok_or_else(|| EngineError::bad_request(format!("{KEY_CAMPAIGN} is missing")))
    }

    /// Returns the activation id or a BadRequest error.
    pub fn require_activation(&self) -> Result<&str> {
        self.activation
            .as_deref()
            .ok_or_else(|| EngineError::bad_request(format!("{KEY_ACTIVATION} is missing")))
    }
}

/// Returns true if the key is part of the correlation protocol.
#[must_use]
pub fn is_reserved(key: &str) -> bool {
    key.starts_with(RESERVED_PREFIX)
}

/// Returns a copy of the map without reserved keys.
#[must_use]
pub fn strip_reserved(map: &ValueMap) -> ValueMap {
    map.iter()
        .filter(|(k, _)| !is_reserved(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
