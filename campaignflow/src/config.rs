//! Engine configuration.

use crate::core::DEFAULT_NAMESPACE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Environment variables consulted for the local site id, in order.
pub const SITE_ID_VARS: [&str; 2] = ["CAMPAIGNFLOW_SITE_ID", "SITE_ID"];

/// Site id used when nothing is configured.
pub const DEFAULT_SITE_ID: &str = "local";

/// Configuration for a [`StageEngine`](crate::engine::StageEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Id of the site this engine runs on. Outputs from other sites are
    /// prefixed with their site id.
    pub site_id: String,
    /// Namespace used when a message does not carry one.
    pub default_namespace: String,
    /// Vendor properties, e.g. `wait.user`. Feed the operation dispatch
    /// table for remote jobs.
    pub properties: HashMap<String, String>,
    /// Serialize outcome reporting and resume per activation id.
    pub serialize_activations: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            site_id: DEFAULT_SITE_ID.to_string(),
            default_namespace: DEFAULT_NAMESPACE.to_string(),
            properties: HashMap::new(),
            serialize_activations: false,
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from the process environment.
    ///
    /// `CAMPAIGNFLOW_SITE_ID` wins over `SITE_ID`. Variables prefixed with
    /// `CAMPAIGNFLOW_PROP_` become properties, lower-cased with `__`
    /// turned into `.` (`CAMPAIGNFLOW_PROP_WAIT__USER` is `wait.user`).
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Builds a configuration from an explicit variable list.
    #[must_use]
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let mut config = Self::default();

        if let Some(site) = SITE_ID_VARS
            .iter()
            .find_map(|name| vars.get(*name).filter(|v| !v.is_empty()))
        {
            config.site_id.clone_from(site);
        }
        if let Some(ns) = vars
            .get("CAMPAIGNFLOW_NAMESPACE")
            .filter(|v| !v.is_empty())
        {
            config.default_namespace.clone_from(ns);
        }
        config.serialize_activations = vars
            .get("CAMPAIGNFLOW_SERIALIZE_ACTIVATIONS")
            .is_some_and(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"));

        for (key, value) in &vars {
            if let Some(prop) = key.strip_prefix("CAMPAIGNFLOW_PROP_") {
                config
                    .properties
                    .insert(prop.to_lowercase().replace("__", "."), value.clone());
            }
        }
        config
    }

    /// Sets the site id.
    #[must_use]
    pub fn with_site_id(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = site_id.into();
        self
    }

    /// Sets the default namespace.
    #[must_use]
    pub fn with_default_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.default_namespace = namespace.into();
        self
    }

    /// Adds a vendor property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Enables or disables per-activation serialization.
    #[must_use]
    pub fn with_serialized_activations(mut self, enabled: bool) -> Self {
        self.serialize_activations = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.site_id, "local");
        assert_eq!(config.default_namespace, "default");
        assert!(!config.serialize_activations);
    }

    #[test]
    fn test_from_vars() {
        let config = EngineConfig::from_vars(vars(&[
            ("SITE_ID", "fallback"),
            ("CAMPAIGNFLOW_SITE_ID", "hq"),
            ("CAMPAIGNFLOW_NAMESPACE", "ops"),
            ("CAMPAIGNFLOW_SERIALIZE_ACTIVATIONS", "true"),
            ("CAMPAIGNFLOW_PROP_WAIT__USER", "admin"),
            ("PATH", "/usr/bin"),
        ]));

        assert_eq!(config.site_id, "hq");
        assert_eq!(config.default_namespace, "ops");
        assert!(config.serialize_activations);
        assert_eq!(config.properties.get("wait.user"), Some(&"admin".to_string()));
        assert_eq!(config.properties.len(), 1);
    }

    #[test]
    fn test_site_id_fallback() {
        let config = EngineConfig::from_vars(vars(&[("SITE_ID", "edge-1")]));
        assert_eq!(config.site_id, "edge-1");
    }

    #[test]
    fn test_builders_and_serde() {
        let config = EngineConfig::new()
            .with_site_id("hq")
            .with_property("materialize.user", "admin")
            .with_serialized_activations(true);

        let json = serde_json::to_value(&config).unwrap();
        let back: EngineConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);

        let partial: EngineConfig = serde_json::from_str(r#"{"site_id": "x"}"#).unwrap();
        assert_eq!(partial.default_namespace, "default");
    }
}
