//! Maps remote `operation` names onto providers.

use super::{MaterializeConfig, WaitConfig, MATERIALIZE_PROVIDER, MOCK_PROVIDER, WAIT_PROVIDER};
use crate::errors::{EngineError, Result};
use std::collections::HashMap;

/// Provider identifier and config resolved for an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOperation {
    /// Provider identifier.
    pub provider: String,
    /// Provider config.
    pub config: serde_json::Value,
}

/// The closed table of operations a remote site may request.
///
/// Provider configs come from engine properties: `wait.user` becomes the
/// wait provider's `user`, `materialize.user` the materialize provider's.
#[derive(Debug, Clone, Default)]
pub struct OperationDispatch {
    properties: HashMap<String, String>,
}

impl OperationDispatch {
    /// Creates a dispatch table over engine properties.
    #[must_use]
    pub fn new(properties: HashMap<String, String>) -> Self {
        Self { properties }
    }

    /// Returns the properties under `prefix`, with the prefix removed, as a
    /// JSON object.
    fn section(&self, prefix: &str) -> serde_json::Value {
        let section: serde_json::Map<String, serde_json::Value> = self
            .properties
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(prefix)
                    .map(|key| (key.to_string(), serde_json::Value::String(v.clone())))
            })
            .collect();
        serde_json::Value::Object(section)
    }

    /// Resolves an operation. Unknown operations are a BadRequest; a
    /// provider section that fails validation is a BadConfig.
    pub fn resolve(&self, operation: &str) -> Result<ResolvedOperation> {
        let (provider, config) = match operation {
            "wait" => {
                let config = self.section("wait.");
                WaitConfig::from_value(&config)?;
                (WAIT_PROVIDER, config)
            }
            "materialize" => {
                let config = self.section("materialize.");
                MaterializeConfig::from_value(&config)?;
                (MATERIALIZE_PROVIDER, config)
            }
            "mock" => (MOCK_PROVIDER, serde_json::Value::Null),
            other => {
                return Err(EngineError::bad_request(format!(
                    "operation {other} is not supported"
                )))
            }
        };
        Ok(ResolvedOperation {
            provider: provider.to_string(),
            config,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::State;
    use serde_json::json;

    fn dispatch() -> OperationDispatch {
        let mut properties = HashMap::new();
        properties.insert("wait.user".to_string(), "admin".to_string());
        properties.insert("wait.wait.count".to_string(), "3".to_string());
        properties.insert("materialize.user".to_string(), "admin".to_string());
        properties.insert("unrelated".to_string(), "x".to_string());
        OperationDispatch::new(properties)
    }

    #[test]
    fn test_resolve_wait_strips_prefix() {
        let resolved = dispatch().resolve("wait").unwrap();
        assert_eq!(resolved.provider, WAIT_PROVIDER);
        assert_eq!(resolved.config, json!({"user": "admin", "wait.count": "3"}));
        assert_eq!(WaitConfig::from_value(&resolved.config).unwrap().count, 3);
    }

    #[test]
    fn test_resolve_materialize_and_mock() {
        let dispatch = dispatch();
        assert_eq!(
            dispatch.resolve("materialize").unwrap().provider,
            MATERIALIZE_PROVIDER
        );
        assert_eq!(dispatch.resolve("mock").unwrap().provider, MOCK_PROVIDER);
    }

    #[test]
    fn test_unknown_operation_is_bad_request() {
        let err = dispatch().resolve("deploy").unwrap_err();
        assert_eq!(err.state(), State::BadRequest);
        assert_eq!(err.to_string(), "operation deploy is not supported");
    }

    #[test]
    fn test_missing_user_is_bad_config() {
        let err = OperationDispatch::default().resolve("wait").unwrap_err();
        assert_eq!(err.state(), State::BadConfig);
    }
}
