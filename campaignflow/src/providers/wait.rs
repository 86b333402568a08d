//! Provider that waits for named objects to appear in the catalog.

use super::{config_str, config_u64, object_names, ObjectCatalog, ProviderOutput, StageProvider};
use crate::context::Correlation;
use crate::core::ValueMap;
use crate::errors::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Wait provider configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitConfig {
    /// Catalog user.
    pub user: String,
    /// Catalog password.
    #[serde(default)]
    pub password: String,
    /// Seconds between polls.
    #[serde(default, rename = "wait.interval")]
    pub interval: u64,
    /// Maximum number of polls; 0 polls until found.
    #[serde(default, rename = "wait.count")]
    pub count: u64,
}

impl WaitConfig {
    /// Reads the config from JSON. Both the `wait.`-prefixed and the bare
    /// keys are accepted for interval and count.
    pub fn from_value(config: &serde_json::Value) -> Result<Self> {
        let user = config_str(config, "user").unwrap_or_default();
        if user.is_empty() {
            return Err(EngineError::BadConfig("user is required".to_string()));
        }
        let interval = match config_u64(config, "wait.interval")? {
            Some(v) => v,
            None => config_u64(config, "interval")?.unwrap_or(0),
        };
        let count = match config_u64(config, "wait.count")? {
            Some(v) => v,
            None => config_u64(config, "count")?.unwrap_or(0),
        };
        Ok(Self {
            user,
            password: config_str(config, "password").unwrap_or_default(),
            interval,
            count,
        })
    }
}

/// Polls the catalog until every named object of a type exists.
///
/// Inputs: `objectType` (string) and `names` (list). Outputs `objectType`
/// and `status: "OK"` once all are found; fails after `count` polls.
pub struct WaitStageProvider {
    config: WaitConfig,
    catalog: Arc<dyn ObjectCatalog>,
}

impl std::fmt::Debug for WaitStageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitStageProvider")
            .field("user", &self.config.user)
            .field("interval", &self.config.interval)
            .field("count", &self.config.count)
            .finish_non_exhaustive()
    }
}

impl WaitStageProvider {
    /// Creates the provider.
    #[must_use]
    pub fn new(config: WaitConfig, catalog: Arc<dyn ObjectCatalog>) -> Self {
        Self { config, catalog }
    }

    async fn found_all(&self, object_type: &str, names: &[String], namespace: &str) -> Result<bool> {
        let objects = self.catalog.list(object_type, namespace).await?;
        Ok(names
            .iter()
            .all(|name| objects.iter().any(|object| &object.name == name)))
    }
}

#[async_trait]
impl StageProvider for WaitStageProvider {
    async fn process(&self, inputs: ValueMap) -> Result<ProviderOutput> {
        let object_type = inputs
            .get("objectType")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                EngineError::bad_request(format!(
                    "objectType is not a valid string: {}",
                    inputs.get("objectType").unwrap_or(&serde_json::Value::Null)
                ))
            })?
            .to_string();
        let names = object_names(&inputs)?;
        let namespace = Correlation::decode(&inputs).namespace;

        debug!(object_type = %object_type, names = ?names, namespace = %namespace, "Waiting for objects");

        let mut attempts = 0u64;
        while self.config.count == 0 || attempts < self.config.count {
            if self.found_all(&object_type, &names, &namespace).await? {
                info!(object_type = %object_type, names = ?names, "Objects found");
                let mut outputs = ValueMap::new();
                outputs.insert("objectType".to_string(), serde_json::json!(object_type));
                outputs.insert("status".to_string(), serde_json::json!("OK"));
                return Ok(ProviderOutput::done(outputs));
            }
            attempts += 1;
            if self.config.interval > 0 {
                tokio::time::sleep(Duration::from_secs(self.config.interval)).await;
            } else {
                tokio::task::yield_now().await;
            }
        }

        warn!(object_type = %object_type, names = ?names, attempts, "Gave up waiting for objects");
        Err(EngineError::provider(format!(
            "failed to wait for {object_type} {names:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{CatalogObject, InMemoryObjectCatalog};
    use serde_json::json;

    fn inputs(names: serde_json::Value) -> ValueMap {
        let mut inputs = ValueMap::new();
        inputs.insert("objectType".to_string(), json!("instances"));
        inputs.insert("names".to_string(), names);
        inputs
    }

    fn config(count: u64) -> WaitConfig {
        WaitConfig {
            user: "admin".to_string(),
            count,
            ..WaitConfig::default()
        }
    }

    #[test]
    fn test_config_from_dispatch_properties() {
        let config = WaitConfig::from_value(&json!({
            "user": "admin",
            "password": "pw",
            "wait.interval": "2",
            "wait.count": 3
        }))
        .unwrap();
        assert_eq!(config.interval, 2);
        assert_eq!(config.count, 3);

        let bare = WaitConfig::from_value(&json!({"user": "admin", "count": "4"})).unwrap();
        assert_eq!(bare.count, 4);

        assert!(WaitConfig::from_value(&json!({"user": "admin", "wait.count": "x"})).is_err());
    }

    #[tokio::test]
    async fn test_wait_finds_objects() {
        let catalog = Arc::new(InMemoryObjectCatalog::new());
        catalog.insert("default", CatalogObject::new("instances", "web"));
        catalog.insert("default", CatalogObject::new("instances", "db"));

        let provider = WaitStageProvider::new(config(1), catalog);
        let output = provider.process(inputs(json!(["web", "db"]))).await.unwrap();
        assert_eq!(output.outputs["status"], json!("OK"));
        assert_eq!(output.outputs["objectType"], json!("instances"));
    }

    #[tokio::test]
    async fn test_wait_gives_up_after_count() {
        let catalog = Arc::new(InMemoryObjectCatalog::new());
        let provider = WaitStageProvider::new(config(3), catalog);
        let err = provider.process(inputs(json!(["web"]))).await.unwrap_err();
        assert!(matches!(err, EngineError::Provider(_)));
    }

    #[tokio::test]
    async fn test_wait_sees_late_objects() {
        let catalog = Arc::new(InMemoryObjectCatalog::new());
        let provider = WaitStageProvider::new(config(0), catalog.clone());

        let writer = catalog.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.insert("default", CatalogObject::new("instances", "web"));
        });

        let output = tokio::time::timeout(
            Duration::from_secs(2),
            provider.process(inputs(json!(["web"]))),
        )
        .await
        .unwrap()
        .unwrap();
        handle.await.unwrap();
        assert_eq!(output.outputs["status"], json!("OK"));
    }

    #[tokio::test]
    async fn test_wait_rejects_bad_inputs() {
        let provider = WaitStageProvider::new(config(1), Arc::new(InMemoryObjectCatalog::new()));
        let mut missing_type = inputs(json!(["web"]));
        missing_type.remove("objectType");
        assert!(provider.process(missing_type).await.is_err());
        assert!(provider.process(inputs(json!("web"))).await.is_err());
    }
}
