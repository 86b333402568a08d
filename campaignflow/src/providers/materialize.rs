//! Provider that turns catalog entries into concrete objects.

use super::{config_str, object_names, CatalogObject, ObjectCatalog, ProviderOutput, StageProvider, CATALOG_TYPE};
use crate::context::Correlation;
use crate::core::ValueMap;
use crate::errors::{EngineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Object type written when the stage does not name one.
const DEFAULT_TARGET_TYPE: &str = "instances";

/// Materialize provider configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializeConfig {
    /// Catalog user.
    pub user: String,
    /// Catalog password.
    #[serde(default)]
    pub password: String,
}

impl MaterializeConfig {
    /// Reads the config from JSON; `user` is required.
    pub fn from_value(config: &serde_json::Value) -> Result<Self> {
        let user = config_str(config, "user").unwrap_or_default();
        if user.is_empty() {
            return Err(EngineError::BadConfig("user is required".to_string()));
        }
        Ok(Self {
            user,
            password: config_str(config, "password").unwrap_or_default(),
        })
    }
}

/// Copies named `catalogs` entries into objects of a target type.
///
/// All names are checked before anything is written, so a missing entry
/// leaves the catalog untouched.
pub struct MaterializeStageProvider {
    config: MaterializeConfig,
    catalog: Arc<dyn ObjectCatalog>,
}

impl std::fmt::Debug for MaterializeStageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaterializeStageProvider")
            .field("user", &self.config.user)
            .finish_non_exhaustive()
    }
}

impl MaterializeStageProvider {
    /// Creates the provider.
    #[must_use]
    pub fn new(config: MaterializeConfig, catalog: Arc<dyn ObjectCatalog>) -> Self {
        Self { config, catalog }
    }
}

#[async_trait]
impl StageProvider for MaterializeStageProvider {
    async fn process(&self, inputs: ValueMap) -> Result<ProviderOutput> {
        let names = object_names(&inputs)?;
        let namespace = Correlation::decode(&inputs).namespace;
        let target_type = inputs
            .get("objectType")
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_TARGET_TYPE)
            .to_string();

        let mut entries = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in &names {
            match self.catalog.get(CATALOG_TYPE, name, &namespace).await {
                Ok(entry) => entries.push(entry),
                Err(err) => missing.push(format!("{name} (reason: {err})")),
            }
        }
        if !missing.is_empty() {
            let message = format!("failed to get all catalogs: {}", missing.join(", "));
            error!(namespace = %namespace, "{message}");
            return Err(EngineError::bad_request(message));
        }

        for entry in &entries {
            let object = CatalogObject::new(target_type.clone(), entry.name.clone())
                .with_properties(entry.properties.clone());
            self.catalog.upsert(&namespace, object).await?;
        }
        info!(
            namespace = %namespace,
            object_type = %target_type,
            count = entries.len(),
            "Catalog entries materialized"
        );

        let mut outputs = ValueMap::new();
        outputs.insert("objectType".to_string(), serde_json::json!(target_type));
        outputs.insert("materialized".to_string(), serde_json::json!(entries.len()));
        Ok(ProviderOutput::done(outputs))
    }
}
