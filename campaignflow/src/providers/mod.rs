//! Stage providers: the pluggable executors behind each stage.
//!
//! A provider is built by a [`ProviderFactory`] from an identifier and a
//! JSON config, then asked to `process` an input map. The remote path maps
//! an `operation` name onto an identifier through [`OperationDispatch`].

mod catalog;
mod dispatch;
mod materialize;
mod mock;
mod wait;

pub use catalog::{CatalogObject, InMemoryObjectCatalog, ObjectCatalog, CATALOG_TYPE};
pub use dispatch::{OperationDispatch, ResolvedOperation};
pub use materialize::{MaterializeConfig, MaterializeStageProvider};
pub use mock::MockStageProvider;
pub use wait::{WaitConfig, WaitStageProvider};

use crate::context::Correlation;
use crate::core::ValueMap;
use crate::errors::{EngineError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Identifier of the mock provider.
pub const MOCK_PROVIDER: &str = "providers.stage.mock";
/// Identifier of the wait provider.
pub const WAIT_PROVIDER: &str = "providers.stage.wait";
/// Identifier of the materialize provider.
pub const MATERIALIZE_PROVIDER: &str = "providers.stage.materialize";

/// What a provider returns: outputs plus a pause request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderOutput {
    /// Stage outputs.
    pub outputs: ValueMap,
    /// When set, the stage waits for external input instead of finishing.
    pub paused: bool,
}

impl ProviderOutput {
    /// A finished stage.
    #[must_use]
    pub fn done(outputs: ValueMap) -> Self {
        Self {
            outputs,
            paused: false,
        }
    }

    /// A stage waiting for external input.
    #[must_use]
    pub fn paused(outputs: ValueMap) -> Self {
        Self {
            outputs,
            paused: true,
        }
    }
}

/// A stage executor.
#[async_trait]
pub trait StageProvider: Send + Sync {
    /// Runs the stage against an input map. Reserved `__` keys carry the
    /// correlation of the acting activation.
    async fn process(&self, inputs: ValueMap) -> Result<ProviderOutput>;
}

/// Builds a provider from its JSON config.
pub type ProviderBuilder =
    Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn StageProvider>> + Send + Sync>;

/// Registry of provider builders keyed by identifier.
#[derive(Default)]
pub struct ProviderFactory {
    builders: RwLock<HashMap<String, ProviderBuilder>>,
}

impl std::fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderFactory")
            .field("providers", &self.list_providers())
            .finish()
    }
}

impl ProviderFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory with the mock, wait and materialize providers
    /// registered against a catalog.
    #[must_use]
    pub fn with_defaults(catalog: Arc<dyn ObjectCatalog>) -> Self {
        let factory = Self::new();
        factory.register(
            MOCK_PROVIDER,
            Box::new(|_config: &serde_json::Value| {
                Ok(Arc::new(MockStageProvider::new()) as Arc<dyn StageProvider>)
            }),
        );

        let wait_catalog = catalog.clone();
        factory.register(
            WAIT_PROVIDER,
            Box::new(move |config: &serde_json::Value| {
                let config = WaitConfig::from_value(config)?;
                Ok(Arc::new(WaitStageProvider::new(config, wait_catalog.clone()))
                    as Arc<dyn StageProvider>)
            }),
        );

        factory.register(
            MATERIALIZE_PROVIDER,
            Box::new(move |config: &serde_json::Value| {
                let config = MaterializeConfig::from_value(config)?;
                Ok(Arc::new(MaterializeStageProvider::new(config, catalog.clone()))
                    as Arc<dyn StageProvider>)
            }),
        );
        factory
    }

    /// Registers (or replaces) a builder.
    pub fn register(&self, id: impl Into<String>, builder: ProviderBuilder) {
        self.builders.write().insert(id.into(), builder);
    }

    /// Registers a ready-made provider instance that ignores config.
    pub fn register_instance(&self, id: impl Into<String>, provider: Arc<dyn StageProvider>) {
        self.register(
            id,
            Box::new(move |_config: &serde_json::Value| Ok(provider.clone())),
        );
    }

    /// Builds a provider.
    pub fn create(&self, id: &str, config: &serde_json::Value) -> Result<Arc<dyn StageProvider>> {
        let builders = self.builders.read();
        let builder = builders
            .get(id)
            .ok_or_else(|| EngineError::BadConfig(format!("provider {id} is not supported")))?;
        builder(config)
    }

    /// Checks if an identifier is registered.
    #[must_use]
    pub fn is_registered(&self, id: &str) -> bool {
        self.builders.read().contains_key(id)
    }

    /// Lists registered identifiers.
    #[must_use]
    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.builders.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Reads a string from a provider config. Numbers are accepted.
pub(crate) fn config_str(config: &serde_json::Value, key: &str) -> Option<String> {
    match config.get(key)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reads a non-negative integer from a provider config. Dispatch builds
/// configs from string properties, so numeric strings are accepted.
pub(crate) fn config_u64(config: &serde_json::Value, key: &str) -> Result<Option<u64>> {
    match config.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Number(n)) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| EngineError::BadConfig(format!("{key} must be a non-negative integer"))),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| EngineError::BadConfig(format!("failed to parse {key} {s}"))),
        Some(other) => Err(EngineError::BadConfig(format!("failed to parse {key} {other}"))),
    }
}

/// Reads the `names` input as a list of strings, prefixed with the origin
/// site when the stage runs on behalf of another site.
pub(crate) fn object_names(inputs: &ValueMap) -> Result<Vec<String>> {
    let names = inputs
        .get("names")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| EngineError::bad_request("input names is not a valid list"))?;
    let origin = Correlation::decode(inputs).origin;

    names
        .iter()
        .map(|name| {
            let name = name
                .as_str()
                .ok_or_else(|| EngineError::bad_request(format!("input name {name} is not a string")))?;
            Ok(match &origin {
                Some(origin) => format!("{origin}-{name}"),
                None => name.to_string(),
            })
        })
        .collect()
}
