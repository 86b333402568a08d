//! Object catalog the reference providers read from and write to.

use crate::errors::{EngineError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Object type of catalog entries that can be materialized.
pub const CATALOG_TYPE: &str = "catalogs";

/// A named object stored in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogObject {
    /// Object name, unique per (namespace, type).
    pub name: String,
    /// Object type, e.g. `catalogs`, `instances`, `targets`.
    pub object_type: String,
    /// Free-form body.
    #[serde(default)]
    pub properties: serde_json::Value,
}

impl CatalogObject {
    /// Creates an object with an empty body.
    #[must_use]
    pub fn new(object_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            object_type: object_type.into(),
            properties: serde_json::Value::Null,
        }
    }

    /// Sets the body.
    #[must_use]
    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Store of named objects grouped by type.
#[async_trait]
pub trait ObjectCatalog: Send + Sync {
    /// Lists the objects of a type.
    async fn list(&self, object_type: &str, namespace: &str) -> Result<Vec<CatalogObject>>;

    /// Gets one object.
    async fn get(&self, object_type: &str, name: &str, namespace: &str) -> Result<CatalogObject>;

    /// Creates or replaces an object.
    async fn upsert(&self, namespace: &str, object: CatalogObject) -> Result<()>;
}

type Key = (String, String, String);

/// In-memory catalog.
#[derive(Debug, Default)]
pub struct InMemoryObjectCatalog {
    objects: DashMap<Key, CatalogObject>,
}

impl InMemoryObjectCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an object without going through the async trait.
    pub fn insert(&self, namespace: &str, object: CatalogObject) {
        self.objects.insert(
            (
                namespace.to_string(),
                object.object_type.clone(),
                object.name.clone(),
            ),
            object,
        );
    }

    /// Returns the number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if the catalog holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectCatalog for InMemoryObjectCatalog {
    async fn list(&self, object_type: &str, namespace: &str) -> Result<Vec<CatalogObject>> {
        Ok(self
            .objects
            .iter()
            .filter(|entry| entry.key().0 == namespace && entry.key().1 == object_type)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get(&self, object_type: &str, name: &str, namespace: &str) -> Result<CatalogObject> {
        self.objects
            .get(&(
                namespace.to_string(),
                object_type.to_string(),
                name.to_string(),
            ))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::not_found("object", name))
    }

    async fn upsert(&self, namespace: &str, object: CatalogObject) -> Result<()> {
        self.insert(namespace, object);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_catalog_is_scoped_by_namespace_and_type() {
        let catalog = InMemoryObjectCatalog::new();
        catalog.insert("default", CatalogObject::new("catalogs", "web"));
        catalog.insert("default", CatalogObject::new("instances", "web"));
        catalog.insert("other", CatalogObject::new("catalogs", "db"));

        assert_eq!(catalog.list("catalogs", "default").await.unwrap().len(), 1);
        assert!(catalog.get("instances", "web", "default").await.is_ok());
        assert!(catalog
            .get("catalogs", "db", "default")
            .await
            .unwrap_err()
            .is_not_found());
        assert_eq!(catalog.len(), 3);
    }
}
