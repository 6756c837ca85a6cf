//! Declared property types for typed entities.
//!
//! The wire format cannot tell an `Edm.String` from a string-encoded value of
//! another type unless it is annotated. An `EntitySchema` supplies the declared
//! type per property so the parser can resolve ambiguous values.

use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use super::entity::{DynamicTableEntity, EdmType};
use crate::error::TableError;

/// Property name to declared EDM type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntitySchema {
    properties: HashMap<String, EdmType>,
}

impl EntitySchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_property(mut self, name: impl Into<String>, edm_type: EdmType) -> Self {
        self.properties.insert(name.into(), edm_type);
        self
    }

    pub fn get(&self, name: &str) -> Option<EdmType> {
        self.properties.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// A strongly typed entity mapped to and from `DynamicTableEntity`.
pub trait TableEntity: Sized + Send + 'static {
    /// Stable name used as the schema cache key.
    fn type_name() -> &'static str;

    /// Declared types of the entity's properties.
    fn schema() -> EntitySchema;

    fn from_entity(entity: DynamicTableEntity) -> Result<Self, TableError>;

    fn to_entity(&self) -> DynamicTableEntity;
}

/// Bounded memo of schemas keyed by entity type name.
#[derive(Clone)]
pub struct SchemaCache {
    inner: Arc<Mutex<LruCache<&'static str, Arc<EntitySchema>>>>,
}

impl SchemaCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Schema for `E`, built once per type while caching is enabled and
    /// rebuilt on every call otherwise.
    pub fn schema_for<E: TableEntity>(&self, caching: bool) -> Arc<EntitySchema> {
        if !caching {
            return Arc::new(E::schema());
        }
        let mut cache = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(schema) = cache.get(E::type_name()) {
            return schema.clone();
        }
        let schema = Arc::new(E::schema());
        cache.put(E::type_name(), schema.clone());
        schema
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(256).unwrap_or(NonZeroUsize::MIN))
    }
}

impl std::fmt::Debug for SchemaCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaCache").field("len", &self.len()).finish()
    }
}
