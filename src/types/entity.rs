//! Entity data model: EDM types, property values and dynamic entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::defaults::protocol::MAX_KEY_LENGTH;
use crate::error::TableError;

/// Entity data model types understood by the table service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdmType {
    String,
    Binary,
    Boolean,
    DateTime,
    Double,
    Guid,
    Int32,
    Int64,
}

impl EdmType {
    /// Wire name used in `@odata.type` annotations.
    pub const fn odata_name(self) -> &'static str {
        match self {
            Self::String => "Edm.String",
            Self::Binary => "Edm.Binary",
            Self::Boolean => "Edm.Boolean",
            Self::DateTime => "Edm.DateTime",
            Self::Double => "Edm.Double",
            Self::Guid => "Edm.Guid",
            Self::Int32 => "Edm.Int32",
            Self::Int64 => "Edm.Int64",
        }
    }

    pub fn from_odata_name(name: &str) -> Option<Self> {
        Some(match name {
            "Edm.String" => Self::String,
            "Edm.Binary" => Self::Binary,
            "Edm.Boolean" => Self::Boolean,
            "Edm.DateTime" => Self::DateTime,
            "Edm.Double" => Self::Double,
            "Edm.Guid" => Self::Guid,
            "Edm.Int32" => Self::Int32,
            "Edm.Int64" => Self::Int64,
            _ => return None,
        })
    }

    /// Types whose JSON representation needs an explicit annotation.
    pub const fn requires_annotation(self) -> bool {
        matches!(self, Self::Binary | Self::DateTime | Self::Guid | Self::Int64)
    }
}

/// A typed property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityProperty {
    String(String),
    Binary(Vec<u8>),
    Boolean(bool),
    DateTime(DateTime<Utc>),
    Double(f64),
    Guid(Uuid),
    Int32(i32),
    Int64(i64),
}

impl EntityProperty {
    pub const fn edm_type(&self) -> EdmType {
        match self {
            Self::String(_) => EdmType::String,
            Self::Binary(_) => EdmType::Binary,
            Self::Boolean(_) => EdmType::Boolean,
            Self::DateTime(_) => EdmType::DateTime,
            Self::Double(_) => EdmType::Double,
            Self::Guid(_) => EdmType::Guid,
            Self::Int32(_) => EdmType::Int32,
            Self::Int64(_) => EdmType::Int64,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Int32(v) => Some(f64::from(*v)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for EntityProperty {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}
impl From<String> for EntityProperty {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}
impl From<bool> for EntityProperty {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}
impl From<i32> for EntityProperty {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}
impl From<i64> for EntityProperty {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}
impl From<f64> for EntityProperty {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}
impl From<Uuid> for EntityProperty {
    fn from(v: Uuid) -> Self {
        Self::Guid(v)
    }
}
impl From<DateTime<Utc>> for EntityProperty {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}
impl From<Vec<u8>> for EntityProperty {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}

/// An entity whose properties are known only at runtime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicTableEntity {
    pub partition_key: String,
    pub row_key: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub properties: BTreeMap<String, EntityProperty>,
}

impl DynamicTableEntity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<EntityProperty>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&EntityProperty> {
        self.properties.get(name)
    }

    /// Validate partition and row key before they are put on the wire.
    pub fn validate_keys(&self) -> Result<(), TableError> {
        validate_key("PartitionKey", &self.partition_key)?;
        validate_key("RowKey", &self.row_key)
    }
}

/// Reject keys the service would refuse anyway.
pub fn validate_key(name: &str, value: &str) -> Result<(), TableError> {
    if value.chars().count() > MAX_KEY_LENGTH {
        return Err(TableError::invalid_argument(format!(
            "{name} exceeds the maximum length of {MAX_KEY_LENGTH} characters"
        )));
    }
    if let Some(c) = value
        .chars()
        .find(|c| matches!(c, '/' | '\\' | '#' | '?') || c.is_control())
    {
        return Err(TableError::invalid_argument(format!(
            "{name} contains the disallowed character {c:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn odata_names_round_trip() {
        for t in [
            EdmType::String,
            EdmType::Binary,
            EdmType::Boolean,
            EdmType::DateTime,
            EdmType::Double,
            EdmType::Guid,
            EdmType::Int32,
            EdmType::Int64,
        ] {
            assert_eq!(EdmType::from_odata_name(t.odata_name()), Some(t));
        }
        assert_eq!(EdmType::from_odata_name("Edm.Decimal"), None);
    }

    #[test]
    fn key_validation_rejects_reserved_characters() {
        assert!(validate_key("RowKey", "a/b").is_err());
        assert!(validate_key("RowKey", "a#b").is_err());
        assert!(validate_key("RowKey", "tab\there").is_err());
        assert!(validate_key("RowKey", "").is_ok());
        assert!(validate_key("RowKey", &"x".repeat(MAX_KEY_LENGTH + 1)).is_err());
    }

    proptest! {
        #[test]
        fn alphanumeric_keys_within_limit_are_valid(key in "[a-zA-Z0-9_-]{0,256}") {
            prop_assert!(validate_key("PartitionKey", &key).is_ok());
        }
    }
}
