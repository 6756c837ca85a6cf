//! OData JSON entity reading and writing.
//!
//! Properties whose wire representation is ambiguous (64-bit integers,
//! dates, binary, guids) travel as strings with a `<name>@odata.type`
//! annotation. Reading resolves a property's type from, in order: its
//! annotation, the caller's schema, the JSON primitive type.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

use crate::error::TableError;
use crate::execution::stream::MultiBufferStream;
use crate::types::{DynamicTableEntity, EdmType, EntityProperty, EntitySchema};

const ANNOTATION_SUFFIX: &str = "@odata.type";
const ODATA_PREFIX: &str = "odata.";

/// Parse one entity from a buffered response body.
pub fn read_entity_body(
    body: &MultiBufferStream,
    schema: Option<&EntitySchema>,
) -> Result<DynamicTableEntity, TableError> {
    let value: Value = serde_json::from_reader(body.reader())?;
    read_entity(value, schema)
}

/// Parse one entity from a JSON value.
pub fn read_entity(
    value: Value,
    schema: Option<&EntitySchema>,
) -> Result<DynamicTableEntity, TableError> {
    let Value::Object(object) = value else {
        return Err(TableError::parse("entity payload is not a JSON object"));
    };

    let mut annotations = std::collections::HashMap::new();
    for (key, value) in &object {
        if let Some(name) = key.strip_suffix(ANNOTATION_SUFFIX)
            && let Some(type_name) = value.as_str()
        {
            let edm = EdmType::from_odata_name(type_name).ok_or_else(|| {
                TableError::parse(format!("unknown type annotation '{type_name}' on '{name}'"))
            })?;
            annotations.insert(name.to_string(), edm);
        }
    }

    let mut entity = DynamicTableEntity::default();
    for (key, value) in object {
        if key.ends_with(ANNOTATION_SUFFIX) {
            continue;
        }
        if let Some(meta) = key.strip_prefix(ODATA_PREFIX) {
            if meta == "etag" {
                entity.etag = value.as_str().map(str::to_string);
            }
            continue;
        }
        match key.as_str() {
            "PartitionKey" => entity.partition_key = expect_string(&key, value)?,
            "RowKey" => entity.row_key = expect_string(&key, value)?,
            "Timestamp" => {
                entity.timestamp = Some(parse_datetime(&expect_string(&key, value)?)?);
            }
            _ => {
                if value.is_null() {
                    continue;
                }
                let declared = annotations
                    .get(&key)
                    .copied()
                    .or_else(|| schema.and_then(|s| s.get(&key)));
                let property = read_property(&key, value, declared)?;
                entity.properties.insert(key, property);
            }
        }
    }
    Ok(entity)
}

fn expect_string(key: &str, value: Value) -> Result<String, TableError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(TableError::parse(format!(
            "'{key}' must be a string, got {other}"
        ))),
    }
}

fn parse_datetime(text: &str) -> Result<DateTime<Utc>, TableError> {
    Ok(DateTime::parse_from_rfc3339(text)?.with_timezone(&Utc))
}

fn read_property(
    name: &str,
    value: Value,
    declared: Option<EdmType>,
) -> Result<EntityProperty, TableError> {
    let mismatch =
        |edm: EdmType, v: &Value| TableError::parse(format!("'{name}' is not a valid {}: {v}", edm.odata_name()));

    let Some(edm) = declared else {
        return infer_property(name, value);
    };

    let property = match (edm, &value) {
        (EdmType::String, Value::String(s)) => EntityProperty::String(s.clone()),
        (EdmType::Boolean, Value::Bool(b)) => EntityProperty::Boolean(*b),
        (EdmType::Int32, Value::Number(n)) => n
            .as_i64()
            .and_then(|v| i32::try_from(v).ok())
            .map(EntityProperty::Int32)
            .ok_or_else(|| mismatch(edm, &value))?,
        (EdmType::Int32, Value::String(s)) => {
            EntityProperty::Int32(s.parse().map_err(|_| mismatch(edm, &value))?)
        }
        (EdmType::Int64, Value::Number(n)) => {
            EntityProperty::Int64(n.as_i64().ok_or_else(|| mismatch(edm, &value))?)
        }
        (EdmType::Int64, Value::String(s)) => {
            EntityProperty::Int64(s.parse().map_err(|_| mismatch(edm, &value))?)
        }
        (EdmType::Double, Value::Number(n)) => {
            EntityProperty::Double(n.as_f64().ok_or_else(|| mismatch(edm, &value))?)
        }
        (EdmType::Double, Value::String(s)) => EntityProperty::Double(match s.as_str() {
            "NaN" => f64::NAN,
            "Infinity" | "INF" => f64::INFINITY,
            "-Infinity" | "-INF" => f64::NEG_INFINITY,
            other => other.parse().map_err(|_| mismatch(edm, &value))?,
        }),
        (EdmType::DateTime, Value::String(s)) => EntityProperty::DateTime(parse_datetime(s)?),
        (EdmType::Binary, Value::String(s)) => EntityProperty::Binary(STANDARD.decode(s)?),
        (EdmType::Guid, Value::String(s)) => {
            EntityProperty::Guid(Uuid::parse_str(s).map_err(|_| mismatch(edm, &value))?)
        }
        _ => return Err(mismatch(edm, &value)),
    };
    Ok(property)
}

/// Type from the JSON primitive alone. Integers that fit 32 bits stay 32-bit.
fn infer_property(name: &str, value: Value) -> Result<EntityProperty, TableError> {
    match value {
        Value::String(s) => Ok(EntityProperty::String(s)),
        Value::Bool(b) => Ok(EntityProperty::Boolean(b)),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(i32::try_from(v)
                    .map(EntityProperty::Int32)
                    .unwrap_or(EntityProperty::Int64(v)))
            } else {
                n.as_f64()
                    .map(EntityProperty::Double)
                    .ok_or_else(|| TableError::parse(format!("'{name}' is out of range: {n}")))
            }
        }
        other => Err(TableError::parse(format!(
            "'{name}' has an unsupported JSON value: {other}"
        ))),
    }
}

/// RFC 3339 with seven fractional digits, the service's native precision.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    let whole = value.to_rfc3339_opts(SecondsFormat::Secs, true);
    let seconds = whole.trim_end_matches('Z');
    format!("{seconds}.{:07}Z", value.timestamp_subsec_nanos() / 100)
}

/// Serialise `entity` as an OData JSON object.
pub fn write_entity(entity: &DynamicTableEntity) -> Value {
    let mut object = Map::new();
    object.insert("PartitionKey".into(), Value::String(entity.partition_key.clone()));
    object.insert("RowKey".into(), Value::String(entity.row_key.clone()));

    for (name, property) in &entity.properties {
        let (value, annotate) = match property {
            EntityProperty::String(s) => (Value::String(s.clone()), false),
            EntityProperty::Boolean(b) => (Value::Bool(*b), false),
            EntityProperty::Int32(v) => (Value::Number((*v).into()), false),
            EntityProperty::Int64(v) => (Value::String(v.to_string()), true),
            EntityProperty::Double(v) => match Number::from_f64(*v) {
                Some(n) => (Value::Number(n), false),
                None => (Value::String(non_finite_literal(*v).into()), true),
            },
            EntityProperty::DateTime(dt) => (Value::String(format_datetime(dt)), true),
            EntityProperty::Binary(bytes) => (Value::String(STANDARD.encode(bytes)), true),
            EntityProperty::Guid(g) => (Value::String(g.to_string()), true),
        };
        if annotate {
            object.insert(
                format!("{name}{ANNOTATION_SUFFIX}"),
                Value::String(property.edm_type().odata_name().into()),
            );
        }
        object.insert(name.clone(), value);
    }
    Value::Object(object)
}

/// `write_entity` as request body bytes.
pub fn write_entity_bytes(entity: &DynamicTableEntity) -> Result<Vec<u8>, TableError> {
    Ok(serde_json::to_vec(&write_entity(entity))?)
}

fn non_finite_literal(v: f64) -> &'static str {
    if v.is_nan() {
        "NaN"
    } else if v.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn annotated_int64_keeps_full_width() {
        let entity = read_entity(
            json!({"PartitionKey": "p", "RowKey": "r", "prop@odata.type": "Edm.Int64", "prop": "123"}),
            None,
        )
        .unwrap();
        assert_eq!(entity.get("prop"), Some(&EntityProperty::Int64(123)));

        let big = read_entity(
            json!({"PartitionKey": "p", "RowKey": "r", "prop@odata.type": "Edm.Int64", "prop": "9007199254740993"}),
            None,
        )
        .unwrap();
        assert_eq!(big.get("prop"), Some(&EntityProperty::Int64(9_007_199_254_740_993)));
    }

    #[test]
    fn int64_written_then_read_back() {
        let entity = DynamicTableEntity::new("p", "r").with_property("n", EntityProperty::Int64(123));
        let wire = write_entity(&entity);
        assert_eq!(wire["n"], json!("123"));
        assert_eq!(wire["n@odata.type"], json!("Edm.Int64"));
        let back = read_entity(wire, None).unwrap();
        assert_eq!(back.get("n"), Some(&EntityProperty::Int64(123)));
    }

    #[test]
    fn metadata_is_stripped_and_etag_kept() {
        let entity = read_entity(
            json!({
                "odata.metadata": "https://a/$metadata#t/@Element",
                "odata.etag": "W/\"datetime'2024'\"",
                "PartitionKey": "p",
                "RowKey": "r",
                "Timestamp": "2024-01-02T03:04:05.1234567Z",
                "Name": "x",
                "Age": 42,
                "Big": 5000000000i64,
                "Score": 1.5,
                "Gone": null
            }),
            None,
        )
        .unwrap();
        assert_eq!(entity.etag.as_deref(), Some("W/\"datetime'2024'\""));
        assert_eq!(entity.partition_key, "p");
        assert!(entity.timestamp.is_some());
        assert_eq!(entity.get("Age"), Some(&EntityProperty::Int32(42)));
        assert_eq!(entity.get("Big"), Some(&EntityProperty::Int64(5_000_000_000)));
        assert_eq!(entity.get("Score"), Some(&EntityProperty::Double(1.5)));
        assert!(entity.get("Gone").is_none());
        assert_eq!(entity.properties.len(), 4);
    }

    #[test]
    fn schema_resolves_unannotated_strings() {
        let schema = EntitySchema::default()
            .with_property("When", EdmType::DateTime)
            .with_property("Count", EdmType::Int64);
        let entity = read_entity(
            json!({"PartitionKey": "p", "RowKey": "r", "When": "2024-01-02T03:04:05Z", "Count": 7}),
            Some(&schema),
        )
        .unwrap();
        assert!(matches!(entity.get("When"), Some(EntityProperty::DateTime(_))));
        assert_eq!(entity.get("Count"), Some(&EntityProperty::Int64(7)));
    }

    #[test]
    fn typed_values_round_trip() {
        let when = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let id = Uuid::new_v4();
        let entity = DynamicTableEntity::new("p", "r")
            .with_property("When", EntityProperty::DateTime(when))
            .with_property("Blob", EntityProperty::Binary(vec![0, 1, 2, 255]))
            .with_property("Id", EntityProperty::Guid(id))
            .with_property("Inf", EntityProperty::Double(f64::INFINITY));
        let wire = write_entity(&entity);
        assert_eq!(wire["When"], json!("2024-01-02T03:04:05.0000000Z"));
        assert_eq!(wire["Inf"], json!("Infinity"));

        let back = read_entity(wire, None).unwrap();
        assert_eq!(back.get("When"), Some(&EntityProperty::DateTime(when)));
        assert_eq!(back.get("Blob"), Some(&EntityProperty::Binary(vec![0, 1, 2, 255])));
        assert_eq!(back.get("Id"), Some(&EntityProperty::Guid(id)));
        assert_eq!(back.get("Inf"), Some(&EntityProperty::Double(f64::INFINITY)));
    }

    #[test]
    fn malformed_values_are_parse_errors() {
        let err = read_entity(
            json!({"PartitionKey": "p", "RowKey": "r", "n@odata.type": "Edm.Int64", "n": "abc"}),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, TableError::Parse { .. }));
        assert!(read_entity(json!([1, 2]), None).is_err());
        assert!(read_entity(json!({"PartitionKey": 1}), None).is_err());
    }
}
