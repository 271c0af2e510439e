//! Raw document → typed record decoding.
//!
//! Document shapes (external schema):
//!
//! ```text
//! work order:       { "category": str, "dateCreated": rfc3339?, "materials": [material] }
//! billing document: { "title": str,    "dueDate": rfc3339?,     "materials": [material] }
//! material:         { "name": str, "quantity": num, "unitCost": num, "unit": str? }
//! ```
//!
//! Fields are decoded one at a time so a failure names the exact path
//! (`materials[2].unitCost`). Numbers may also arrive as strings (`"12.5"`,
//! `"NaN"`); non-finite values are kept and left to aggregation to sanitize.

use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned, Deserializer, Unexpected, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use materialflow_feeds::{Collection, RawDocument};

use crate::record::{MaterialRecord, RecordKind, SourceRecord};

/// Classification of a structural decode failure.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeErrorKind {
    MissingField,
    TypeMismatch,
    CorruptValue,
    Unknown,
}

impl core::fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            DecodeErrorKind::MissingField => "missing field",
            DecodeErrorKind::TypeMismatch => "type mismatch",
            DecodeErrorKind::CorruptValue => "corrupt value",
            DecodeErrorKind::Unknown => "unrecognized decode failure",
        })
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind} at `{path}`: {message}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub path: String,
    pub message: String,
}

impl DecodeError {
    fn missing(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            kind: DecodeErrorKind::MissingField,
            message: format!("required field `{path}` is absent"),
            path,
        }
    }

    fn type_mismatch(path: impl Into<String>, expected: &str, found: &JsonValue) -> Self {
        Self {
            kind: DecodeErrorKind::TypeMismatch,
            path: path.into(),
            message: format!("expected {expected}, found {}", json_type_name(found)),
        }
    }

    fn from_serde(path: impl Into<String>, err: &serde_json::Error) -> Self {
        Self {
            kind: classify(err),
            path: path.into(),
            message: err.to_string(),
        }
    }
}

fn classify(err: &serde_json::Error) -> DecodeErrorKind {
    use serde_json::error::Category;

    if err.classify() != Category::Data {
        return DecodeErrorKind::Unknown;
    }

    let msg = err.to_string();
    if msg.starts_with("missing field") {
        DecodeErrorKind::MissingField
    } else if msg.starts_with("invalid type") {
        DecodeErrorKind::TypeMismatch
    } else {
        // invalid value / length, unknown variant, custom parse errors (dates).
        DecodeErrorKind::CorruptValue
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// Decode a raw document from `collection` into a [`SourceRecord`].
///
/// `now` is the fallback due date for billing documents that carry none.
pub fn decode(
    raw: &RawDocument,
    collection: Collection,
    now: DateTime<Utc>,
) -> Result<SourceRecord, DecodeError> {
    let kind = RecordKind::from(collection);
    let fields = &raw.fields;

    let (category, timestamp) = match kind {
        RecordKind::WorkOrder => {
            let category: String = required(fields, "category")?;
            let created: Option<DateTime<Utc>> = optional(fields, "dateCreated")?;
            (category, created)
        }
        RecordKind::BillingDocument => {
            let title: String = required(fields, "title")?;
            let due: Option<DateTime<Utc>> = optional(fields, "dueDate")?;
            (title, Some(due.unwrap_or(now)))
        }
    };

    let materials = match fields.get("materials") {
        None => return Err(DecodeError::missing("materials")),
        Some(JsonValue::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| decode_material(item, &format!("materials[{i}]")))
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => return Err(DecodeError::type_mismatch("materials", "an array", other)),
    };

    Ok(SourceRecord {
        id: raw.id.clone(),
        kind,
        category,
        timestamp,
        materials,
    })
}

fn decode_material(value: &JsonValue, path: &str) -> Result<MaterialRecord, DecodeError> {
    let fields = match value {
        JsonValue::Object(map) => map,
        other => return Err(DecodeError::type_mismatch(path, "an object", other)),
    };

    let name: String = required_at(fields, "name", path)?;
    let quantity: LenientNumber = required_at(fields, "quantity", path)?;
    let unit_cost: LenientNumber = required_at(fields, "unitCost", path)?;
    let unit: Option<String> = optional_at(fields, "unit", path)?;

    Ok(MaterialRecord {
        name,
        quantity: quantity.0,
        unit_cost: unit_cost.0,
        unit,
    })
}

fn required<T: DeserializeOwned>(fields: &Map<String, JsonValue>, name: &str) -> Result<T, DecodeError> {
    match fields.get(name) {
        None => Err(DecodeError::missing(name)),
        Some(v) => T::deserialize(v).map_err(|e| DecodeError::from_serde(name, &e)),
    }
}

fn optional<T: DeserializeOwned>(
    fields: &Map<String, JsonValue>,
    name: &str,
) -> Result<Option<T>, DecodeError> {
    match fields.get(name) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(v) => T::deserialize(v)
            .map(Some)
            .map_err(|e| DecodeError::from_serde(name, &e)),
    }
}

fn required_at<T: DeserializeOwned>(
    fields: &Map<String, JsonValue>,
    name: &str,
    parent: &str,
) -> Result<T, DecodeError> {
    required(fields, name).map_err(|e| nest(e, parent))
}

fn optional_at<T: DeserializeOwned>(
    fields: &Map<String, JsonValue>,
    name: &str,
    parent: &str,
) -> Result<Option<T>, DecodeError> {
    optional(fields, name).map_err(|e| nest(e, parent))
}

fn nest(mut err: DecodeError, parent: &str) -> DecodeError {
    err.path = format!("{parent}.{}", err.path);
    err
}

/// A number that may also be spelled as a string.
struct LenientNumber(f64);

impl<'de> Deserialize<'de> for LenientNumber {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(LenientNumberVisitor)
    }
}

struct LenientNumberVisitor;

impl<'de> Visitor<'de> for LenientNumberVisitor {
    type Value = LenientNumber;

    fn expecting(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("a number or a numeric string")
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(LenientNumber(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(LenientNumber(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
        Ok(LenientNumber(v as f64))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        v.trim()
            .parse::<f64>()
            .map(LenientNumber)
            .map_err(|_| E::invalid_value(Unexpected::Str(v), &self))
    }
}
