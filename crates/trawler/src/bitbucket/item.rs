//! Issues and pull requests as returned by the listing endpoints.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use super::error::{BitbucketError, Result};
use super::types::{Category, parse_datetime};

/// A raw listing entry plus the enrichment fields added to it.
///
/// Construction checks that the entry has an `id` and a parseable
/// `updated_on`, which together identify it.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    data: Map<String, Value>,
    updated_on: DateTime<Utc>,
}

impl Item {
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(data) = value else {
            return Err(BitbucketError::InvalidItem(
                "listing entry is not a JSON object".to_string(),
            ));
        };

        match data.get("id") {
            Some(Value::Number(_)) | Some(Value::String(_)) => {}
            _ => {
                return Err(BitbucketError::InvalidItem(
                    "listing entry has no id".to_string(),
                ));
            }
        }

        let raw = data
            .get("updated_on")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BitbucketError::InvalidItem("listing entry has no updated_on".to_string())
            })?;
        let updated_on = parse_datetime(raw).ok_or_else(|| {
            BitbucketError::InvalidItem(format!("unparseable updated_on '{}'", raw))
        })?;

        Ok(Self { data, updated_on })
    }

    /// The `id` field rendered as text, as used in sub-resource paths.
    pub fn id(&self) -> String {
        match self.data.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    pub fn updated_on(&self) -> DateTime<Utc> {
        self.updated_on
    }

    /// `updated_on` exactly as the server sent it.
    pub fn raw_updated_on(&self) -> &str {
        self.data
            .get("updated_on")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Unique identifier: raw `updated_on` followed by `id`.
    pub fn metadata_id(&self) -> String {
        format!("{}{}", self.raw_updated_on(), self.id())
    }

    /// `updated_on` as UNIX seconds.
    pub fn metadata_updated_on(&self) -> f64 {
        self.updated_on.timestamp_micros() as f64 / 1_000_000.0
    }

    pub fn metadata_category(&self) -> Category {
        Category::from_type_field(self.data.get("type").and_then(Value::as_str))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    /// Field value if it is present and not empty.
    pub fn present(&self, field: &str) -> Option<&Value> {
        self.data.get(field).filter(|v| is_present(v))
    }

    pub fn insert(&mut self, field: &str, value: Value) {
        self.data.insert(field.to_string(), value);
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.data)
    }
}

impl Serialize for Item {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.data.serialize(serializer)
    }
}

/// Null, `false`, and empty strings, arrays and objects count as absent.
pub(crate) fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}
