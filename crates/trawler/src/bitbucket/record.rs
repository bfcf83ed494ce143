//! Envelope wrapping each harvested item for downstream indexing.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::item::Item;
use super::types::Category;

/// Name reported in every record.
pub const BACKEND_NAME: &str = "Bitbucket";

/// Version reported in every record.
pub const BACKEND_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFields {
    pub item_id: String,
    pub owner: String,
    pub repo: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub backend_name: String,
    pub backend_version: String,
    pub origin: String,
    pub tag: String,
    /// Stable across runs for the same origin and item identifier.
    pub uuid: Uuid,
    /// Item update time, UNIX seconds.
    pub updated_on: f64,
    /// Fetch time, UNIX seconds.
    pub timestamp: f64,
    pub category: Category,
    pub search_fields: SearchFields,
    pub data: Value,
}

impl Record {
    pub fn new(item: Item, origin: &str, tag: &str, search_fields: SearchFields) -> Self {
        let now = Utc::now();
        Self {
            backend_name: BACKEND_NAME.to_string(),
            backend_version: BACKEND_VERSION.to_string(),
            origin: origin.to_string(),
            tag: tag.to_string(),
            uuid: record_uuid(origin, &search_fields.item_id),
            updated_on: item.metadata_updated_on(),
            timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
            category: item.metadata_category(),
            search_fields,
            data: item.into_value(),
        }
    }
}

/// UUIDv5 over `"{origin}:{item_id}"`.
pub fn record_uuid(origin: &str, item_id: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("{}:{}", origin, item_id).as_bytes())
}
