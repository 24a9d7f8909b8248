use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Collection;

/// Prefix of client-generated ids for entities the server has not seen yet.
pub const TEMP_ID_PREFIX: &str = "tmp-";

/// A domain entity as last known locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRecord {
    pub id: String,
    pub collection: Collection,
    pub payload: Value,
    /// Time of the last successful remote read (or the local write, for optimistic records).
    pub fetched_at: DateTime<Utc>,
}

impl CachedRecord {
    pub fn new(collection: Collection, id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            collection,
            payload,
            fetched_at: Utc::now(),
        }
    }

    /// Builds a record from a remote document, reading its id from `id` or `_id`.
    pub fn from_remote(collection: Collection, payload: Value) -> Option<Self> {
        let id = record_id(&payload)?;
        Some(Self::new(collection, id, payload))
    }

    pub fn is_temporary(&self) -> bool {
        is_temporary_id(&self.id)
    }
}

/// Extracts the entity id from a JSON document.
pub fn record_id(payload: &Value) -> Option<String> {
    ["id", "_id"].iter().find_map(|key| match payload.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Generates a fresh temporary id.
pub fn new_temporary_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, uuid::Uuid::new_v4())
}
