use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::Collection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOp {
    Create,
    Update,
    Delete,
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationOp::Create => write!(f, "create"),
            MutationOp::Update => write!(f, "update"),
            MutationOp::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for MutationOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(MutationOp::Create),
            "update" => Ok(MutationOp::Update),
            "delete" => Ok(MutationOp::Delete),
            _ => Err(format!("Invalid mutation operation '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationStatus {
    Pending,
    InFlight,
    Committed,
    Failed,
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationStatus::Pending => write!(f, "pending"),
            MutationStatus::InFlight => write!(f, "in-flight"),
            MutationStatus::Committed => write!(f, "committed"),
            MutationStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for MutationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MutationStatus::Pending),
            "in-flight" => Ok(MutationStatus::InFlight),
            "committed" => Ok(MutationStatus::Committed),
            "failed" => Ok(MutationStatus::Failed),
            _ => Err(format!("Invalid mutation status '{}'", s)),
        }
    }
}

/// A locally-originated write not yet confirmed by the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
    pub mutation_id: String,
    /// Insertion order assigned by the store; 0 until enqueued.
    pub seq: i64,
    pub collection: Collection,
    pub operation: MutationOp,
    /// Entity id (possibly temporary). `None` for a create with no local id.
    pub target_id: Option<String>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub status: MutationStatus,
    pub last_error: Option<String>,
}

impl PendingMutation {
    fn new(
        collection: Collection,
        operation: MutationOp,
        target_id: Option<String>,
        payload: Value,
    ) -> Self {
        Self {
            mutation_id: Uuid::new_v4().to_string(),
            seq: 0,
            collection,
            operation,
            target_id,
            payload,
            created_at: Utc::now(),
            attempts: 0,
            status: MutationStatus::Pending,
            last_error: None,
        }
    }

    pub fn create(collection: Collection, target_id: Option<String>, payload: Value) -> Self {
        Self::new(collection, MutationOp::Create, target_id, payload)
    }

    pub fn update(collection: Collection, target_id: impl Into<String>, payload: Value) -> Self {
        Self::new(collection, MutationOp::Update, Some(target_id.into()), payload)
    }

    pub fn delete(collection: Collection, target_id: impl Into<String>) -> Self {
        Self::new(
            collection,
            MutationOp::Delete,
            Some(target_id.into()),
            Value::Null,
        )
    }

    /// Collects every temporary id referenced by string values in the payload.
    pub fn referenced_temporary_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        collect_temporary_ids(&self.payload, &mut ids);
        ids
    }
}

fn collect_temporary_ids(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if super::is_temporary_id(s) => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_temporary_ids(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_temporary_ids(v, out)),
        _ => {}
    }
}

/// Replaces every string equal to `from` with `to`. Returns true if anything changed.
pub fn rewrite_id_references(value: &mut Value, from: &str, to: &str) -> bool {
    match value {
        Value::String(s) if s == from => {
            *s = to.to_string();
            true
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |acc, v| rewrite_id_references(v, from, to) || acc),
        Value::Object(map) => map
            .values_mut()
            .fold(false, |acc, v| rewrite_id_references(v, from, to) || acc),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_from_str() {
        assert_eq!(
            MutationStatus::from_str("in-flight").unwrap(),
            MutationStatus::InFlight
        );
        assert!(MutationStatus::from_str("done").is_err());
        assert_eq!(MutationStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_op_from_str_case_insensitive() {
        assert_eq!(MutationOp::from_str("DELETE").unwrap(), MutationOp::Delete);
        assert!(MutationOp::from_str("upsert").is_err());
    }

    #[test]
    fn test_new_mutation_defaults() {
        let m = PendingMutation::update(Collection::Doctors, "srv-1", json!({"name": "A"}));
        assert_eq!(m.status, MutationStatus::Pending);
        assert_eq!(m.attempts, 0);
        assert_eq!(m.target_id.as_deref(), Some("srv-1"));
        assert!(m.last_error.is_none());
    }

    #[test]
    fn test_rewrite_id_references_nested() {
        let mut payload = json!({
            "patientId": "tmp-1",
            "lines": [{"ref": "tmp-1"}, {"ref": "tmp-2"}],
            "note": "tmp-1 is mentioned here",
        });
        assert!(rewrite_id_references(&mut payload, "tmp-1", "srv-9"));
        assert_eq!(payload["patientId"], "srv-9");
        assert_eq!(payload["lines"][0]["ref"], "srv-9");
        assert_eq!(payload["lines"][1]["ref"], "tmp-2");
        // Only exact matches are rewritten.
        assert_eq!(payload["note"], "tmp-1 is mentioned here");

        assert!(!rewrite_id_references(&mut payload, "tmp-7", "srv-1"));
    }

    #[test]
    fn test_referenced_temporary_ids() {
        let m = PendingMutation::create(
            Collection::Bills,
            Some("tmp-bill".into()),
            json!({"patientId": "tmp-1", "doctorId": "srv-3", "items": ["tmp-2"]}),
        );
        let mut ids = m.referenced_temporary_ids();
        ids.sort();
        assert_eq!(ids, vec!["tmp-1", "tmp-2"]);
    }
}
