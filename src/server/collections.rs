use medsync_core::{record_id, Collection, Pagination};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;

/// Parsed list parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub search: Option<String>,
    /// Field name, `-` prefix for descending.
    pub sort: Option<String>,
    pub filters: Vec<(String, String)>,
}

/// In-memory documents for every collection, in insertion order.
#[derive(Debug)]
pub struct CollectionStore {
    docs: RwLock<HashMap<Collection, Vec<Value>>>,
    next_id: AtomicU64,
}

impl Default for CollectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn list(&self, collection: Collection, params: &ListParams) -> (Vec<Value>, Pagination) {
        let docs = self.docs.read().await;
        let mut matching: Vec<&Value> = docs
            .get(&collection)
            .map(|all| all.iter().filter(|doc| matches(doc, params)).collect())
            .unwrap_or_default();

        if let Some(sort) = params.sort.as_deref().filter(|s| !s.is_empty()) {
            let (field, descending) = match sort.strip_prefix('-') {
                Some(field) => (field, true),
                None => (sort, false),
            };
            matching.sort_by(|a, b| {
                let ordering = sort_key(a, field).cmp(&sort_key(b, field));
                if descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let page = params.page.unwrap_or(DEFAULT_PAGE).max(1);
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).max(1);
        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(((page - 1) as usize).saturating_mul(limit as usize))
            .take(limit as usize)
            .cloned()
            .collect();

        (items, Pagination::new(page, limit, total))
    }

    pub async fn get(&self, collection: Collection, id: &str) -> Option<Value> {
        let docs = self.docs.read().await;
        docs.get(&collection)?
            .iter()
            .find(|doc| record_id(doc).as_deref() == Some(id))
            .cloned()
    }

    /// Stores a new document under a server-assigned `srv-<n>` id.
    pub async fn create(&self, collection: Collection, mut fields: Map<String, Value>) -> Value {
        let id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        fields.remove("_id");
        fields.insert("id".to_string(), Value::String(id));
        let doc = Value::Object(fields);

        let mut docs = self.docs.write().await;
        docs.entry(collection).or_default().push(doc.clone());
        doc
    }

    /// Shallow-merges `fields` into an existing document.
    pub async fn update(
        &self,
        collection: Collection,
        id: &str,
        fields: Map<String, Value>,
    ) -> Option<Value> {
        let mut docs = self.docs.write().await;
        let doc = docs
            .get_mut(&collection)?
            .iter_mut()
            .find(|doc| record_id(doc).as_deref() == Some(id))?;

        if let Value::Object(target) = doc {
            for (key, value) in fields {
                if key != "id" && key != "_id" {
                    target.insert(key, value);
                }
            }
        }
        Some(doc.clone())
    }

    pub async fn delete(&self, collection: Collection, id: &str) -> bool {
        let mut docs = self.docs.write().await;
        let Some(all) = docs.get_mut(&collection) else {
            return false;
        };
        let before = all.len();
        all.retain(|doc| record_id(doc).as_deref() != Some(id));
        all.len() != before
    }

    pub async fn count(&self, collection: Collection) -> usize {
        self.docs
            .read()
            .await
            .get(&collection)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

fn matches(doc: &Value, params: &ListParams) -> bool {
    if let Some(term) = params.search.as_deref().filter(|t| !t.is_empty()) {
        let term = term.to_lowercase();
        let found = doc
            .as_object()
            .map(|map| {
                map.values()
                    .filter_map(Value::as_str)
                    .any(|s| s.to_lowercase().contains(&term))
            })
            .unwrap_or(false);
        if !found {
            return false;
        }
    }

    params
        .filters
        .iter()
        .all(|(key, expected)| field_text(doc, key).as_deref() == Some(expected.as_str()))
}

fn field_text(doc: &Value, key: &str) -> Option<String> {
    match doc.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn sort_key(doc: &Value, field: &str) -> String {
    field_text(doc, field).unwrap_or_default().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let store = CollectionStore::new();
        let a = store
            .create(Collection::Patients, fields(json!({"name": "Ada", "id": "tmp-1"})))
            .await;
        let b = store
            .create(Collection::Doctors, fields(json!({"name": "Grey"})))
            .await;

        assert_eq!(a["id"], "srv-1");
        assert_eq!(a["name"], "Ada");
        assert_eq!(b["id"], "srv-2");
        assert_eq!(store.count(Collection::Patients).await, 1);
    }

    #[tokio::test]
    async fn test_list_paginates_in_insertion_order() {
        let store = CollectionStore::new();
        for n in 0..12 {
            store
                .create(Collection::Bills, fields(json!({"amount": n})))
                .await;
        }

        let (first, pagination) = store.list(Collection::Bills, &ListParams::default()).await;
        assert_eq!(first.len(), 10);
        assert_eq!(pagination, Pagination::new(1, 10, 12));
        assert_eq!(pagination.pages, 2);

        let params = ListParams {
            page: Some(2),
            ..ListParams::default()
        };
        let (second, _) = store.list(Collection::Bills, &params).await;
        assert_eq!(second.len(), 2);
        assert_eq!(second[0]["id"], "srv-11");
    }

    #[tokio::test]
    async fn test_search_filter_and_sort() {
        let store = CollectionStore::new();
        store
            .create(Collection::Hospitals, fields(json!({"name": "St. Mary", "city": "Leeds"})))
            .await;
        store
            .create(Collection::Hospitals, fields(json!({"name": "General", "city": "York"})))
            .await;
        store
            .create(Collection::Hospitals, fields(json!({"name": "Mary Seacole", "city": "York"})))
            .await;

        let search = ListParams {
            search: Some("MARY".into()),
            ..ListParams::default()
        };
        let (found, pagination) = store.list(Collection::Hospitals, &search).await;
        assert_eq!(found.len(), 2);
        assert_eq!(pagination.total, 2);

        let filtered = ListParams {
            filters: vec![("city".into(), "York".into())],
            sort: Some("-name".into()),
            ..ListParams::default()
        };
        let (york, _) = store.list(Collection::Hospitals, &filtered).await;
        let names: Vec<&str> = york.iter().map(|d| d["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["Mary Seacole", "General"]);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing() {
        let store = CollectionStore::new();
        assert!(store
            .update(Collection::Workers, "srv-1", fields(json!({"name": "x"})))
            .await
            .is_none());
        assert!(!store.delete(Collection::Workers, "srv-1").await);

        let doc = store
            .create(Collection::Workers, fields(json!({"name": "Sam", "role": "porter"})))
            .await;
        let id = doc["id"].as_str().unwrap().to_string();
        let updated = store
            .update(Collection::Workers, &id, fields(json!({"role": "nurse", "id": "hijack"})))
            .await
            .unwrap();
        assert_eq!(updated, json!({"id": id, "name": "Sam", "role": "nurse"}));

        assert!(store.delete(Collection::Workers, &id).await);
        assert!(store.get(Collection::Workers, &id).await.is_none());
    }
}
