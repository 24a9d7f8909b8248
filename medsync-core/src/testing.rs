//! In-memory [`RemoteApi`] used by the unit tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{Result, SyncError};
use crate::models::{Collection, ListPage, ListQuery, Pagination};
use crate::remote::RemoteApi;

#[derive(Default)]
pub struct FakeRemote {
    docs: Mutex<BTreeMap<(Collection, String), Value>>,
    next_id: AtomicU64,
    calls: Mutex<Vec<String>>,
    failures: Mutex<VecDeque<SyncError>>,
    always_fail: Mutex<Option<SyncError>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Default::default()
        }
    }

    pub fn seed(&self, collection: Collection, id: &str, mut doc: Value) {
        doc["id"] = json!(id);
        self.docs
            .lock()
            .unwrap()
            .insert((collection, id.to_string()), doc);
    }

    pub fn set_next_id(&self, n: u64) {
        self.next_id.store(n, Ordering::SeqCst);
    }

    /// Queues an error returned by the next call.
    pub fn fail_next(&self, err: SyncError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn fail_always(&self, err: Option<SyncError>) {
        *self.always_fail.lock().unwrap() = err;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn doc(&self, collection: Collection, id: &str) -> Option<Value> {
        self.docs
            .lock()
            .unwrap()
            .get(&(collection, id.to_string()))
            .cloned()
    }

    pub fn docs(&self, collection: Collection) -> Vec<Value> {
        self.docs
            .lock()
            .unwrap()
            .iter()
            .filter(|((c, _), _)| *c == collection)
            .map(|(_, v)| v.clone())
            .collect()
    }

    async fn enter(&self, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.always_fail.lock().unwrap().clone() {
            return Err(err);
        }
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteApi for FakeRemote {
    async fn list(&self, collection: Collection, query: &ListQuery) -> Result<ListPage> {
        self.enter(format!("list {}", collection)).await?;
        let all = self.docs(collection);
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(10);
        let items = all
            .iter()
            .skip(((page - 1) * limit) as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(ListPage {
            items,
            pagination: Some(Pagination::new(page, limit, all.len() as u64)),
        })
    }

    async fn get(&self, collection: Collection, id: &str) -> Result<Value> {
        self.enter(format!("get {} {}", collection, id)).await?;
        self.doc(collection, id)
            .ok_or_else(|| SyncError::Conflict(format!("{} {} not found", collection, id)))
    }

    async fn create(&self, collection: Collection, payload: &Value) -> Result<Value> {
        self.enter(format!("create {}", collection)).await?;
        let id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.seed(collection, &id, payload.clone());
        Ok(self.doc(collection, &id).unwrap_or_default())
    }

    async fn update(&self, collection: Collection, id: &str, payload: &Value) -> Result<Value> {
        self.enter(format!("update {} {}", collection, id)).await?;
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(&(collection, id.to_string()))
            .ok_or_else(|| SyncError::Conflict(format!("{} {} not found", collection, id)))?;
        if let (Some(target), Some(patch)) = (doc.as_object_mut(), payload.as_object()) {
            for (k, v) in patch {
                target.insert(k.clone(), v.clone());
            }
        }
        Ok(doc.clone())
    }

    async fn delete(&self, collection: Collection, id: &str) -> Result<()> {
        self.enter(format!("delete {} {}", collection, id)).await?;
        self.docs
            .lock()
            .unwrap()
            .remove(&(collection, id.to_string()))
            .map(|_| ())
            .ok_or_else(|| SyncError::Conflict(format!("{} {} not found", collection, id)))
    }
}
