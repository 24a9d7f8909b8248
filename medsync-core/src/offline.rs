//! Offline-aware data access.
//!
//! Reads serve the local cache immediately and refresh it from the remote
//! when online. Writes are optimistic: they land in the cache and the
//! mutation queue in one transaction and wait for the sync engine.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{Result, SyncError};
use crate::models::{new_temporary_id, CachedRecord, Collection, ListPage, ListQuery, PendingMutation};
use crate::network::NetworkMonitor;
use crate::remote::RemoteApi;
use crate::store::{EnqueueOutcome, LocalStore, RecordChange};

/// Advisory shown when no refresh was attempted.
pub const OFFLINE_ISSUE: &str = "offline";

/// Read-only view of one collection page.
#[derive(Debug, Clone, PartialEq)]
pub struct DataView<T> {
    pub data: Vec<T>,
    pub total_items: u64,
    pub loading: bool,
    pub from_cache: bool,
    /// Non-fatal problem encountered while refreshing (offline, network error, ...).
    pub issue: Option<String>,
}

/// A single entity, best available.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityView<T> {
    pub data: Option<T>,
    pub from_cache: bool,
    pub issue: Option<String>,
}

/// Live view returned by [`OfflineData::open`].
///
/// Dropping it cancels the in-flight refresh; a late response is discarded.
pub struct OfflineView<T> {
    rx: watch::Receiver<DataView<T>>,
    task: Option<JoinHandle<()>>,
}

impl<T: Clone> OfflineView<T> {
    pub fn current(&self) -> DataView<T> {
        self.rx.borrow().clone()
    }

    /// Waits for the next update. Returns false once no more updates can arrive.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Waits until loading has finished and returns the final view.
    pub async fn settled(&mut self) -> DataView<T> {
        loop {
            let view = self.rx.borrow_and_update().clone();
            if !view.loading {
                return view;
            }
            if !self.changed().await {
                return self.current();
            }
        }
    }
}

impl<T> Drop for OfflineView<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Offline-aware data hook: cache-first reads plus the optimistic write path.
#[derive(Clone)]
pub struct OfflineData {
    store: LocalStore,
    remote: Arc<dyn RemoteApi>,
    network: NetworkMonitor,
}

impl OfflineData {
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteApi>, network: NetworkMonitor) -> Self {
        Self {
            store,
            remote,
            network,
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Opens a view of `collection`. The cached page is available at once;
    /// if online, a remote refresh runs concurrently and updates the view.
    pub async fn open<T>(&self, collection: Collection, query: ListQuery) -> Result<OfflineView<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let online = self.network.current();
        let (data, total_items) = self.cached_page::<T>(collection, &query).await?;

        let initial = DataView {
            data,
            total_items,
            loading: online,
            from_cache: true,
            issue: (!online).then(|| OFFLINE_ISSUE.to_string()),
        };
        let (tx, rx) = watch::channel(initial);

        let task = online.then(|| {
            let store = self.store.clone();
            let remote = self.remote.clone();
            tokio::spawn(async move {
                refresh(store, remote, collection, query, tx).await;
            })
        });

        Ok(OfflineView { rx, task })
    }

    /// Opens a view and waits for it to settle.
    pub async fn fetch<T>(&self, collection: Collection, query: ListQuery) -> Result<DataView<T>>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let mut view = self.open(collection, query).await?;
        Ok(view.settled().await)
    }

    /// Reads one entity, refreshing it from the remote when online.
    pub async fn get<T>(&self, collection: Collection, id: &str) -> Result<EntityView<T>>
    where
        T: DeserializeOwned,
    {
        let cached = self.store.get(collection, id).await?;

        if !self.network.current() {
            return Ok(EntityView {
                data: cached.and_then(|r| decode(&r.payload)),
                from_cache: true,
                issue: Some(OFFLINE_ISSUE.to_string()),
            });
        }

        match self.remote.get(collection, id).await {
            Ok(doc) => {
                // Local optimistic state wins until it is replayed.
                let merged = self
                    .store
                    .merge_remote(vec![CachedRecord::new(collection, id, doc)])
                    .await?
                    .pop();
                Ok(EntityView {
                    from_cache: merged.as_ref().map_or(true, |m| m.kept_local),
                    data: merged.and_then(|m| decode(&m.record.payload)),
                    issue: None,
                })
            }
            Err(e) => {
                tracing::warn!("Serving {}/{} from cache: {}", collection, id, e);
                Ok(EntityView {
                    data: cached.and_then(|r| decode(&r.payload)),
                    from_cache: true,
                    issue: Some(e.to_string()),
                })
            }
        }
    }

    /// Optimistically creates an entity under a temporary id.
    pub async fn create(&self, collection: Collection, payload: Value) -> Result<CachedRecord> {
        let fields = expect_object(payload)?;
        let temp_id = new_temporary_id();

        let mut doc = fields.clone();
        doc.insert("id".to_string(), Value::String(temp_id.clone()));
        let record = CachedRecord::new(collection, temp_id.clone(), Value::Object(doc));

        let mut body = fields;
        body.remove("id");
        body.remove("_id");
        let mutation = PendingMutation::create(collection, Some(temp_id), Value::Object(body));

        self.store
            .stage_write(mutation, RecordChange::Upsert(record.clone()))
            .await?;
        tracing::debug!("Queued create {}/{}", collection, record.id);
        Ok(record)
    }

    /// Optimistically applies a partial update.
    pub async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<CachedRecord> {
        let mut patch = expect_object(patch)?;
        patch.remove("id");
        patch.remove("_id");

        let record = self.store.stage_update(collection, id, patch).await?;
        tracing::debug!("Queued update {}/{}", collection, id);
        Ok(record)
    }

    /// Optimistically deletes an entity, superseding its queued writes.
    pub async fn delete(&self, collection: Collection, id: &str) -> Result<EnqueueOutcome> {
        let outcome = self
            .store
            .stage_write(
                PendingMutation::delete(collection, id),
                RecordChange::Remove {
                    collection,
                    id: id.to_string(),
                },
            )
            .await?;
        tracing::debug!("Queued delete {}/{}", collection, id);
        Ok(outcome)
    }

    async fn cached_page<T>(&self, collection: Collection, query: &ListQuery) -> Result<(Vec<T>, u64)>
    where
        T: DeserializeOwned,
    {
        let records = self
            .store
            .query(collection, |r| matches_query(&r.payload, query))
            .await?;
        let total = records.len() as u64;

        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let skip = query
            .page
            .map(|p| (p.max(1) as usize - 1).saturating_mul(limit))
            .unwrap_or(0);

        let data = records
            .iter()
            .skip(skip)
            .take(limit)
            .filter_map(|r| decode(&r.payload))
            .collect();
        Ok((data, total))
    }
}

async fn refresh<T>(
    store: LocalStore,
    remote: Arc<dyn RemoteApi>,
    collection: Collection,
    query: ListQuery,
    tx: watch::Sender<DataView<T>>,
) where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let result = remote.list(collection, &query).await;

    if tx.is_closed() {
        tracing::debug!("View for {} closed, discarding response", collection);
        return;
    }

    match result {
        Ok(page) => match apply_page::<T>(&store, collection, page).await {
            Ok(view) => {
                let _ = tx.send(view);
            }
            Err(e) => {
                tracing::warn!("Failed to cache {} page: {}", collection, e);
                tx.send_modify(|view| {
                    view.loading = false;
                    view.issue = Some(e.to_string());
                });
            }
        },
        Err(e) => {
            tracing::warn!("Serving {} from cache: {}", collection, e);
            tx.send_modify(|view| {
                view.loading = false;
                view.issue = Some(e.to_string());
            });
        }
    }
}

/// Writes a remote page into the cache and builds the fresh view.
///
/// Entries missing from the page are left alone (absence is not deletion).
/// Entities with a queued local mutation keep their optimistic version.
async fn apply_page<T>(store: &LocalStore, collection: Collection, page: ListPage) -> Result<DataView<T>>
where
    T: DeserializeOwned,
{
    let total_items = page.total_items();
    let mut fresh = Vec::with_capacity(page.items.len());

    for doc in page.items {
        match CachedRecord::from_remote(collection, doc) {
            Some(record) => fresh.push(record),
            None => tracing::warn!("Skipping {} document without id", collection),
        }
    }

    let merged = store.merge_remote(fresh).await?;

    Ok(DataView {
        data: merged.iter().filter_map(|m| decode(&m.record.payload)).collect(),
        total_items,
        loading: false,
        from_cache: false,
        issue: None,
    })
}

fn decode<T: DeserializeOwned>(payload: &Value) -> Option<T> {
    match serde_json::from_value(payload.clone()) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Skipping undecodable document: {}", e);
            None
        }
    }
}

fn expect_object(payload: Value) -> Result<Map<String, Value>> {
    match payload {
        Value::Object(map) => Ok(map),
        other => Err(SyncError::Validation(format!(
            "Payload must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Best-effort local evaluation of a remote query: `search` is a
/// case-insensitive substring over top-level string fields, filters are
/// equality on top-level fields. Sort is ignored.
fn matches_query(payload: &Value, query: &ListQuery) -> bool {
    if let Some(term) = query.search.as_deref().filter(|t| !t.is_empty()) {
        let term = term.to_lowercase();
        let hit = payload
            .as_object()
            .map(|map| {
                map.values().any(|v| match v {
                    Value::String(s) => s.to_lowercase().contains(&term),
                    _ => false,
                })
            })
            .unwrap_or(false);
        if !hit {
            return false;
        }
    }

    query.filters.iter().all(|(key, expected)| match payload.get(key) {
        Some(Value::String(s)) => s == expected,
        Some(Value::Null) | None => false,
        Some(other) => other.to_string() == *expected,
    })
}
