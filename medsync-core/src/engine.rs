//! Sync engine: replays the pending mutation queue against the remote API.
//!
//! A drain walks the queue in insertion order with a `seq` cursor, so
//! mutations enqueued while the drain runs are picked up in the same run.
//! Only one drain runs at a time; concurrent triggers are coalesced. The
//! same holds across processes sharing a database, through a drain lease
//! kept in the store.

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::models::{
    is_temporary_id, record_id, CachedRecord, Collection, MutationOp, MutationStatus,
    PendingMutation, SyncRun,
};
use crate::network::NetworkMonitor;
use crate::remote::RemoteApi;
use crate::store::LocalStore;

/// Attempts before a transient failure becomes permanent.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Lifetime of the drain lease, renewed before every replayed mutation.
/// Must exceed the remote request timeout.
pub const DRAIN_LEASE_TTL: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

/// Observable engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Draining,
    /// The last drain left mutations uncommitted.
    PartiallyFailed,
}

impl EngineState {
    pub fn is_draining(&self) -> bool {
        matches!(self, EngineState::Draining)
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    store: LocalStore,
    remote: Arc<dyn RemoteApi>,
    policy: RetryPolicy,
    /// Identifies this engine in the store's drain lease.
    owner: String,
    drain_lock: Mutex<()>,
    state: watch::Sender<EngineState>,
}

/// Entities whose earlier mutation did not commit, either during the
/// current run or in a run that left it failed.
#[derive(Default)]
struct Blocked {
    targets: HashSet<(Collection, String)>,
}

impl Blocked {
    fn block(&mut self, mutation: &PendingMutation) {
        if let Some(target) = &mutation.target_id {
            self.targets.insert((mutation.collection, target.clone()));
        }
    }

    /// Returns the reason a mutation cannot be replayed yet, if any.
    fn reason(&self, mutation: &PendingMutation) -> Option<String> {
        if let Some(target) = &mutation.target_id {
            if self
                .targets
                .contains(&(mutation.collection, target.clone()))
            {
                return Some(format!("earlier write to {} did not commit", target));
            }
            // Rewritten as soon as its create commits, so a leftover
            // temporary target means the create is still outstanding.
            if mutation.operation != MutationOp::Create && is_temporary_id(target) {
                return Some(format!("{} has not been created yet", target));
            }
        }
        mutation
            .referenced_temporary_ids()
            .into_iter()
            .find(|id| Some(id) != mutation.target_id.as_ref())
            .map(|id| format!("references {} which has not been created yet", id))
    }
}

impl SyncEngine {
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteApi>) -> Self {
        Self::with_policy(store, remote, RetryPolicy::default())
    }

    pub fn with_policy(store: LocalStore, remote: Arc<dyn RemoteApi>, policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(EngineState::Idle);
        Self {
            inner: Arc::new(EngineInner {
                store,
                remote,
                policy,
                owner: Uuid::new_v4().to_string(),
                drain_lock: Mutex::new(()),
                state,
            }),
        }
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.inner.state.subscribe()
    }

    /// Waits until no drain is running.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.state.subscribe();
        let _ = rx.wait_for(|state| !state.is_draining()).await;
    }

    /// Runs one drain cycle.
    ///
    /// Returns `None` if a drain is already running, here or in another
    /// process; that drain will pick up anything queued before its cursor
    /// passes it.
    pub async fn trigger(&self) -> Result<Option<SyncRun>> {
        let Ok(_guard) = self.inner.drain_lock.try_lock() else {
            tracing::debug!("Drain already running, trigger coalesced");
            return Ok(None);
        };

        let store = &self.inner.store;
        let owner = &self.inner.owner;
        if !store.acquire_drain_lease(owner, DRAIN_LEASE_TTL).await? {
            tracing::debug!("Another process is draining, trigger coalesced");
            return Ok(None);
        }

        self.inner.state.send_replace(EngineState::Draining);
        let result = self.drain().await;
        if let Err(e) = store.release_drain_lease(owner).await {
            tracing::warn!("Failed to release drain lease: {}", e);
        }

        let next = match &result {
            Ok(run) if run.is_clean() && run.skipped == 0 => EngineState::Idle,
            _ => EngineState::PartiallyFailed,
        };
        self.inner.state.send_replace(next);

        result.map(Some)
    }

    /// Drains the queue on every offline to online transition.
    pub fn spawn_on_reconnect(&self, monitor: &NetworkMonitor) -> JoinHandle<()> {
        let engine = self.clone();
        let mut rx = monitor.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                if !online {
                    continue;
                }
                tracing::info!("Back online, draining pending mutations");
                match engine.trigger().await {
                    Ok(Some(run)) if !run.is_clean() => {
                        tracing::warn!("{} mutation(s) did not sync", run.failed)
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!("Sync aborted: {}", e),
                }
            }
        })
    }

    /// Must be called with the drain lease held.
    async fn drain(&self) -> Result<SyncRun> {
        let store = &self.inner.store;
        let owner = &self.inner.owner;

        // With the lease held, in-flight rows can only come from a drain
        // that died.
        let recovered = store.recover_in_flight().await?;
        if recovered > 0 {
            tracing::info!("Recovered {} interrupted mutation(s)", recovered);
        }

        let mut run = SyncRun::start();
        let mut blocked = Blocked::default();
        // Later writes to an entity wait for its failed one to be reset or
        // dismissed.
        for failed in store.list_failed_mutations().await? {
            blocked.block(&failed);
        }
        let mut cursor = 0;

        while let Some(mutation) = store.next_pending_after(cursor).await? {
            cursor = mutation.seq;

            if let Some(reason) = blocked.reason(&mutation) {
                tracing::debug!("Skipping mutation {}: {}", mutation.mutation_id, reason);
                blocked.block(&mutation);
                run.skipped += 1;
                continue;
            }

            if !store.renew_drain_lease(owner, DRAIN_LEASE_TTL).await? {
                tracing::warn!("Drain lease lost, stopping this run");
                break;
            }
            if !store.claim_mutation(&mutation.mutation_id).await? {
                tracing::debug!("Mutation {} no longer pending, skipping", mutation.mutation_id);
                continue;
            }
            tracing::debug!(
                "Replaying {} {}/{}",
                mutation.operation,
                mutation.collection,
                mutation.target_id.as_deref().unwrap_or("-")
            );

            match self.send(&mutation).await {
                Ok(response) => {
                    self.commit(&mutation, response).await?;
                    run.succeeded += 1;
                }
                Err(e @ SyncError::Storage(_)) => return Err(e),
                Err(e) => {
                    let status = self.status_after_failure(&mutation, &e);
                    let reason = e.to_string();
                    store
                        .record_failure(&mutation.mutation_id, status, &reason)
                        .await?;
                    tracing::warn!(
                        "Mutation {} failed ({}), now {}: {}",
                        mutation.mutation_id,
                        e.kind(),
                        status,
                        reason
                    );
                    blocked.block(&mutation);
                    run.record_failure(&mutation.mutation_id, reason);
                }
            }
        }

        run.finish();
        tracing::info!(
            "Sync finished: {} succeeded, {} failed, {} skipped",
            run.succeeded,
            run.failed,
            run.skipped
        );
        Ok(run)
    }

    fn status_after_failure(&self, mutation: &PendingMutation, err: &SyncError) -> MutationStatus {
        let attempts = mutation.attempts + 1;
        if err.is_retryable() && attempts < self.inner.policy.max_attempts {
            MutationStatus::Pending
        } else {
            MutationStatus::Failed
        }
    }

    /// Sends one mutation. Returns the server document for creates and updates.
    async fn send(&self, mutation: &PendingMutation) -> Result<Option<Value>> {
        let remote = &self.inner.remote;
        let collection = mutation.collection;

        match mutation.operation {
            MutationOp::Create => {
                let doc = remote.create(collection, &mutation.payload).await?;
                if record_id(&doc).is_none() {
                    return Err(SyncError::Validation(format!(
                        "Server returned a {} document without an id",
                        collection
                    )));
                }
                Ok(Some(doc))
            }
            MutationOp::Update => {
                let id = require_target(mutation)?;
                Ok(Some(remote.update(collection, id, &mutation.payload).await?))
            }
            MutationOp::Delete => {
                let id = require_target(mutation)?;
                remote.delete(collection, id).await?;
                Ok(None)
            }
        }
    }

    /// Applies the local side of a replayed mutation and retires it.
    async fn commit(&self, mutation: &PendingMutation, response: Option<Value>) -> Result<()> {
        let store = &self.inner.store;
        let collection = mutation.collection;

        match (mutation.operation, response) {
            (MutationOp::Create, Some(doc)) => {
                let server_id = record_id(&doc).unwrap_or_default();
                match mutation.target_id.as_deref() {
                    Some(local_id) if local_id != server_id => {
                        match store.get(collection, local_id).await? {
                            Some(local) => {
                                let payload = overlay_local(doc, local.payload, &server_id);
                                let record = CachedRecord::new(collection, server_id.clone(), payload);
                                store.replace_record(collection, local_id, &record).await?;
                            }
                            None if store.has_queued_delete(collection, local_id).await? => {
                                tracing::debug!(
                                    "{} was deleted while its create was in flight",
                                    local_id
                                );
                            }
                            None => {
                                let record = CachedRecord::new(collection, server_id.clone(), doc);
                                store.put(&record).await?;
                            }
                        }
                        let touched = store.rewrite_temporary_id(local_id, &server_id).await?;
                        tracing::debug!(
                            "Rewrote {} to {} ({} reference(s))",
                            local_id,
                            server_id,
                            touched
                        );
                    }
                    _ => store.put(&CachedRecord::new(collection, server_id, doc)).await?,
                }
                store.remove_mutation(&mutation.mutation_id).await?;
            }
            (MutationOp::Update, Some(doc)) => {
                store.remove_mutation(&mutation.mutation_id).await?;
                let id = record_id(&doc).or_else(|| mutation.target_id.clone());
                if let Some(id) = id {
                    // A later queued write keeps its optimistic cache entry.
                    store
                        .merge_remote(vec![CachedRecord::new(collection, id, doc)])
                        .await?;
                }
            }
            _ => {
                store.remove_mutation(&mutation.mutation_id).await?;
                if let Some(id) = &mutation.target_id {
                    store.remove(collection, id).await?;
                }
            }
        }
        Ok(())
    }
}

fn require_target(mutation: &PendingMutation) -> Result<&str> {
    mutation.target_id.as_deref().ok_or_else(|| {
        SyncError::Validation(format!(
            "{} mutation {} has no target id",
            mutation.operation, mutation.mutation_id
        ))
    })
}

/// Server document with the local optimistic fields laid over it.
fn overlay_local(server: Value, local: Value, server_id: &str) -> Value {
    let mut merged = match server {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Value::Object(local) = local {
        for (key, value) in local {
            if key != "id" && key != "_id" {
                merged.insert(key, value);
            }
        }
    }
    merged.insert("id".to_string(), Value::String(server_id.to_string()));
    Value::Object(merged)
}
