use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::init_store;
use crate::error::{Result, SyncError};
use crate::models::{
    rewrite_id_references, CachedRecord, Collection, MutationOp, MutationStatus, PendingMutation,
};

const QUEUED: &str = "('pending', 'in-flight')";

/// Result of enqueueing a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// The mutation was stored with its assigned `seq`.
    Queued(PendingMutation),
    /// A delete cancelled a create that never reached the server, so nothing
    /// is left to replay. `superseded` counts the removed mutations.
    Cancelled { superseded: u64 },
}

/// Cache side of an optimistic write.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordChange {
    Upsert(CachedRecord),
    Remove { collection: Collection, id: String },
}

/// Cache contents for one remote document after [`LocalStore::merge_remote`].
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRecord {
    pub record: CachedRecord,
    /// The local optimistic version was kept over the remote one.
    pub kept_local: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationCounts {
    pub pending: u64,
    pub in_flight: u64,
    pub failed: u64,
}

/// Embedded document store holding cached records and the mutation queue.
///
/// Reads go straight to the pool. Writes are serialized through a single
/// lock so concurrent callers never interleave partial writes.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    collection: String,
    id: String,
    payload: String,
    fetched_at: String,
}

#[derive(sqlx::FromRow)]
struct MutationRow {
    seq: i64,
    mutation_id: String,
    collection: String,
    operation: String,
    target_id: Option<String>,
    payload: String,
    created_at: String,
    attempts: i64,
    status: String,
    last_error: Option<String>,
}

impl LocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Opens (or creates) the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let pool = init_store(path.as_ref()).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Cached records
    // ------------------------------------------------------------------

    pub async fn get(&self, collection: Collection, id: &str) -> Result<Option<CachedRecord>> {
        let row: Option<RecordRow> =
            sqlx::query_as("SELECT * FROM cached_records WHERE collection = ? AND id = ?")
                .bind(collection.as_str())
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(hydrate_record).transpose()
    }

    pub async fn list(&self, collection: Collection) -> Result<Vec<CachedRecord>> {
        let rows: Vec<RecordRow> =
            sqlx::query_as("SELECT * FROM cached_records WHERE collection = ? ORDER BY id")
                .bind(collection.as_str())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(hydrate_record).collect()
    }

    pub async fn query<F>(&self, collection: Collection, predicate: F) -> Result<Vec<CachedRecord>>
    where
        F: Fn(&CachedRecord) -> bool,
    {
        let records = self.list(collection).await?;
        Ok(records.into_iter().filter(|r| predicate(r)).collect())
    }

    pub async fn count(&self, collection: Collection) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cached_records WHERE collection = ?")
            .bind(collection.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Upserts a record.
    pub async fn put(&self, record: &CachedRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        upsert_record(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Upserts several records in one transaction.
    pub async fn put_many(&self, records: &[CachedRecord]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        for record in records {
            upsert_record(&mut tx, record).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Removes a record. Returns true if it existed.
    pub async fn remove(&self, collection: Collection, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM cached_records WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically replaces the record stored under `old_id` with `record`.
    pub async fn replace_record(
        &self,
        collection: Collection,
        old_id: &str,
        record: &CachedRecord,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM cached_records WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(old_id)
            .execute(&mut *tx)
            .await?;
        upsert_record(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mutation queue
    // ------------------------------------------------------------------

    /// Stores a mutation at the end of the queue.
    ///
    /// A delete cancels every earlier un-committed (pending or failed)
    /// mutation for the same target. If one of those was a create, the
    /// entity never reached the server and the delete is dropped as well.
    pub async fn enqueue_mutation(&self, mutation: PendingMutation) -> Result<EnqueueOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let outcome = enqueue_in_tx(&mut tx, mutation).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Applies an optimistic cache change and enqueues its mutation atomically.
    pub async fn stage_write(
        &self,
        mutation: PendingMutation,
        change: RecordChange,
    ) -> Result<EnqueueOutcome> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        match &change {
            RecordChange::Upsert(record) => upsert_record(&mut tx, record).await?,
            RecordChange::Remove { collection, id } => {
                sqlx::query("DELETE FROM cached_records WHERE collection = ? AND id = ?")
                    .bind(collection.as_str())
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        let outcome = enqueue_in_tx(&mut tx, mutation).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    /// Shallow-merges `patch` into the cached document and enqueues an
    /// update carrying the patch, in one transaction.
    pub async fn stage_update(
        &self,
        collection: Collection,
        id: &str,
        patch: Map<String, Value>,
    ) -> Result<CachedRecord> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let mut doc = match get_in_tx(&mut tx, collection, id).await? {
            Some(CachedRecord {
                payload: Value::Object(map),
                ..
            }) => map,
            _ => Map::new(),
        };
        for (key, value) in &patch {
            doc.insert(key.clone(), value.clone());
        }
        doc.insert("id".to_string(), Value::String(id.to_string()));

        let record = CachedRecord::new(collection, id, Value::Object(doc));
        upsert_record(&mut tx, &record).await?;
        enqueue_in_tx(
            &mut tx,
            PendingMutation::update(collection, id, Value::Object(patch)),
        )
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    /// Stores documents fetched from the remote, except where a queued
    /// local mutation exists for the same entity. Returns what the cache
    /// holds afterwards for each input still cached, in input order.
    pub async fn merge_remote(&self, records: Vec<CachedRecord>) -> Result<Vec<MergedRecord>> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut merged = Vec::with_capacity(records.len());

        for record in records {
            if queued_in_tx(&mut tx, record.collection, &record.id).await? {
                // Locally deleted entities stay hidden.
                if let Some(local) = get_in_tx(&mut tx, record.collection, &record.id).await? {
                    merged.push(MergedRecord {
                        record: local,
                        kept_local: true,
                    });
                }
                continue;
            }
            upsert_record(&mut tx, &record).await?;
            merged.push(MergedRecord {
                record,
                kept_local: false,
            });
        }

        tx.commit().await?;
        Ok(merged)
    }

    /// Queued (pending or in-flight) mutations ordered by creation time.
    pub async fn list_pending_mutations(
        &self,
        collection: Option<Collection>,
    ) -> Result<Vec<PendingMutation>> {
        let rows: Vec<MutationRow> = match collection {
            Some(c) => {
                sqlx::query_as(&format!(
                    "SELECT * FROM pending_mutations WHERE status IN {} AND collection = ? ORDER BY created_at, seq",
                    QUEUED
                ))
                .bind(c.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT * FROM pending_mutations WHERE status IN {} ORDER BY created_at, seq",
                    QUEUED
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(hydrate_mutation).collect()
    }

    pub async fn list_failed_mutations(&self) -> Result<Vec<PendingMutation>> {
        let rows: Vec<MutationRow> = sqlx::query_as(
            "SELECT * FROM pending_mutations WHERE status = 'failed' ORDER BY created_at, seq",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(hydrate_mutation).collect()
    }

    pub async fn get_mutation(&self, mutation_id: &str) -> Result<Option<PendingMutation>> {
        let row: Option<MutationRow> =
            sqlx::query_as("SELECT * FROM pending_mutations WHERE mutation_id = ?")
                .bind(mutation_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(hydrate_mutation).transpose()
    }

    /// The first pending mutation queued after `seq` (drain cursor).
    pub async fn next_pending_after(&self, seq: i64) -> Result<Option<PendingMutation>> {
        let row: Option<MutationRow> = sqlx::query_as(
            "SELECT * FROM pending_mutations WHERE status = 'pending' AND seq > ? ORDER BY seq LIMIT 1",
        )
        .bind(seq)
        .fetch_optional(&self.pool)
        .await?;

        row.map(hydrate_mutation).transpose()
    }

    /// Returns true if a delete of `target_id` is waiting to be replayed.
    pub async fn has_queued_delete(&self, collection: Collection, target_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pending_mutations
             WHERE collection = ? AND target_id = ? AND operation = 'delete' AND status != 'committed'",
        )
        .bind(collection.as_str())
        .bind(target_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    /// Moves a pending mutation to in-flight. Returns false if it is no
    /// longer pending, e.g. another drain claimed or retired it first.
    pub async fn claim_mutation(&self, mutation_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            "UPDATE pending_mutations SET status = 'in-flight' WHERE mutation_id = ? AND status = 'pending'",
        )
        .bind(mutation_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Takes the store-wide drain lease for `owner`, or extends it if
    /// `owner` already holds it. Returns false while another owner holds an
    /// unexpired lease.
    ///
    /// The lease lives in the database, so it excludes drains running in
    /// other processes that share the same file.
    pub async fn acquire_drain_lease(&self, owner: &str, ttl: Duration) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let expires_at = now + lease_delta(ttl)?;
        let result = sqlx::query(
            r#"
            INSERT INTO drain_lease (id, owner, expires_at) VALUES (1, ?, ?)
            ON CONFLICT (id) DO UPDATE SET owner = excluded.owner, expires_at = excluded.expires_at
            WHERE drain_lease.owner = excluded.owner OR drain_lease.expires_at <= ?
            "#,
        )
        .bind(owner)
        .bind(to_db_time(&expires_at))
        .bind(to_db_time(&now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Extends a lease held by `owner`. Returns false if it was lost.
    pub async fn renew_drain_lease(&self, owner: &str, ttl: Duration) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let expires_at = Utc::now() + lease_delta(ttl)?;
        let result = sqlx::query("UPDATE drain_lease SET expires_at = ? WHERE id = 1 AND owner = ?")
            .bind(to_db_time(&expires_at))
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn release_drain_lease(&self, owner: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("DELETE FROM drain_lease WHERE id = 1 AND owner = ?")
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_mutation(&self, mutation_id: &str, status: MutationStatus) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("UPDATE pending_mutations SET status = ? WHERE mutation_id = ?")
            .bind(status.to_string())
            .bind(mutation_id)
            .execute(&self.pool)
            .await?;
        ensure_found(result.rows_affected(), mutation_id)
    }

    /// Counts one more failed attempt and moves the mutation to `status`.
    pub async fn record_failure(
        &self,
        mutation_id: &str,
        status: MutationStatus,
        reason: &str,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            "UPDATE pending_mutations SET attempts = attempts + 1, status = ?, last_error = ? WHERE mutation_id = ?",
        )
        .bind(status.to_string())
        .bind(reason)
        .bind(mutation_id)
        .execute(&self.pool)
        .await?;
        ensure_found(result.rows_affected(), mutation_id)
    }

    pub async fn remove_mutation(&self, mutation_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM pending_mutations WHERE mutation_id = ?")
            .bind(mutation_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Puts a failed mutation back in the queue with a fresh attempt budget.
    pub async fn reset_mutation(&self, mutation_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            "UPDATE pending_mutations SET status = 'pending', attempts = 0, last_error = NULL
             WHERE mutation_id = ? AND status = 'failed'",
        )
        .bind(mutation_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn reset_failed(&self) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            "UPDATE pending_mutations SET status = 'pending', attempts = 0, last_error = NULL
             WHERE status = 'failed'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Drops a failed mutation for good.
    pub async fn dismiss_mutation(&self, mutation_id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result =
            sqlx::query("DELETE FROM pending_mutations WHERE mutation_id = ? AND status = 'failed'")
                .bind(mutation_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Resets mutations left in-flight by an interrupted drain.
    ///
    /// Only safe while holding the drain lease.
    pub async fn recover_in_flight(&self) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            "UPDATE pending_mutations SET status = 'pending' WHERE status = 'in-flight'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn mutation_counts(&self) -> Result<MutationCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM pending_mutations GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = MutationCounts::default();
        for (status, n) in rows {
            match MutationStatus::from_str(&status).map_err(SyncError::Storage)? {
                MutationStatus::Pending => counts.pending = n as u64,
                MutationStatus::InFlight => counts.in_flight = n as u64,
                MutationStatus::Failed => counts.failed = n as u64,
                MutationStatus::Committed => {}
            }
        }
        Ok(counts)
    }

    /// Rewrites a temporary id to its server-assigned id.
    ///
    /// Updates `target_id` of every un-committed mutation and every exact
    /// string reference in queued payloads and cached documents, in one
    /// transaction. Returns the number of rows touched.
    pub async fn rewrite_temporary_id(&self, temp_id: &str, server_id: &str) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let pattern = format!("%{}%", temp_id);

        let mut touched = sqlx::query(
            "UPDATE pending_mutations SET target_id = ? WHERE target_id = ? AND status != 'committed'",
        )
        .bind(server_id)
        .bind(temp_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let mutations: Vec<(String, String)> = sqlx::query_as(
            "SELECT mutation_id, payload FROM pending_mutations
             WHERE status != 'committed' AND payload LIKE ?",
        )
        .bind(&pattern)
        .fetch_all(&mut *tx)
        .await?;

        for (mutation_id, payload) in mutations {
            let mut value: Value = serde_json::from_str(&payload).map_err(corrupt)?;
            if rewrite_id_references(&mut value, temp_id, server_id) {
                sqlx::query("UPDATE pending_mutations SET payload = ? WHERE mutation_id = ?")
                    .bind(serde_json::to_string(&value)?)
                    .bind(&mutation_id)
                    .execute(&mut *tx)
                    .await?;
                touched += 1;
            }
        }

        let records: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT collection, id, payload FROM cached_records WHERE payload LIKE ?",
        )
        .bind(&pattern)
        .fetch_all(&mut *tx)
        .await?;

        for (collection, id, payload) in records {
            let mut value: Value = serde_json::from_str(&payload).map_err(corrupt)?;
            if rewrite_id_references(&mut value, temp_id, server_id) {
                sqlx::query("UPDATE cached_records SET payload = ? WHERE collection = ? AND id = ?")
                    .bind(serde_json::to_string(&value)?)
                    .bind(&collection)
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
                touched += 1;
            }
        }

        tx.commit().await?;
        Ok(touched)
    }
}

async fn enqueue_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    mutation: PendingMutation,
) -> Result<EnqueueOutcome> {
    if mutation.operation == MutationOp::Delete {
        if let Some(target) = &mutation.target_id {
            let earlier: Vec<(String,)> = sqlx::query_as(
                "SELECT operation FROM pending_mutations
                 WHERE collection = ? AND target_id = ? AND status IN ('pending', 'failed')",
            )
            .bind(mutation.collection.as_str())
            .bind(target)
            .fetch_all(&mut **tx)
            .await?;

            if !earlier.is_empty() {
                sqlx::query(
                    "DELETE FROM pending_mutations
                     WHERE collection = ? AND target_id = ? AND status IN ('pending', 'failed')",
                )
                .bind(mutation.collection.as_str())
                .bind(target)
                .execute(&mut **tx)
                .await?;

                let superseded = earlier.len() as u64;
                tracing::debug!(
                    "Delete of {}/{} superseded {} queued mutation(s)",
                    mutation.collection,
                    target,
                    superseded
                );

                let create = MutationOp::Create.to_string();
                if earlier.iter().any(|(op,)| *op == create) {
                    return Ok(EnqueueOutcome::Cancelled { superseded });
                }
            }
        }
    }

    let payload = serde_json::to_string(&mutation.payload)?;
    let result = sqlx::query(
        r#"
        INSERT INTO pending_mutations (mutation_id, collection, operation, target_id, payload, created_at, attempts, status, last_error)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&mutation.mutation_id)
    .bind(mutation.collection.as_str())
    .bind(mutation.operation.to_string())
    .bind(&mutation.target_id)
    .bind(&payload)
    .bind(to_db_time(&mutation.created_at))
    .bind(mutation.attempts as i64)
    .bind(mutation.status.to_string())
    .bind(&mutation.last_error)
    .execute(&mut **tx)
    .await?;

    let mut queued = mutation;
    queued.seq = result.last_insert_rowid();
    Ok(EnqueueOutcome::Queued(queued))
}

async fn upsert_record(tx: &mut Transaction<'_, Sqlite>, record: &CachedRecord) -> Result<()> {
    let payload = serde_json::to_string(&record.payload)?;
    sqlx::query(
        r#"
        INSERT INTO cached_records (collection, id, payload, fetched_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (collection, id) DO UPDATE SET payload = excluded.payload, fetched_at = excluded.fetched_at
        "#,
    )
    .bind(record.collection.as_str())
    .bind(&record.id)
    .bind(&payload)
    .bind(to_db_time(&record.fetched_at))
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn get_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    collection: Collection,
    id: &str,
) -> Result<Option<CachedRecord>> {
    let row: Option<RecordRow> =
        sqlx::query_as("SELECT * FROM cached_records WHERE collection = ? AND id = ?")
            .bind(collection.as_str())
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;

    row.map(hydrate_record).transpose()
}

async fn queued_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    collection: Collection,
    target_id: &str,
) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM pending_mutations WHERE collection = ? AND target_id = ? AND status IN {}",
        QUEUED
    ))
    .bind(collection.as_str())
    .bind(target_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(count > 0)
}

fn lease_delta(ttl: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(ttl)
        .map_err(|e| SyncError::Validation(format!("Invalid lease duration: {}", e)))
}

fn ensure_found(rows_affected: u64, mutation_id: &str) -> Result<()> {
    if rows_affected == 0 {
        return Err(SyncError::Validation(format!(
            "Unknown mutation: {}",
            mutation_id
        )));
    }
    Ok(())
}

fn to_db_time(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::Storage(format!("Corrupt timestamp '{}': {}", s, e)))
}

fn corrupt(e: serde_json::Error) -> SyncError {
    SyncError::Storage(format!("Corrupt stored document: {}", e))
}

fn hydrate_record(row: RecordRow) -> Result<CachedRecord> {
    Ok(CachedRecord {
        collection: Collection::from_str(&row.collection).map_err(SyncError::Storage)?,
        payload: serde_json::from_str(&row.payload).map_err(corrupt)?,
        fetched_at: from_db_time(&row.fetched_at)?,
        id: row.id,
    })
}

fn hydrate_mutation(row: MutationRow) -> Result<PendingMutation> {
    Ok(PendingMutation {
        mutation_id: row.mutation_id,
        seq: row.seq,
        collection: Collection::from_str(&row.collection).map_err(SyncError::Storage)?,
        operation: MutationOp::from_str(&row.operation).map_err(SyncError::Storage)?,
        target_id: row.target_id,
        payload: serde_json::from_str(&row.payload).map_err(corrupt)?,
        created_at: from_db_time(&row.created_at)?,
        attempts: row.attempts.max(0) as u32,
        status: MutationStatus::from_str(&row.status).map_err(SyncError::Storage)?,
        last_error: row.last_error,
    })
}
