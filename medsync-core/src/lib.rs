//! MedSync Core Library
//!
//! Offline-first sync layer for the healthcare management client: a local
//! document store, connectivity monitoring, cache-first data access with
//! optimistic writes, the mutation replay engine and the update channel.

pub mod engine;
pub mod error;
pub mod models;
pub mod network;
pub mod offline;
pub mod remote;
pub mod store;
pub mod update;

#[cfg(test)]
mod testing;

pub use engine::{EngineState, RetryPolicy, SyncEngine, DEFAULT_MAX_ATTEMPTS};
pub use error::{Result, SyncError};
pub use models::{
    is_temporary_id, new_temporary_id, record_id, ApiEnvelope, CachedRecord, Collection,
    ListPage, ListQuery, MutationOp, MutationStatus, Pagination, PendingMutation, SyncRun,
    SyncRunError, TEMP_ID_PREFIX,
};
pub use network::{ConnectivityProbe, HttpProbe, NetworkMonitor, Subscription};
pub use offline::{DataView, EntityView, OfflineData, OfflineView};
pub use remote::{check_server, HttpRemote, RemoteApi, DEFAULT_TIMEOUT};
pub use store::{EnqueueOutcome, LocalStore, MergedRecord, MutationCounts, RecordChange};
pub use update::{
    Activator, AssetSource, FileActivator, HttpAssetSource, UpdateChannel, UpdateState,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
