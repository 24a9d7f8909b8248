//! Wiring shared by every command: store, remote, connectivity and engine.

use async_trait::async_trait;
use medsync_core::{
    check_server, Collection, HttpRemote, ListPage, ListQuery, LocalStore, NetworkMonitor,
    OfflineData, RemoteApi, RetryPolicy, SyncEngine, SyncError,
};
use serde_json::Value;
use std::sync::Arc;

use super::CommandError;
use crate::config::Config;

/// Stand-in remote used when no server URL is configured.
struct UnconfiguredRemote;

#[async_trait]
impl RemoteApi for UnconfiguredRemote {
    async fn list(&self, _: Collection, _: &ListQuery) -> medsync_core::Result<ListPage> {
        Err(SyncError::NotConfigured)
    }

    async fn get(&self, _: Collection, _: &str) -> medsync_core::Result<Value> {
        Err(SyncError::NotConfigured)
    }

    async fn create(&self, _: Collection, _: &Value) -> medsync_core::Result<Value> {
        Err(SyncError::NotConfigured)
    }

    async fn update(&self, _: Collection, _: &str, _: &Value) -> medsync_core::Result<Value> {
        Err(SyncError::NotConfigured)
    }

    async fn delete(&self, _: Collection, _: &str) -> medsync_core::Result<()> {
        Err(SyncError::NotConfigured)
    }
}

pub struct AppContext {
    pub store: LocalStore,
    pub network: NetworkMonitor,
    pub data: OfflineData,
    pub engine: SyncEngine,
    server_url: Option<String>,
}

impl AppContext {
    /// Opens the local store. Connectivity starts offline until [`connect`](Self::connect).
    pub async fn open(config: &Config) -> Result<Self, CommandError> {
        let store = LocalStore::open(&config.database_path.value).await?;

        let remote: Arc<dyn RemoteApi> = match &config.remote.server_url {
            Some(url) => Arc::new(HttpRemote::new(
                url,
                config.remote.api_key.clone(),
                config.remote.timeout(),
            )?),
            None => Arc::new(UnconfiguredRemote),
        };

        let network = NetworkMonitor::new(false);
        let data = OfflineData::new(store.clone(), remote.clone(), network.clone());
        let engine = SyncEngine::with_policy(
            store.clone(),
            remote,
            RetryPolicy::new(config.sync.max_attempts),
        );

        Ok(Self {
            store,
            network,
            data,
            engine,
            server_url: config.remote.server_url.clone(),
        })
    }

    pub fn server_url(&self) -> Option<&str> {
        self.server_url.as_deref()
    }

    /// Probes the server and updates the connectivity snapshot.
    pub async fn connect(&self) -> bool {
        let online = match &self.server_url {
            Some(url) => check_server(url).await,
            None => false,
        };
        self.network.set_online(online);
        online
    }
}

/// Drains the queue after a write if auto-sync is enabled and the server
/// is reachable. Failures are reported but never fail the command.
pub async fn try_auto_sync(ctx: &AppContext, config: &Config) {
    if !config.sync.auto_sync || !config.remote.is_configured() {
        return;
    }

    if !ctx.connect().await {
        eprintln!("Auto-sync: server unreachable, skipping");
        return;
    }

    match ctx.engine.trigger().await {
        Ok(Some(run)) if !run.is_clean() => {
            eprintln!(
                "Auto-sync: {} mutation(s) failed, see `medsync pending --failed`",
                run.failed
            );
        }
        Ok(_) => {}
        Err(e) => eprintln!("Auto-sync: {}", e),
    }
}
