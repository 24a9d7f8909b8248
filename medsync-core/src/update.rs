//! Application update channel.
//!
//! Detects a newly deployed asset version and applies it only when the
//! user confirms. Activation waits for any running sync drain to finish.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::remote::normalize_base_url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateState {
    Current { version: String },
    UpdateAvailable { current: String, available: String },
    Activating { current: String, available: String },
}

impl UpdateState {
    /// Version currently running.
    pub fn current_version(&self) -> &str {
        match self {
            UpdateState::Current { version } => version,
            UpdateState::UpdateAvailable { current, .. } => current,
            UpdateState::Activating { current, .. } => current,
        }
    }

    pub fn available_version(&self) -> Option<&str> {
        match self {
            UpdateState::Current { .. } => None,
            UpdateState::UpdateAvailable { available, .. } => Some(available),
            UpdateState::Activating { available, .. } => Some(available),
        }
    }
}

/// Where the latest deployed version is published.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn latest_version(&self) -> Result<String>;
}

/// Installs a version once the user has confirmed it.
#[async_trait]
pub trait Activator: Send + Sync {
    async fn activate(&self, version: &str) -> Result<()>;
}

/// Reads `GET <server>/version`.
#[derive(Debug, Clone)]
pub struct HttpAssetSource {
    client: reqwest::Client,
    url: String,
}

impl HttpAssetSource {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Network(e.to_string()))?;
        Ok(Self {
            client,
            url: format!("{}/version", normalize_base_url(server_url)),
        })
    }
}

#[async_trait]
impl AssetSource for HttpAssetSource {
    async fn latest_version(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("Version check failed with HTTP {}", status.as_u16());
            return Err(if status.is_server_error() {
                SyncError::Network(message)
            } else {
                SyncError::Validation(message)
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;
        parse_version(&body)
    }
}

/// Accepts `{"version": ".."}` or an envelope whose `data` holds it.
fn parse_version(body: &str) -> Result<String> {
    let value: Value = serde_json::from_str(body)?;
    value
        .get("version")
        .or_else(|| value.get("data").and_then(|d| d.get("version")))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SyncError::Validation("Version response has no version field".to_string()))
}

/// Records the activated version in a marker file.
#[derive(Debug, Clone)]
pub struct FileActivator {
    path: PathBuf,
}

impl FileActivator {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Marker placed next to the database file.
    pub fn beside(database_path: &Path) -> Self {
        let dir = database_path.parent().unwrap_or_else(|| Path::new("."));
        Self::new(dir.join("app-version"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Version written by the last activation, if any.
    pub async fn installed_version(&self) -> Result<Option<String>> {
        read_marker(&self.path).await
    }

    /// Version the user last dismissed, if any.
    pub async fn dismissed_version(&self) -> Result<Option<String>> {
        read_marker(&self.dismissal_path()).await
    }

    pub async fn record_dismissal(&self, version: &str) -> Result<()> {
        write_marker(&self.dismissal_path(), version).await
    }

    fn dismissal_path(&self) -> PathBuf {
        let mut path = self.path.clone().into_os_string();
        path.push(".dismissed");
        PathBuf::from(path)
    }
}

#[async_trait]
impl Activator for FileActivator {
    async fn activate(&self, version: &str) -> Result<()> {
        write_marker(&self.path, version).await
    }
}

async fn read_marker(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            let version = content.trim();
            Ok((!version.is_empty()).then(|| version.to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_marker(path: &Path, version: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, format!("{}\n", version)).await?;
    Ok(())
}

pub struct UpdateChannel {
    state: watch::Sender<UpdateState>,
    source: Arc<dyn AssetSource>,
    activator: Arc<dyn Activator>,
    engine: Option<SyncEngine>,
    dismissed: Mutex<Option<String>>,
}

impl UpdateChannel {
    pub fn new(
        current_version: impl Into<String>,
        source: Arc<dyn AssetSource>,
        activator: Arc<dyn Activator>,
    ) -> Self {
        let (state, _) = watch::channel(UpdateState::Current {
            version: current_version.into(),
        });
        Self {
            state,
            source,
            activator,
            engine: None,
            dismissed: Mutex::new(None),
        }
    }

    /// Restores a dismissal made in an earlier session.
    pub fn with_dismissed(self, version: Option<String>) -> Self {
        if let Ok(mut dismissed) = self.dismissed.lock() {
            *dismissed = version;
        }
        self
    }

    /// Activation will wait for this engine to be idle.
    pub fn with_engine(mut self, engine: SyncEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn state(&self) -> UpdateState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UpdateState> {
        self.state.subscribe()
    }

    /// Asks the asset source for the latest version.
    pub async fn check(&self) -> Result<UpdateState> {
        let latest = self.source.latest_version().await?;

        self.state.send_if_modified(|state| {
            let next = match &*state {
                UpdateState::Current { version } if *version != latest => {
                    tracing::info!("Update available: {} -> {}", version, latest);
                    Some(UpdateState::UpdateAvailable {
                        current: version.clone(),
                        available: latest.clone(),
                    })
                }
                UpdateState::UpdateAvailable { current, available } if *available != latest => {
                    Some(UpdateState::UpdateAvailable {
                        current: current.clone(),
                        available: latest.clone(),
                    })
                }
                UpdateState::Activating { current, available } if *available != latest => {
                    Some(UpdateState::Activating {
                        current: current.clone(),
                        available: latest.clone(),
                    })
                }
                _ => None,
            };
            match next {
                Some(next) => {
                    *state = next;
                    true
                }
                None => false,
            }
        });

        Ok(self.state())
    }

    /// True while an update is available that the user has not dismissed.
    pub fn should_notify(&self) -> bool {
        match &*self.state.borrow() {
            UpdateState::UpdateAvailable { available, .. } => {
                let dismissed = self.dismissed.lock().map(|d| d.clone()).unwrap_or(None);
                dismissed.as_deref() != Some(available.as_str())
            }
            _ => false,
        }
    }

    /// Silences notification for the currently available version and
    /// returns it. The update stays available for `confirm`.
    pub fn dismiss(&self) -> Option<String> {
        let available = match &*self.state.borrow() {
            UpdateState::UpdateAvailable { available, .. } => available.clone(),
            _ => return None,
        };
        if let Ok(mut dismissed) = self.dismissed.lock() {
            *dismissed = Some(available.clone());
        }
        Some(available)
    }

    /// Applies the available update.
    pub async fn confirm(&self) -> Result<UpdateState> {
        let (current, target) = match self.state() {
            UpdateState::UpdateAvailable { current, available } => (current, available),
            UpdateState::Activating { .. } => {
                return Err(SyncError::Validation("Update already activating".to_string()))
            }
            UpdateState::Current { version } => {
                return Err(SyncError::Validation(format!(
                    "No update available, running {}",
                    version
                )))
            }
        };

        self.state.send_replace(UpdateState::Activating {
            current: current.clone(),
            available: target.clone(),
        });

        if let Some(engine) = &self.engine {
            if engine.state().is_draining() {
                tracing::info!("Waiting for sync to finish before activating {}", target);
            }
            engine.wait_idle().await;
        }

        if let Err(e) = self.activator.activate(&target).await {
            tracing::warn!("Activation of {} failed: {}", target, e);
            self.state.send_modify(|state| {
                let available = state
                    .available_version()
                    .unwrap_or(target.as_str())
                    .to_string();
                *state = UpdateState::UpdateAvailable {
                    current: current.clone(),
                    available,
                };
            });
            return Err(e);
        }

        tracing::info!("Activated version {}", target);
        self.state.send_modify(|state| {
            // A check during activation may have seen an even newer version.
            let newer = state
                .available_version()
                .filter(|v| *v != target)
                .map(str::to_string);
            *state = match newer {
                Some(available) => UpdateState::UpdateAvailable {
                    current: target.clone(),
                    available,
                },
                None => UpdateState::Current {
                    version: target.clone(),
                },
            };
        });
        Ok(self.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Collection;
    use crate::offline::OfflineData;
    use crate::store::LocalStore;
    use crate::testing::FakeRemote;
    use crate::network::NetworkMonitor;
    use serde_json::json;
    use tempfile::TempDir;

    struct FakeSource {
        version: Mutex<String>,
    }

    impl FakeSource {
        fn new(version: &str) -> Arc<Self> {
            Arc::new(Self {
                version: Mutex::new(version.to_string()),
            })
        }

        fn publish(&self, version: &str) {
            *self.version.lock().unwrap() = version.to_string();
        }
    }

    #[async_trait]
    impl AssetSource for FakeSource {
        async fn latest_version(&self) -> Result<String> {
            Ok(self.version.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct RecordingActivator {
        activated: Mutex<Vec<String>>,
        fail: Mutex<bool>,
        engine: Mutex<Option<SyncEngine>>,
        saw_draining: Mutex<bool>,
    }

    #[async_trait]
    impl Activator for RecordingActivator {
        async fn activate(&self, version: &str) -> Result<()> {
            let engine = self.engine.lock().unwrap().clone();
            if let Some(engine) = engine {
                *self.saw_draining.lock().unwrap() = engine.state().is_draining();
            }
            if *self.fail.lock().unwrap() {
                return Err(SyncError::Storage("disk full".into()));
            }
            self.activated.lock().unwrap().push(version.to_string());
            Ok(())
        }
    }

    fn channel(source: &Arc<FakeSource>, activator: &Arc<RecordingActivator>) -> UpdateChannel {
        UpdateChannel::new("1.0.0", source.clone(), activator.clone())
    }

    #[tokio::test]
    async fn test_check_detects_new_version() {
        let source = FakeSource::new("1.0.0");
        let activator = Arc::new(RecordingActivator::default());
        let updates = channel(&source, &activator);

        assert_eq!(
            updates.check().await.unwrap(),
            UpdateState::Current { version: "1.0.0".into() }
        );
        assert!(!updates.should_notify());

        source.publish("1.1.0");
        assert_eq!(
            updates.check().await.unwrap(),
            UpdateState::UpdateAvailable {
                current: "1.0.0".into(),
                available: "1.1.0".into()
            }
        );
        assert!(updates.should_notify());

        source.publish("1.2.0");
        assert_eq!(updates.check().await.unwrap().available_version(), Some("1.2.0"));
        assert!(activator.activated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_confirm_activates_available_version() {
        let source = FakeSource::new("2.0.0");
        let activator = Arc::new(RecordingActivator::default());
        let updates = channel(&source, &activator);
        let mut rx = updates.subscribe();

        updates.check().await.unwrap();
        let _ = rx.borrow_and_update();

        let state = updates.confirm().await.unwrap();
        assert_eq!(state, UpdateState::Current { version: "2.0.0".into() });
        assert_eq!(*activator.activated.lock().unwrap(), vec!["2.0.0".to_string()]);
        assert!(rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_confirm_without_update_is_rejected() {
        let source = FakeSource::new("1.0.0");
        let activator = Arc::new(RecordingActivator::default());
        let updates = channel(&source, &activator);

        let err = updates.confirm().await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(activator.activated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_activation_returns_to_available() {
        let source = FakeSource::new("3.0.0");
        let activator = Arc::new(RecordingActivator::default());
        *activator.fail.lock().unwrap() = true;
        let updates = channel(&source, &activator);

        updates.check().await.unwrap();
        assert!(updates.confirm().await.is_err());
        assert_eq!(
            updates.state(),
            UpdateState::UpdateAvailable {
                current: "1.0.0".into(),
                available: "3.0.0".into()
            }
        );
    }

    #[tokio::test]
    async fn test_dismiss_silences_only_that_version() {
        let source = FakeSource::new("1.1.0");
        let activator = Arc::new(RecordingActivator::default());
        let updates = channel(&source, &activator);

        assert_eq!(updates.dismiss(), None);
        updates.check().await.unwrap();
        assert_eq!(updates.dismiss().as_deref(), Some("1.1.0"));
        assert!(!updates.should_notify());
        assert_eq!(updates.state().available_version(), Some("1.1.0"));

        updates.check().await.unwrap();
        assert!(!updates.should_notify());

        source.publish("1.2.0");
        updates.check().await.unwrap();
        assert!(updates.should_notify());
    }

    #[tokio::test]
    async fn test_activation_waits_for_drain() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(temp_dir.path().join("test.db")).await.unwrap();
        let remote = Arc::new(FakeRemote::new());
        remote.set_delay(Duration::from_millis(30));
        let data = OfflineData::new(store.clone(), remote.clone(), NetworkMonitor::new(false));
        data.create(Collection::Bills, json!({"amount": 10})).await.unwrap();
        let engine = SyncEngine::new(store, remote.clone());

        let source = FakeSource::new("1.1.0");
        let activator = Arc::new(RecordingActivator::default());
        *activator.engine.lock().unwrap() = Some(engine.clone());
        let updates = channel(&source, &activator).with_engine(engine.clone());
        updates.check().await.unwrap();

        let drain = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.trigger().await })
        };
        engine
            .subscribe()
            .wait_for(|state| state.is_draining())
            .await
            .unwrap();

        updates.confirm().await.unwrap();
        assert!(!*activator.saw_draining.lock().unwrap());
        assert_eq!(remote.docs(Collection::Bills).len(), 1);

        drain.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_file_activator_writes_marker() {
        let temp_dir = TempDir::new().unwrap();
        let activator = FileActivator::beside(&temp_dir.path().join("cache.db"));
        assert_eq!(activator.installed_version().await.unwrap(), None);

        activator.activate("4.2.0").await.unwrap();
        assert_eq!(
            activator.installed_version().await.unwrap().as_deref(),
            Some("4.2.0")
        );
        assert_eq!(activator.path(), temp_dir.path().join("app-version"));
    }

    #[tokio::test]
    async fn test_dismissal_persists_between_channels() {
        let temp_dir = TempDir::new().unwrap();
        let activator = FileActivator::beside(&temp_dir.path().join("cache.db"));
        assert_eq!(activator.dismissed_version().await.unwrap(), None);

        let source = FakeSource::new("5.1.0");
        let first = UpdateChannel::new("5.0.0", source.clone(), Arc::new(activator.clone()));
        first.check().await.unwrap();
        let version = first.dismiss().unwrap();
        activator.record_dismissal(&version).await.unwrap();
        assert!(temp_dir.path().join("app-version.dismissed").exists());

        let restored = activator.dismissed_version().await.unwrap();
        let second = UpdateChannel::new("5.0.0", source.clone(), Arc::new(activator.clone()))
            .with_dismissed(restored);
        second.check().await.unwrap();
        assert!(!second.should_notify());
        // Dismissal does not count as an activation.
        assert_eq!(activator.installed_version().await.unwrap(), None);

        source.publish("5.2.0");
        second.check().await.unwrap();
        assert!(second.should_notify());
    }

    #[test]
    fn test_parse_version_bodies() {
        assert_eq!(parse_version(r#"{"version":"1.2.3"}"#).unwrap(), "1.2.3");
        assert_eq!(
            parse_version(r#"{"success":true,"data":{"version":"0.9"}}"#).unwrap(),
            "0.9"
        );
        assert!(matches!(
            parse_version(r#"{"success":true}"#),
            Err(SyncError::Validation(_))
        ));
        assert!(parse_version("not json").is_err());
    }
}
