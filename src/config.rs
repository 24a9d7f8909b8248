use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where a setting came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigSource::Default => "default",
            ConfigSource::File => "file",
            ConfigSource::Environment => "environment",
        })
    }
}

/// A setting together with its origin, shown by `config show`
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }

    fn set(&mut self, value: T, source: ConfigSource) {
        self.value = value;
        self.source = source;
    }
}

/// Remote API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the REST API (e.g., "http://localhost:8080")
    pub server_url: Option<String>,
    /// Bearer key passed through to the API, if it requires one
    pub api_key: Option<String>,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            timeout_secs: medsync_core::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        self.server_url.is_some()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Sync behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Drain the queue after every write command (default: false)
    pub auto_sync: bool,
    /// Attempts before a network failure becomes permanent
    pub max_attempts: u32,
    /// Connectivity heartbeat interval for `watch`, clamped to 30-60s
    pub heartbeat_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_sync: false,
            max_attempts: medsync_core::DEFAULT_MAX_ATTEMPTS,
            heartbeat_secs: 30,
        }
    }
}

/// Resolved client configuration
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// SQLite cache location
    pub database_path: ConfigValue<PathBuf>,
    /// The file that was read, if one existed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub remote: RemoteConfig,
    pub sync: SyncSettings,
}

/// On-disk YAML layout; every section is optional
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    remote: Option<RemoteConfig>,
    sync: Option<SyncSettings>,
}

impl ConfigFile {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&raw).map_err(|e| ConfigError::ParseError(path.to_path_buf(), e))
    }
}

impl Config {
    /// Built-in defaults, before any file or environment is consulted.
    pub fn defaults() -> Self {
        Self {
            database_path: ConfigValue::new(
                Self::default_data_dir().join("cache.db"),
                ConfigSource::Default,
            ),
            config_file: None,
            remote: RemoteConfig::default(),
            sync: SyncSettings::default(),
        }
    }

    /// Environment beats the config file, which beats the defaults.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::defaults();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            config.merge_file(&path, ConfigFile::read(&path)?);
        }

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path, file: ConfigFile) {
        self.config_file = Some(path.to_path_buf());

        if let Some(db_path) = file.database_path {
            // Relative to the directory holding the config file
            let db_path = match path.parent() {
                Some(dir) if db_path.is_relative() => dir.join(db_path),
                _ => db_path,
            };
            self.database_path.set(db_path, ConfigSource::File);
        }
        if let Some(remote) = file.remote {
            self.remote = remote;
        }
        if let Some(sync) = file.sync {
            self.sync = sync;
        }
    }

    /// Applies `MEDSYNC_*` overrides read through `var`.
    fn apply_env<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db_path) = var("MEDSYNC_DATABASE_PATH") {
            self.database_path
                .set(PathBuf::from(db_path), ConfigSource::Environment);
        }
        if let Some(url) = var("MEDSYNC_SERVER_URL") {
            self.remote.server_url = Some(url);
        }
        if let Some(key) = var("MEDSYNC_API_KEY") {
            self.remote.api_key = Some(key);
        }
        if let Some(raw) = var("MEDSYNC_AUTO_SYNC") {
            self.sync.auto_sync = parse_bool(&raw)
                .ok_or_else(|| ConfigError::InvalidValue("MEDSYNC_AUTO_SYNC".to_string(), raw))?;
        }
        Ok(())
    }

    /// `<platform config dir>/medsync`, e.g. ~/.config/medsync on Linux
    pub fn default_config_dir() -> PathBuf {
        platform_dir(dirs::config_dir())
    }

    /// `<platform data dir>/medsync`, e.g. ~/.local/share/medsync on Linux
    pub fn default_data_dir() -> PathBuf {
        platform_dir(dirs::data_dir())
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

fn platform_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(|| PathBuf::from(".")).join("medsync")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(String, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Cannot read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Invalid config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(name, value) => {
                write!(f, "Invalid value '{}' for {}", value, name)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadError(_, e) => Some(e),
            ConfigError::ParseError(_, e) => Some(e),
            ConfigError::InvalidValue(..) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = tempdir().unwrap();
        let config = Config::load(Some(temp_dir.path().join("absent.yaml"))).unwrap();

        assert!(config.database_path.value.ends_with("cache.db"));
        assert_eq!(config.database_path.source, ConfigSource::Default);
        assert!(config.config_file.is_none());
        assert_eq!(config.sync.max_attempts, 3);
        assert_eq!(config.remote.timeout_secs, 15);
    }

    #[test]
    fn test_file_sections_are_merged() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("medsync.yaml");
        std::fs::write(
            &path,
            "database_path: /var/lib/medsync/cache.db\n\
             remote:\n  server_url: http://localhost:9000\n\
             sync:\n  auto_sync: true\n  max_attempts: 5\n",
        )
        .unwrap();

        let config = Config::load(Some(path.clone())).unwrap();
        assert_eq!(
            config.database_path.value,
            PathBuf::from("/var/lib/medsync/cache.db")
        );
        assert_eq!(config.database_path.source, ConfigSource::File);
        assert_eq!(
            config.remote.server_url.as_deref(),
            Some("http://localhost:9000")
        );
        // Keys absent from a section keep their defaults.
        assert_eq!(config.remote.timeout_secs, 15);
        assert_eq!(config.sync.heartbeat_secs, 30);
        assert!(config.sync.auto_sync);
        assert_eq!(config.sync.max_attempts, 5);
        assert_eq!(config.config_file.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_relative_database_path_resolves_against_config_dir() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(&path, "database_path: data/cache.db\n").unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(
            config.database_path.value,
            temp_dir.path().join("data").join("cache.db")
        );
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut config = Config::defaults();
        config.merge_file(
            Path::new("/etc/medsync/config.yaml"),
            ConfigFile {
                database_path: Some(PathBuf::from("/from/file.db")),
                ..ConfigFile::default()
            },
        );

        config
            .apply_env(env(&[
                ("MEDSYNC_DATABASE_PATH", "/from/env.db"),
                ("MEDSYNC_SERVER_URL", "http://api.local"),
                ("MEDSYNC_AUTO_SYNC", "yes"),
            ]))
            .unwrap();

        assert_eq!(config.database_path.value, PathBuf::from("/from/env.db"));
        assert_eq!(config.database_path.source, ConfigSource::Environment);
        assert_eq!(config.remote.server_url.as_deref(), Some("http://api.local"));
        assert!(config.remote.api_key.is_none());
        assert!(config.sync.auto_sync);
    }

    #[test]
    fn test_bad_auto_sync_value_is_rejected() {
        let err = Config::defaults()
            .apply_env(env(&[("MEDSYNC_AUTO_SYNC", "sometimes")]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid value 'sometimes' for MEDSYNC_AUTO_SYNC"
        );
    }

    #[test]
    fn test_malformed_yaml_is_a_parse_error() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        std::fs::write(&path, "remote: [unclosed\n").unwrap();

        let err = Config::load(Some(path)).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
        assert!(err.to_string().starts_with("Invalid config file"));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_timeout_has_floor() {
        let remote = RemoteConfig {
            timeout_secs: 0,
            ..RemoteConfig::default()
        };
        assert_eq!(remote.timeout(), Duration::from_secs(1));
        assert!(!remote.is_configured());
    }
}
