mod app_update;
mod config_cmd;
mod context;
mod queue;
mod records;
mod watch;

pub use app_update::AppUpdateCommand;
pub use config_cmd::ConfigCommand;
pub use context::{try_auto_sync, AppContext};
pub use queue::{DismissCommand, PendingCommand, RetryCommand, StatusCommand, SyncCommand};
pub use records::{CreateCommand, DeleteCommand, ListCommand, ShowCommand, UpdateCommand};
pub use watch::WatchCommand;

use clap::ValueEnum;
use medsync_core::SyncError;

use crate::config::ConfigError;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Errors from CLI commands
#[derive(Debug)]
pub enum CommandError {
    Config(ConfigError),
    Sync(SyncError),
    InvalidInput(String),
    NotFound(String),
    Io(std::io::Error),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Config(e) => write!(f, "{}", e),
            CommandError::Sync(e) => write!(f, "{}", e),
            CommandError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            CommandError::NotFound(msg) => write!(f, "Not found: {}", msg),
            CommandError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Config(e) => Some(e),
            CommandError::Sync(e) => Some(e),
            CommandError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SyncError> for CommandError {
    fn from(e: SyncError) -> Self {
        CommandError::Sync(e)
    }
}

impl From<ConfigError> for CommandError {
    fn from(e: ConfigError) -> Self {
        CommandError::Config(e)
    }
}

impl From<std::io::Error> for CommandError {
    fn from(e: std::io::Error) -> Self {
        CommandError::Io(e)
    }
}

impl From<serde_json::Error> for CommandError {
    fn from(e: serde_json::Error) -> Self {
        CommandError::InvalidInput(e.to_string())
    }
}
