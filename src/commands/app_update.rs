use clap::{Args, Subcommand};
use medsync_core::{FileActivator, HttpAssetSource, SyncError, UpdateChannel, UpdateState};
use std::sync::Arc;

use super::{AppContext, CommandError};
use crate::config::Config;

/// Check for and apply a new deployed version
#[derive(Args)]
pub struct AppUpdateCommand {
    #[command(subcommand)]
    pub command: AppUpdateSubcommand,
}

#[derive(Subcommand)]
pub enum AppUpdateSubcommand {
    /// Check whether a new version is available
    Check,

    /// Install the available version (waits for a running sync)
    Apply,

    /// Stop announcing the available version
    Dismiss,
}

impl AppUpdateCommand {
    pub async fn run(&self, ctx: &AppContext, config: &Config) -> Result<(), CommandError> {
        let activator = FileActivator::beside(&config.database_path.value);
        let updates = open_channel(ctx, config).await?;
        let state = updates.check().await?;

        match (&self.command, state) {
            (_, UpdateState::Current { version }) => {
                println!("Up to date ({}).", version);
            }
            (AppUpdateSubcommand::Check, state) => {
                println!(
                    "Update available: {} -> {}",
                    state.current_version(),
                    state.available_version().unwrap_or("?")
                );
                println!("Run `medsync app-update apply` to install it.");
            }
            (AppUpdateSubcommand::Dismiss, _) => {
                if let Some(version) = updates.dismiss() {
                    activator.record_dismissal(&version).await?;
                    println!("Dismissed {}. `medsync app-update apply` still installs it.", version);
                }
            }
            (AppUpdateSubcommand::Apply, _) => {
                let state = updates.confirm().await?;
                println!("Now running {}.", state.current_version());
                if let UpdateState::UpdateAvailable { available, .. } = state {
                    println!("A newer version ({}) was published meanwhile.", available);
                }
            }
        }
        Ok(())
    }
}

/// Builds the update channel for the configured server. The running version
/// is the last activated one, or this binary's version on first use. A
/// dismissal recorded earlier is restored.
pub async fn open_channel(ctx: &AppContext, config: &Config) -> Result<UpdateChannel, CommandError> {
    let url = ctx.server_url().ok_or(SyncError::NotConfigured)?;
    let source = HttpAssetSource::new(url, config.remote.timeout())?;
    let activator = FileActivator::beside(&config.database_path.value);

    let current = activator
        .installed_version()
        .await?
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
    let dismissed = activator.dismissed_version().await?;

    Ok(UpdateChannel::new(current, Arc::new(source), Arc::new(activator))
        .with_dismissed(dismissed)
        .with_engine(ctx.engine.clone()))
}
