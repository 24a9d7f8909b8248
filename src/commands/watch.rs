use clap::Args;
use medsync_core::{HttpProbe, SyncError};
use std::sync::Arc;
use std::time::Duration;

use super::app_update::open_channel;
use super::{AppContext, CommandError};
use crate::config::Config;

/// Stay running: track connectivity and sync on every reconnect
#[derive(Args)]
pub struct WatchCommand {
    /// Heartbeat interval in seconds (clamped to 30-60)
    #[arg(long)]
    pub interval: Option<u64>,
}

impl WatchCommand {
    pub async fn run(&self, ctx: &AppContext, config: &Config) -> Result<(), CommandError> {
        let url = ctx
            .server_url()
            .ok_or(SyncError::NotConfigured)?
            .to_string();
        let interval =
            Duration::from_secs(self.interval.unwrap_or(config.sync.heartbeat_secs));

        let _notices = ctx.network.on_change(|online| {
            if online {
                println!("● online");
            } else {
                println!("○ offline, changes will be queued");
            }
        });

        let drainer = ctx.engine.spawn_on_reconnect(&ctx.network);
        let heartbeat = ctx
            .network
            .spawn_heartbeat(Arc::new(HttpProbe::new(url.clone())), interval);

        println!("Watching {} (Ctrl-C to stop)", url);

        let updates = open_channel(ctx, config).await?;
        match updates.check().await {
            Ok(_) if updates.should_notify() => {
                if let Some(available) = updates.state().available_version() {
                    println!(
                        "Update {} available, run `medsync app-update apply`",
                        available
                    );
                }
            }
            Ok(_) => {}
            Err(e) => tracing::debug!("Version check failed: {}", e),
        }

        tokio::signal::ctrl_c().await?;

        heartbeat.abort();
        // Let a drain in progress finish before exiting.
        ctx.engine.wait_idle().await;
        drainer.abort();
        println!("Stopped.");
        Ok(())
    }
}
