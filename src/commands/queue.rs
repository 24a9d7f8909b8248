//! Commands for the mutation queue and sync status.

use clap::Args;
use medsync_core::{is_temporary_id, Collection, MutationOp, PendingMutation, SyncRun};

use super::{try_auto_sync, AppContext, CommandError, OutputFormat};
use crate::config::Config;

/// Replay pending changes against the server
#[derive(Args)]
pub struct SyncCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl SyncCommand {
    pub async fn run(&self, ctx: &AppContext, config: &Config) -> Result<(), CommandError> {
        if !config.remote.is_configured() {
            return Err(CommandError::Sync(medsync_core::SyncError::NotConfigured));
        }

        if !ctx.connect().await {
            let counts = ctx.store.mutation_counts().await?;
            println!(
                "Server unreachable. {} pending change{} kept for later.",
                counts.pending,
                plural(counts.pending)
            );
            return Ok(());
        }

        println!("Syncing with server...");
        match ctx.engine.trigger().await? {
            Some(run) => match self.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&run)?),
                OutputFormat::Text => print_run(&run),
            },
            None => println!("A sync is already running."),
        }
        Ok(())
    }
}

fn print_run(run: &SyncRun) {
    println!();
    println!("  ✓ {} succeeded", run.succeeded);
    if run.failed > 0 {
        println!("  ✗ {} failed", run.failed);
    }
    if run.skipped > 0 {
        println!("  … {} waiting on earlier changes", run.skipped);
    }
    for error in &run.errors {
        println!("    {}: {}", short_id(&error.mutation_id), error.reason);
    }
    println!();
    if run.total() == 0 {
        println!("Nothing to sync.");
    } else if run.is_clean() && run.skipped == 0 {
        println!("Sync complete.");
    } else {
        println!("Sync finished with problems. See `medsync pending --failed`.");
    }
}

/// List queued changes
#[derive(Args)]
pub struct PendingCommand {
    /// Show permanently failed changes instead
    #[arg(long)]
    pub failed: bool,

    /// Only this collection
    #[arg(long)]
    pub collection: Option<Collection>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl PendingCommand {
    pub async fn run(&self, ctx: &AppContext) -> Result<(), CommandError> {
        let mutations: Vec<PendingMutation> = if self.failed {
            ctx.store
                .list_failed_mutations()
                .await?
                .into_iter()
                .filter(|m| self.collection.map_or(true, |c| m.collection == c))
                .collect()
        } else {
            ctx.store.list_pending_mutations(self.collection).await?
        };

        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&mutations)?),
            OutputFormat::Text => {
                if mutations.is_empty() {
                    if self.failed {
                        println!("No failed changes.");
                    } else {
                        println!("No pending changes.");
                    }
                    return Ok(());
                }

                println!(
                    "{:<10} {:<7} {:<16} {:<40} {:>8}  {}",
                    "ID", "OP", "COLLECTION", "TARGET", "ATTEMPTS", "STATUS"
                );
                for m in &mutations {
                    println!(
                        "{:<10} {:<7} {:<16} {:<40} {:>8}  {}",
                        short_id(&m.mutation_id),
                        m.operation,
                        m.collection,
                        m.target_id.as_deref().unwrap_or("-"),
                        m.attempts,
                        m.status
                    );
                    if let Some(error) = &m.last_error {
                        println!("           last error: {}", error);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Re-queue failed changes
#[derive(Args)]
pub struct RetryCommand {
    /// Mutation id (or unique prefix)
    #[arg(required_unless_present = "all", conflicts_with = "all")]
    pub mutation_id: Option<String>,

    /// Retry every failed change
    #[arg(long)]
    pub all: bool,
}

impl RetryCommand {
    pub async fn run(&self, ctx: &AppContext, config: &Config) -> Result<(), CommandError> {
        if self.all {
            let reset = ctx.store.reset_failed().await?;
            println!("Re-queued {} failed change{}.", reset, plural(reset));
        } else {
            let mutation = resolve_failed(ctx, self.mutation_id.as_deref().unwrap_or("")).await?;
            ctx.store.reset_mutation(&mutation.mutation_id).await?;
            println!(
                "Re-queued {} {} {}",
                mutation.operation,
                mutation.collection,
                mutation.target_id.as_deref().unwrap_or("")
            );
        }

        try_auto_sync(ctx, config).await;
        Ok(())
    }
}

/// Drop a failed change for good
#[derive(Args)]
pub struct DismissCommand {
    /// Mutation id (or unique prefix)
    pub mutation_id: String,
}

impl DismissCommand {
    pub async fn run(&self, ctx: &AppContext) -> Result<(), CommandError> {
        let mutation = resolve_failed(ctx, &self.mutation_id).await?;
        ctx.store.dismiss_mutation(&mutation.mutation_id).await?;

        // A create that never reached the server leaves nothing to keep.
        if mutation.operation == MutationOp::Create {
            if let Some(id) = mutation.target_id.as_deref().filter(|id| is_temporary_id(id)) {
                ctx.store.remove(mutation.collection, id).await?;
            }
        }

        println!(
            "Dismissed {} {} {}",
            mutation.operation,
            mutation.collection,
            mutation.target_id.as_deref().unwrap_or("")
        );
        Ok(())
    }
}

/// Finds a failed mutation by full id or unique prefix.
async fn resolve_failed(ctx: &AppContext, id: &str) -> Result<PendingMutation, CommandError> {
    if id.is_empty() {
        return Err(CommandError::InvalidInput("mutation id required".to_string()));
    }

    let mut matches: Vec<PendingMutation> = ctx
        .store
        .list_failed_mutations()
        .await?
        .into_iter()
        .filter(|m| m.mutation_id.starts_with(id))
        .collect();

    match matches.len() {
        0 => Err(CommandError::NotFound(format!("failed change {}", id))),
        1 => Ok(matches.remove(0)),
        n => Err(CommandError::InvalidInput(format!(
            "'{}' matches {} failed changes, use a longer prefix",
            id, n
        ))),
    }
}

/// Show connectivity, queue and cache status
#[derive(Args)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn run(&self, ctx: &AppContext, config: &Config) -> Result<(), CommandError> {
        println!("Sync Status");
        println!("===========");
        println!();

        match ctx.server_url() {
            Some(url) => {
                println!("Server:    {}", url);
                let online = ctx.connect().await;
                println!(
                    "Status:    {}",
                    if online { "✓ online" } else { "✗ unreachable" }
                );
            }
            None => {
                println!("Server:    not configured");
                println!();
                println!("To enable sync, add to your config file:");
                println!();
                println!("  remote:");
                println!("    server_url: \"http://localhost:8080\"");
                println!();
                println!("Or set MEDSYNC_SERVER_URL.");
            }
        }
        println!(
            "Auto-sync: {}",
            if config.sync.auto_sync {
                "enabled"
            } else {
                "disabled"
            }
        );
        println!();

        let counts = ctx.store.mutation_counts().await?;
        println!("Pending:   {}", counts.pending + counts.in_flight);
        println!("Failed:    {}", counts.failed);
        println!();

        println!("Cached records:");
        for collection in Collection::ALL {
            let count = ctx.store.count(collection).await?;
            println!("  {:<16} {}", collection, count);
        }
        Ok(())
    }
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(8)]
}

fn plural(n: u64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSource, ConfigValue, RemoteConfig, SyncSettings};
    use medsync_core::MutationStatus;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        Config {
            database_path: ConfigValue::new(dir.path().join("cache.db"), ConfigSource::Default),
            config_file: None,
            remote: RemoteConfig::default(),
            sync: SyncSettings::default(),
        }
    }

    async fn failed_create(ctx: &AppContext) -> PendingMutation {
        let record = ctx
            .data
            .create(Collection::Patients, json!({"name": "Ada"}))
            .await
            .unwrap();
        let pending = ctx.store.list_pending_mutations(None).await.unwrap();
        ctx.store
            .record_failure(&pending[0].mutation_id, MutationStatus::Failed, "Conflict: gone")
            .await
            .unwrap();
        assert!(ctx.store.get(Collection::Patients, &record.id).await.unwrap().is_some());
        ctx.store.get_mutation(&pending[0].mutation_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_resolve_failed_by_prefix() {
        let dir = TempDir::new().unwrap();
        let ctx = AppContext::open(&test_config(&dir)).await.unwrap();
        let mutation = failed_create(&ctx).await;

        let found = resolve_failed(&ctx, &mutation.mutation_id[..6]).await.unwrap();
        assert_eq!(found.mutation_id, mutation.mutation_id);

        assert!(matches!(
            resolve_failed(&ctx, "zzzz").await,
            Err(CommandError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_dismiss_failed_create_rolls_back_cache() {
        let dir = TempDir::new().unwrap();
        let ctx = AppContext::open(&test_config(&dir)).await.unwrap();
        let mutation = failed_create(&ctx).await;

        DismissCommand {
            mutation_id: mutation.mutation_id.clone(),
        }
        .run(&ctx)
        .await
        .unwrap();

        assert!(ctx.store.list_failed_mutations().await.unwrap().is_empty());
        assert_eq!(ctx.store.count(Collection::Patients).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retry_requeues_failed() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let ctx = AppContext::open(&config).await.unwrap();
        let mutation = failed_create(&ctx).await;

        RetryCommand {
            mutation_id: Some(mutation.mutation_id.clone()),
            all: false,
        }
        .run(&ctx, &config)
        .await
        .unwrap();

        let pending = ctx.store.list_pending_mutations(None).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 0);
        assert_eq!(pending[0].status, MutationStatus::Pending);
    }

    #[tokio::test]
    async fn test_unconfigured_remote_stays_offline() {
        let dir = TempDir::new().unwrap();
        let ctx = AppContext::open(&test_config(&dir)).await.unwrap();
        assert!(!ctx.connect().await);
        assert!(!ctx.network.current());
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
