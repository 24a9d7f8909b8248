use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;

use commands::{
    AppContext, AppUpdateCommand, ConfigCommand, CreateCommand, DeleteCommand, DismissCommand,
    ListCommand, PendingCommand, RetryCommand, ShowCommand, StatusCommand, SyncCommand,
    UpdateCommand, WatchCommand,
};
use config::Config;

#[derive(Parser)]
#[command(name = "medsync")]
#[command(version)]
#[command(about = "Offline-first client for the healthcare management API", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List entities of a collection
    List(ListCommand),

    /// Show one entity
    Show(ShowCommand),

    /// Create an entity
    Create(CreateCommand),

    /// Update an entity
    Update(UpdateCommand),

    /// Delete an entity
    Delete(DeleteCommand),

    /// Replay pending changes against the server
    Sync(SyncCommand),

    /// List queued or failed changes
    Pending(PendingCommand),

    /// Re-queue failed changes
    Retry(RetryCommand),

    /// Drop a failed change
    Dismiss(DismissCommand),

    /// Show connectivity and queue status
    Status(StatusCommand),

    /// Check for or apply application updates
    AppUpdate(AppUpdateCommand),

    /// Track connectivity and sync on reconnect until interrupted
    Watch(WatchCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medsync=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = Config::load(cli.config)?;

    let command = match cli.command {
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
            return Ok(());
        }
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    let ctx = AppContext::open(&config).await?;

    match command {
        Commands::List(cmd) => cmd.run(&ctx).await?,
        Commands::Show(cmd) => cmd.run(&ctx).await?,
        Commands::Create(cmd) => cmd.run(&ctx, &config).await?,
        Commands::Update(cmd) => cmd.run(&ctx, &config).await?,
        Commands::Delete(cmd) => cmd.run(&ctx, &config).await?,
        Commands::Sync(cmd) => cmd.run(&ctx, &config).await?,
        Commands::Pending(cmd) => cmd.run(&ctx).await?,
        Commands::Retry(cmd) => cmd.run(&ctx, &config).await?,
        Commands::Dismiss(cmd) => cmd.run(&ctx).await?,
        Commands::Status(cmd) => cmd.run(&ctx, &config).await?,
        Commands::AppUpdate(cmd) => cmd.run(&ctx, &config).await?,
        Commands::Watch(cmd) => cmd.run(&ctx, &config).await?,
        Commands::Config(_) => {}
    }

    Ok(())
}
