use clap::{Args, Subcommand};

use super::{CommandError, OutputFormat};
use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), CommandError> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        let mut value = serde_json::to_value(config)?;
                        if let Some(key) = value.pointer_mut("/remote/api_key") {
                            if !key.is_null() {
                                *key = serde_json::Value::String("********".to_string());
                            }
                        }
                        println!("{}", serde_json::to_string_pretty(&value)?);
                    }
                    OutputFormat::Text => {
                        match &config.config_file {
                            Some(path) => println!("# {}", path.display()),
                            None => println!(
                                "# {} does not exist, showing defaults",
                                Config::default_config_path().display()
                            ),
                        }
                        println!();

                        println!(
                            "database_path: {}",
                            config.database_path.value.display()
                        );
                        println!("  (from {})", config.database_path.source);
                        println!();

                        println!("remote:");
                        println!(
                            "  server_url: {}",
                            config.remote.server_url.as_deref().unwrap_or("(not set)")
                        );
                        println!(
                            "  api_key: {}",
                            if config.remote.api_key.is_some() {
                                "(set)"
                            } else {
                                "(not set)"
                            }
                        );
                        println!("  timeout_secs: {}", config.remote.timeout_secs);
                        println!();

                        println!("sync:");
                        println!("  auto_sync: {}", config.sync.auto_sync);
                        println!("  max_attempts: {}", config.sync.max_attempts);
                        println!("  heartbeat_secs: {}", config.sync.heartbeat_secs);
                    }
                }
                Ok(())
            }
        }
    }
}
