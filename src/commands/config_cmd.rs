use clap::{Args, Subcommand};

use super::OutputFormat;
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
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("data_dir: {}", config.data_dir.value.display());
                        println!("  source: {}", config.data_dir.source);
                        println!();

                        println!(
                            "sync.server_url: {}",
                            config.sync.server_url.value.as_deref().unwrap_or("(unset)")
                        );
                        println!("  source: {}", config.sync.server_url.source);
                        println!();

                        println!(
                            "sync.api_key: {}",
                            config.sync.masked_key().as_deref().unwrap_or("(unset)")
                        );
                        println!("  source: {}", config.sync.api_key.source);
                        println!();

                        let settings = &config.sync.settings.value;
                        println!("sync.settings:");
                        println!("  max_retries: {}", settings.max_retries);
                        println!("  batch_size: {}", settings.batch_size);
                        println!("  fetch_limit: {}", settings.fetch_limit);
                        println!("  backoff_base_ms: {}", settings.backoff_base_ms);
                        println!("  backoff_cap_ms: {}", settings.backoff_cap_ms);
                        println!("  request_timeout_secs: {}", settings.request_timeout_secs);
                        println!("  source: {}", config.sync.settings.source);
                    }
                }
                Ok(())
            }
        }
    }
}
