use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod app;
mod commands;
mod config;

use commands::{
    ConfigCommand, JournalCommand, MoodCommand, QueueCommand, RitualCommand, SyncCommand,
};
use config::Config;

#[derive(Parser)]
#[command(name = "stillwell")]
#[command(version)]
#[command(about = "Offline-first mood, journal and ritual tracker", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log and review mood check-ins
    Mood(MoodCommand),

    /// Write and manage journal entries
    Journal(JournalCommand),

    /// Manage rituals and record completions
    Ritual(RitualCommand),

    /// Sync with the server
    Sync(SyncCommand),

    /// Inspect the offline queue
    Queue(QueueCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stillwell=info,stillwell_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Mood(cmd)) => {
            let engine = app::connect(&config).await?;
            cmd.run(&engine).await?;
        }
        Some(Commands::Journal(cmd)) => {
            let engine = app::connect(&config).await?;
            cmd.run(&engine).await?;
        }
        Some(Commands::Ritual(cmd)) => {
            let engine = app::connect(&config).await?;
            cmd.run(&engine).await?;
        }
        Some(Commands::Sync(cmd)) => {
            cmd.run(&config).await?;
        }
        Some(Commands::Queue(cmd)) => {
            let engine = app::open_engine(&config, false)?;
            cmd.run(&engine)?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
