//! Sync CLI commands for synchronizing with the server.

use clap::{Args, Subcommand};
use serde_json::json;
use std::time::Duration;
use stillwell_core::{DrainReport, ReconcileReport, SyncSummary};

use super::OutputFormat;
use crate::app;
use crate::config::Config;

/// Sync with remote server
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text", global = true)]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration, server status and queue state
    Status,

    /// Stay running: sync on every reconnect and on each interval while online
    Watch {
        /// Seconds between connectivity probes
        #[arg(long, short, default_value_t = 30)]
        interval: u64,
    },
}

impl SyncCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None => self.sync(config).await,
            Some(SyncSubcommand::Status) => self.status(config).await,
            Some(SyncSubcommand::Watch { interval }) => self.watch(config, *interval).await,
        }
    }

    async fn sync(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        if !config.sync.is_configured() {
            return Err("Sync is not configured. Run `stillwell sync status` for setup.".into());
        }

        let online = app::probe(config).await;
        let engine = app::open_engine(config, online)?;
        if !online {
            let pending = engine.log().len();
            match self.format {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({ "online": false, "pending": pending }))?
                ),
                OutputFormat::Text => {
                    println!("✗ Server unreachable");
                    println!("{} operation(s) remain queued.", pending);
                }
            }
            return Ok(());
        }

        if matches!(self.format, OutputFormat::Text) {
            println!("Syncing with server...");
            println!();
        }
        let summary = engine.sync_now().await;

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&summary_json(&summary))?);
            }
            OutputFormat::Text => print_summary(&summary),
        }
        Ok(())
    }

    async fn status(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let online = app::probe(config).await;
        let engine = app::open_engine(config, online)?;
        let status = engine.status();

        if let OutputFormat::Json = self.format {
            let pending: serde_json::Map<String, serde_json::Value> = status
                .pending
                .iter()
                .map(|(entity, n)| (entity.to_string(), json!(n)))
                .collect();
            let out = json!({
                "configured": config.sync.is_configured(),
                "server_url": config.sync.server_url.value,
                "online": status.online,
                "has_credential": status.has_credential,
                "retry_armed": status.retry_armed,
                "pending": pending,
                "dead_letters": status.dead_letters,
                "unsynced_records": status.unsynced_records,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
            return Ok(());
        }

        println!("Sync Configuration");
        println!("==================");
        println!();

        if !config.sync.is_configured() {
            println!("Status: Not configured (working offline)");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  sync:");
            println!("    server_url: \"https://api.example.com\"");
            println!("    api_key: \"your-api-key\"");
            println!();
            println!("Or set environment variables:");
            println!("  STILLWELL_SYNC_URL");
            println!("  STILLWELL_SYNC_API_KEY");
        } else {
            if let Some(url) = &config.sync.server_url.value {
                println!("Server:    {}", url);
            }
            if let Some(key) = config.sync.masked_key() {
                println!("API Key:   {}", key);
            }
            println!();
            println!(
                "Server status: {}",
                if status.online {
                    "✓ connected"
                } else {
                    "✗ unreachable"
                }
            );
        }

        println!();
        println!("Queue");
        println!("=====");
        println!();
        if status.pending.is_empty() {
            println!("No pending operations");
        } else {
            for (entity, n) in &status.pending {
                println!("  {:<11} {}", entity, n);
            }
            println!("  {:<11} {}", "total", status.pending_total());
        }
        println!("Unsynced records: {}", status.unsynced_records);
        if status.dead_letters > 0 {
            println!(
                "Dead letters:     {} (see `stillwell queue`)",
                status.dead_letters
            );
        }

        Ok(())
    }

    async fn watch(&self, config: &Config, interval: u64) -> Result<(), Box<dyn std::error::Error>> {
        if !config.sync.is_configured() {
            return Err("Sync is not configured. Run `stillwell sync status` for setup.".into());
        }

        // Start offline so the first successful probe is a reconnect.
        let engine = app::open_engine(config, false)?;
        engine.start();
        println!(
            "Watching {} every {}s (Ctrl-C to stop)",
            config.sync.server_url.value.as_deref().unwrap_or_default(),
            interval
        );

        let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reachable = app::probe(config).await;
                    if engine.connectivity().set_online(reachable) {
                        tracing::info!(
                            "Server {}",
                            if reachable { "reachable" } else { "unreachable" }
                        );
                    } else if reachable {
                        // No reconnect edge while the server stays up.
                        engine.sync_now().await;
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    println!();
                    println!("{} operation(s) pending", engine.log().len());
                    return Ok(());
                }
            }
        }
    }
}

fn print_summary(summary: &SyncSummary) {
    let drain = &summary.drain;
    match drain.skipped {
        Some(reason) => println!("  - queue skipped ({})", reason),
        None if drain.attempted == 0 => println!("  ✓ queue empty"),
        None => {
            println!(
                "  ✓ queue: {} sent, {} failed, {} dropped",
                drain.succeeded, drain.failed, drain.evicted
            );
        }
    }

    for (entity, report) in &summary.reconciled {
        println!("  {} {}", reconcile_line(report), entity);
    }

    println!();
    if drain.remaining > 0 {
        println!(
            "{} operation(s) still queued; they will be retried.",
            drain.remaining
        );
    } else {
        println!("Sync complete.");
    }
}

fn reconcile_line(report: &ReconcileReport) -> String {
    if let Some(reason) = report.skipped {
        return format!("- skipped ({}):", reason);
    }
    if let Some(error) = &report.error {
        return format!("✗ {}:", error);
    }
    format!(
        "✓ {} from server, {} local pending:",
        report.server_records, report.local_pending
    )
}

fn drain_json(drain: &DrainReport) -> serde_json::Value {
    json!({
        "skipped": drain.skipped.map(|r| r.to_string()),
        "attempted": drain.attempted,
        "succeeded": drain.succeeded,
        "failed": drain.failed,
        "evicted": drain.evicted,
        "remaining": drain.remaining,
    })
}

fn summary_json(summary: &SyncSummary) -> serde_json::Value {
    let reconciled: serde_json::Map<String, serde_json::Value> = summary
        .reconciled
        .iter()
        .map(|(entity, report)| {
            (
                entity.to_string(),
                json!({
                    "skipped": report.skipped.map(|r| r.to_string()),
                    "error": report.error.as_ref().map(|e| e.to_string()),
                    "server_records": report.server_records,
                    "local_pending": report.local_pending,
                    "total": report.total,
                }),
            )
        })
        .collect();

    json!({
        "online": true,
        "drain": drain_json(&summary.drain),
        "reconciled": reconciled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use stillwell_core::{EntityKind, SkipReason};

    #[test]
    fn test_summary_json() {
        let summary = SyncSummary {
            drain: DrainReport {
                attempted: 3,
                succeeded: 2,
                failed: 1,
                remaining: 1,
                ..DrainReport::default()
            },
            reconciled: vec![
                (
                    EntityKind::Mood,
                    ReconcileReport {
                        server_records: 4,
                        local_pending: 1,
                        total: 5,
                        ..ReconcileReport::default()
                    },
                ),
                (
                    EntityKind::Journal,
                    ReconcileReport::skipped(SkipReason::AlreadyRunning),
                ),
            ],
        };

        let json = summary_json(&summary);
        assert_eq!(json["drain"]["succeeded"], 2);
        assert_eq!(json["drain"]["remaining"], 1);
        assert_eq!(json["reconciled"]["mood"]["total"], 5);
        assert_eq!(json["reconciled"]["journal"]["skipped"], "already running");
    }

    #[test]
    fn test_reconcile_line() {
        let report = ReconcileReport {
            server_records: 2,
            local_pending: 0,
            total: 2,
            ..ReconcileReport::default()
        };
        assert_eq!(reconcile_line(&report), "✓ 2 from server, 0 local pending:");
        assert_eq!(
            reconcile_line(&ReconcileReport::skipped(SkipReason::Offline)),
            "- skipped (offline):"
        );
    }
}
