use clap::{Args, Subcommand};
use stillwell_core::sync::SyncRecord;
use stillwell_core::{RitualStep, SyncEngine};

use super::{confirm, resolve_id, short_id, sync_marker, OutputFormat};

#[derive(Args)]
pub struct RitualCommand {
    #[command(subcommand)]
    pub command: RitualSubcommand,
}

#[derive(Subcommand)]
pub enum RitualSubcommand {
    /// Create a new ritual
    Add {
        /// Name of the ritual
        name: String,

        /// Step as "title:seconds" (can be specified multiple times, in order)
        #[arg(long = "step", short, value_parser = parse_step)]
        steps: Vec<RitualStep>,
    },

    /// List rituals
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Include archived rituals
        #[arg(long, short)]
        all: bool,
    },

    /// Record a completed run of a ritual
    Complete {
        /// Ritual id (a unique prefix is enough)
        id: String,

        /// Notes about this run
        #[arg(long, short)]
        notes: Option<String>,
    },

    /// Archive a ritual
    Archive {
        /// Ritual id (a unique prefix is enough)
        id: String,
    },

    /// Delete a ritual
    Delete {
        /// Ritual id (a unique prefix is enough)
        id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

fn parse_step(s: &str) -> Result<RitualStep, String> {
    let (title, secs) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("expected \"title:seconds\", got '{}'", s))?;
    let title = title.trim();
    if title.is_empty() {
        return Err("step title is empty".to_string());
    }
    let secs: u32 = secs
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration '{}'", secs))?;
    Ok(RitualStep::new(title, secs))
}

impl RitualCommand {
    pub async fn run(&self, engine: &SyncEngine) -> Result<(), Box<dyn std::error::Error>> {
        let store = engine.rituals();

        match &self.command {
            RitualSubcommand::Add { name, steps } => {
                let ritual = store.create_ritual(name.clone(), steps.clone()).await?;
                println!("Created ritual {}:", short_id(ritual.local_id()));
                print!("{}", ritual);
                Ok(())
            }

            RitualSubcommand::List { format, all } => {
                let rituals = if *all {
                    store.rituals()
                } else {
                    store.active_rituals()
                };

                if rituals.is_empty() {
                    println!("No rituals found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&rituals)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<8}  {:<30}  S  STEPS  DONE", "ID", "NAME");
                        println!("{}", "-".repeat(64));
                        for ritual in &rituals {
                            let name = if ritual.name.chars().count() > 30 {
                                format!("{}...", ritual.name.chars().take(27).collect::<String>())
                            } else {
                                ritual.name.clone()
                            };
                            println!(
                                "{:<8}  {:<30}  {}  {:<5}  {}{}",
                                short_id(ritual.local_id()),
                                name,
                                sync_marker(ritual.is_synced()),
                                ritual.steps.len(),
                                store.completions_for(ritual.local_id()).len(),
                                if ritual.is_archived { " (archived)" } else { "" }
                            );
                        }
                        println!("\nTotal: {} ritual(s)", rituals.len());
                    }
                }
                Ok(())
            }

            RitualSubcommand::Complete { id, notes } => {
                let local_id = self.resolve(engine, id)?;

                let completion = store.complete(&local_id, notes.clone()).await?;
                let state = if completion.is_synced() {
                    "synced"
                } else {
                    "queued"
                };
                println!(
                    "Completed ritual {} at {} ({})",
                    short_id(&local_id),
                    completion.completed_at.format("%Y-%m-%d %H:%M"),
                    state
                );
                Ok(())
            }

            RitualSubcommand::Archive { id } => {
                let local_id = self.resolve(engine, id)?;

                let ritual = store.archive(&local_id).await?;
                println!("Archived ritual: {}", ritual.name);
                Ok(())
            }

            RitualSubcommand::Delete { id, force } => {
                let local_id = self.resolve(engine, id)?;

                if !force {
                    let ritual = store.get(&local_id).ok_or("Ritual disappeared")?;
                    if !confirm(&format!("Delete ritual '{}'?", ritual.name))? {
                        println!("Deletion cancelled.");
                        return Ok(());
                    }
                }

                let deleted = store.delete_ritual(&local_id).await?;
                println!("Deleted ritual: {}", deleted.name);
                Ok(())
            }
        }
    }

    fn resolve(&self, engine: &SyncEngine, id: &str) -> Result<String, Box<dyn std::error::Error>> {
        let rituals = engine.rituals().rituals();
        resolve_id(rituals.iter().map(|r| r.local_id()), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_step() {
        let step = parse_step("Box breathing:120").unwrap();
        assert_eq!(step, RitualStep::new("Box breathing", 120));

        // Only the last colon separates the duration
        let step = parse_step("Read: one page:300").unwrap();
        assert_eq!(step.title, "Read: one page");
    }

    #[test]
    fn test_parse_step_rejects_bad_input() {
        assert!(parse_step("Stretch").is_err());
        assert!(parse_step(":60").is_err());
        assert!(parse_step("Stretch:soon").is_err());
    }
}
