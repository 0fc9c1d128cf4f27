use clap::{Args, Subcommand};
use stillwell_core::sync::SyncRecord;
use stillwell_core::SyncEngine;

use super::{confirm, resolve_id, short_id, sync_marker, OutputFormat};

#[derive(Args)]
pub struct MoodCommand {
    #[command(subcommand)]
    pub command: MoodSubcommand,
}

#[derive(Subcommand)]
pub enum MoodSubcommand {
    /// Log a mood check-in
    Log {
        /// Mood level from 1 (awful) to 5 (great)
        level: u8,

        /// Free-form note
        #[arg(long, short)]
        note: Option<String>,

        /// Tags (can be specified multiple times)
        #[arg(long = "tag", short)]
        tags: Vec<String>,
    },

    /// List mood check-ins, newest first
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Show at most this many entries
        #[arg(long, short)]
        limit: Option<usize>,
    },

    /// Replace the note on a check-in
    Note {
        /// Entry id (a unique prefix is enough)
        id: String,

        /// New note; omit to clear it
        note: Option<String>,
    },

    /// Delete a check-in
    Delete {
        /// Entry id (a unique prefix is enough)
        id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl MoodCommand {
    pub async fn run(&self, engine: &SyncEngine) -> Result<(), Box<dyn std::error::Error>> {
        let moods = engine.moods();

        match &self.command {
            MoodSubcommand::Log { level, note, tags } => {
                let entry = moods.log_mood(*level, note.clone(), tags.clone()).await?;
                println!("Logged: {}", entry);
                Ok(())
            }

            MoodSubcommand::List { format, limit } => {
                let mut entries = moods.entries();
                if let Some(limit) = limit {
                    entries.truncate(*limit);
                }

                if entries.is_empty() {
                    println!("No mood entries found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<8}  {:<16}  {:<5}  S  NOTE", "ID", "WHEN", "MOOD");
                        println!("{}", "-".repeat(72));
                        for entry in &entries {
                            println!(
                                "{:<8}  {:<16}  {:<5}  {}  {}",
                                short_id(entry.local_id()),
                                entry.created_at.format("%Y-%m-%d %H:%M"),
                                format!("{}/5", entry.mood),
                                sync_marker(entry.is_synced()),
                                entry.note.as_deref().unwrap_or("")
                            );
                        }
                        println!(
                            "\nTotal: {} entr{}",
                            entries.len(),
                            if entries.len() == 1 { "y" } else { "ies" }
                        );
                    }
                }
                Ok(())
            }

            MoodSubcommand::Note { id, note } => {
                let entries = moods.entries();
                let local_id = resolve_id(entries.iter().map(|e| e.local_id()), id)?;

                let updated = moods.update_note(&local_id, note.clone()).await?;
                println!("Updated: {}", updated);
                Ok(())
            }

            MoodSubcommand::Delete { id, force } => {
                let entries = moods.entries();
                let local_id = resolve_id(entries.iter().map(|e| e.local_id()), id)?;

                if !force {
                    let entry = moods.get(&local_id).ok_or("Entry disappeared")?;
                    if !confirm(&format!("Delete mood entry '{}'?", entry))? {
                        println!("Deletion cancelled.");
                        return Ok(());
                    }
                }

                let deleted = moods.delete(&local_id).await?;
                println!("Deleted: {}", deleted);
                Ok(())
            }
        }
    }
}
