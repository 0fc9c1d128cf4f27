use clap::{Args, Subcommand};
use stillwell_core::sync::SyncRecord;
use stillwell_core::SyncEngine;

use super::{confirm, resolve_id, short_id, sync_marker, OutputFormat};

#[derive(Args)]
pub struct JournalCommand {
    #[command(subcommand)]
    pub command: JournalSubcommand,
}

#[derive(Subcommand)]
pub enum JournalSubcommand {
    /// Write a new journal entry
    Write {
        /// Entry text
        content: String,

        /// Optional title
        #[arg(long, short)]
        title: Option<String>,

        /// Mood level (1-5) to attach
        #[arg(long, short)]
        mood: Option<u8>,
    },

    /// List journal entries, newest first
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Only show favorites
        #[arg(long)]
        favorites: bool,
    },

    /// Edit an entry's content or title
    Edit {
        /// Entry id (a unique prefix is enough)
        id: String,

        /// New content
        #[arg(long)]
        content: Option<String>,

        /// New title
        #[arg(long, short)]
        title: Option<String>,
    },

    /// Toggle the favorite flag on an entry
    Favorite {
        /// Entry id (a unique prefix is enough)
        id: String,
    },

    /// Delete an entry
    Delete {
        /// Entry id (a unique prefix is enough)
        id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl JournalCommand {
    pub async fn run(&self, engine: &SyncEngine) -> Result<(), Box<dyn std::error::Error>> {
        let journal = engine.journal();

        match &self.command {
            JournalSubcommand::Write {
                content,
                title,
                mood,
            } => {
                let entry = journal
                    .write(content.clone(), title.clone(), *mood)
                    .await?;
                println!("Saved entry {}", short_id(entry.local_id()));
                Ok(())
            }

            JournalSubcommand::List { format, favorites } => {
                let entries = if *favorites {
                    journal.favorites()
                } else {
                    journal.entries()
                };

                if entries.is_empty() {
                    println!("No journal entries found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&entries)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<8}  {:<16}  S  ★  ENTRY", "ID", "WHEN");
                        println!("{}", "-".repeat(80));
                        for entry in &entries {
                            let heading = match &entry.title {
                                Some(title) => format!("{}: {}", title, entry.preview(40)),
                                None => entry.preview(50),
                            };
                            println!(
                                "{:<8}  {:<16}  {}  {}  {}",
                                short_id(entry.local_id()),
                                entry.created_at.format("%Y-%m-%d %H:%M"),
                                sync_marker(entry.is_synced()),
                                if entry.is_favorite { "★" } else { " " },
                                heading
                            );
                        }
                        println!("\nTotal: {} entr{}", entries.len(), plural(entries.len()));
                    }
                }
                Ok(())
            }

            JournalSubcommand::Edit { id, content, title } => {
                if content.is_none() && title.is_none() {
                    return Err("Nothing to update. Provide --content or --title.".into());
                }

                let entries = journal.entries();
                let local_id = resolve_id(entries.iter().map(|e| e.local_id()), id)?;

                let updated = journal
                    .edit(&local_id, content.clone(), title.clone())
                    .await?;
                println!("Updated entry:");
                println!("{}", updated);
                Ok(())
            }

            JournalSubcommand::Favorite { id } => {
                let entries = journal.entries();
                let local_id = resolve_id(entries.iter().map(|e| e.local_id()), id)?;

                let entry = journal.toggle_favorite(&local_id).await?;
                if entry.is_favorite {
                    println!("Marked {} as favorite", short_id(entry.local_id()));
                } else {
                    println!("Removed {} from favorites", short_id(entry.local_id()));
                }
                Ok(())
            }

            JournalSubcommand::Delete { id, force } => {
                let entries = journal.entries();
                let local_id = resolve_id(entries.iter().map(|e| e.local_id()), id)?;

                if !force {
                    let entry = journal.get(&local_id).ok_or("Entry disappeared")?;
                    let prompt = format!("Delete journal entry '{}'?", entry.preview(30));
                    if !confirm(&prompt)? {
                        println!("Deletion cancelled.");
                        return Ok(());
                    }
                }

                let deleted = journal.delete(&local_id).await?;
                println!("Deleted entry {}", short_id(deleted.local_id()));
                Ok(())
            }
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        "y"
    } else {
        "ies"
    }
}
