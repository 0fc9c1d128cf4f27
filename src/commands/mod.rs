mod config_cmd;
mod journal;
mod mood;
mod queue;
mod ritual;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use journal::JournalCommand;
pub use mood::MoodCommand;
pub use queue::QueueCommand;
pub use ritual::RitualCommand;
pub use sync_cmd::SyncCommand;

use clap::ValueEnum;
use std::io::{self, Write};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Resolves a full or abbreviated local id.
fn resolve_id<'a>(
    ids: impl IntoIterator<Item = &'a str>,
    query: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let matches: Vec<&str> = ids.into_iter().filter(|id| id.starts_with(query)).collect();

    if let Some(exact) = matches.iter().find(|id| **id == query) {
        return Ok(exact.to_string());
    }
    match matches.as_slice() {
        [] => Err(format!("Not found: {}", query).into()),
        [id] => Ok(id.to_string()),
        _ => Err(format!("Ambiguous id '{}' matches {} records", query, matches.len()).into()),
    }
}

/// Short form of a local id for listings.
fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn sync_marker(is_synced: bool) -> &'static str {
    if is_synced {
        "✓"
    } else {
        "…"
    }
}

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
