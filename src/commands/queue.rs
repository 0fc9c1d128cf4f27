use clap::Args;
use serde_json::json;
use stillwell_core::{EntityKind, SyncEngine, SyncOperation};

use super::{short_id, OutputFormat};

/// Show pending operations and dead letters
#[derive(Args)]
pub struct QueueCommand {
    /// Only show operations for this entity
    #[arg(long, short, value_parser = parse_entity)]
    entity: Option<EntityKind>,

    /// Forget operations that were dropped after exhausting their retries
    #[arg(long)]
    clear_dead_letters: bool,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

fn parse_entity(s: &str) -> Result<EntityKind, String> {
    EntityKind::ALL
        .into_iter()
        .find(|kind| kind.as_str() == s.to_lowercase())
        .ok_or_else(|| {
            let names: Vec<&str> = EntityKind::ALL.iter().map(|k| k.as_str()).collect();
            format!("unknown entity '{}', expected one of: {}", s, names.join(", "))
        })
}

impl QueueCommand {
    pub fn run(&self, engine: &SyncEngine) -> Result<(), Box<dyn std::error::Error>> {
        if self.clear_dead_letters {
            let count = engine.dead_letters().len();
            engine.log().clear_dead_letters();
            println!("Cleared {} dead letter(s)", count);
            return Ok(());
        }

        let pending = engine.log().list_pending(self.entity);
        let dead: Vec<_> = engine
            .dead_letters()
            .into_iter()
            .filter(|d| self.entity.map_or(true, |e| d.operation.entity() == e))
            .collect();

        match self.format {
            OutputFormat::Json => {
                let out = json!({ "pending": pending, "dead_letters": dead });
                println!("{}", serde_json::to_string_pretty(&out)?);
            }
            OutputFormat::Text => {
                if pending.is_empty() {
                    println!("No pending operations");
                } else {
                    println!(
                        "{:<8}  {:<27}  {:<8}  {:<16}  RETRIES",
                        "OP", "TYPE", "RECORD", "QUEUED"
                    );
                    println!("{}", "-".repeat(78));
                    for op in &pending {
                        print_operation(op);
                    }
                    println!("\nTotal: {} pending", pending.len());
                }

                if !dead.is_empty() {
                    println!();
                    println!("Dead letters");
                    println!("============");
                    for letter in &dead {
                        println!(
                            "  {} {} on {} at {}: {}",
                            short_id(&letter.operation.id.to_string()),
                            letter.operation.op,
                            short_id(&letter.operation.local_id),
                            letter.evicted_at.format("%Y-%m-%d %H:%M"),
                            letter.last_error.as_deref().unwrap_or("unknown error")
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

fn print_operation(op: &SyncOperation) {
    println!(
        "{:<8}  {:<27}  {:<8}  {:<16}  {}",
        short_id(&op.id.to_string()),
        op.op.to_string(),
        short_id(&op.local_id),
        op.created_at.format("%Y-%m-%d %H:%M"),
        op.retry_count
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entity() {
        assert_eq!(parse_entity("mood").unwrap(), EntityKind::Mood);
        assert_eq!(parse_entity("Completion").unwrap(), EntityKind::Completion);
        assert!(parse_entity("habit").is_err());
    }
}
