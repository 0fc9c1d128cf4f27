use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::DocKind;
use crate::sync::{Collection, EntityKind, SyncMeta, SyncRecord};

/// A journal entry. `content` is opaque to the engine; it may already be
/// encrypted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    #[serde(flatten)]
    pub sync: SyncMeta,
    pub title: Option<String>,
    pub content: String,
    pub mood: Option<u8>,
    #[serde(default)]
    pub is_favorite: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteJournalEntry {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub mood: Option<u8>,
    #[serde(default)]
    pub is_favorite: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn new(content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            sync: SyncMeta::new_local(),
            title: None,
            content: content.into(),
            mood: None,
            is_favorite: false,
            created_at,
            updated_at: created_at,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_mood(mut self, mood: u8) -> Self {
        self.mood = Some(mood);
        self
    }

    /// First line of the content, for listings.
    pub fn preview(&self, max_chars: usize) -> String {
        let first = self.content.lines().next().unwrap_or("");
        if first.chars().count() > max_chars {
            let cut: String = first.chars().take(max_chars).collect();
            format!("{}...", cut)
        } else {
            first.to_string()
        }
    }
}

impl SyncRecord for JournalEntry {
    type Remote = RemoteJournalEntry;

    const ENTITY: EntityKind = EntityKind::Journal;
    const COLLECTION: Collection = Collection::Journal;
    const DOC: DocKind = DocKind::Journal;

    fn meta(&self) -> &SyncMeta {
        &self.sync
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.sync
    }

    fn recency(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn remote_id(remote: &RemoteJournalEntry) -> &str {
        &remote.id
    }

    fn from_remote(remote: RemoteJournalEntry, local_id: String, _local: Option<&Self>) -> Self {
        Self {
            sync: SyncMeta::synced(local_id, remote.id),
            title: remote.title,
            content: remote.content,
            mood: remote.mood,
            is_favorite: remote.is_favorite,
            created_at: remote.created_at,
            updated_at: remote.updated_at,
        }
    }

    fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "title": self.title,
            "content": self.content,
            "mood": self.mood,
            "is_favorite": self.is_favorite,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        })
    }
}

impl fmt::Display for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let title = self.title.as_deref().unwrap_or("Untitled");
        writeln!(f, "{}{}", title, if self.is_favorite { " *" } else { "" })?;
        writeln!(f, "{}", "=".repeat(title.len()))?;
        writeln!(f, "{}", self.created_at.format("%Y-%m-%d %H:%M"))?;

        if let Some(mood) = self.mood {
            writeln!(f, "Mood: {}/5", mood)?;
        }

        writeln!(f, "\n{}", self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 21, 0, 0).unwrap()
    }

    #[test]
    fn test_journal_entry_new() {
        let entry = JournalEntry::new("Slept well.", at()).with_title("Morning");

        assert_eq!(entry.title.as_deref(), Some("Morning"));
        assert_eq!(entry.created_at, entry.updated_at);
        assert!(!entry.is_favorite);
        assert!(entry.sync.is_pending_create());
    }

    #[test]
    fn test_preview_truncates_first_line() {
        let entry = JournalEntry::new("A very long first line\nsecond", at());
        assert_eq!(entry.preview(6), "A very...");
        assert_eq!(entry.preview(100), "A very long first line");
    }

    #[test]
    fn test_display() {
        let entry = JournalEntry::new("Gratitude list", at()).with_mood(4);
        let output = format!("{}", entry);
        assert!(output.contains("Untitled"));
        assert!(output.contains("Mood: 4/5"));
        assert!(output.contains("Gratitude list"));
    }
}
