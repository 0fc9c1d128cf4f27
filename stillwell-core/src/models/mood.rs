use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::DocKind;
use crate::sync::{Collection, EntityKind, SyncMeta, SyncRecord};

/// A single mood check-in on a 1..=5 scale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MoodEntry {
    #[serde(flatten)]
    pub sync: SyncMeta,
    pub mood: u8,
    pub note: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Mood entry as returned by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteMood {
    pub id: String,
    pub mood: u8,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl MoodEntry {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(mood: u8, created_at: DateTime<Utc>) -> Self {
        Self {
            sync: SyncMeta::new_local(),
            mood,
            note: None,
            tags: Vec::new(),
            created_at,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn is_valid_level(mood: u8) -> bool {
        (Self::MIN..=Self::MAX).contains(&mood)
    }

    pub fn label(&self) -> &'static str {
        match self.mood {
            1 => "awful",
            2 => "low",
            3 => "okay",
            4 => "good",
            5 => "great",
            _ => "unknown",
        }
    }
}

impl SyncRecord for MoodEntry {
    type Remote = RemoteMood;

    const ENTITY: EntityKind = EntityKind::Mood;
    const COLLECTION: Collection = Collection::Moods;
    const DOC: DocKind = DocKind::Moods;

    fn meta(&self) -> &SyncMeta {
        &self.sync
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.sync
    }

    fn recency(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn remote_id(remote: &RemoteMood) -> &str {
        &remote.id
    }

    fn from_remote(remote: RemoteMood, local_id: String, _local: Option<&Self>) -> Self {
        Self {
            sync: SyncMeta::synced(local_id, remote.id),
            mood: remote.mood,
            note: remote.note,
            tags: remote.tags,
            created_at: remote.created_at,
        }
    }

    fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "mood": self.mood,
            "note": self.note,
            "tags": self.tags,
            "created_at": self.created_at,
        })
    }
}

impl fmt::Display for MoodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}/5)",
            self.created_at.format("%Y-%m-%d %H:%M"),
            self.label(),
            self.mood
        )?;

        if let Some(note) = &self.note {
            write!(f, " - {}", note)?;
        }

        if !self.sync.is_synced {
            write!(f, " [pending]")?;
        }

        Ok(())
    }
}
