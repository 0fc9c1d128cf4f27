use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::DocKind;
use crate::sync::{Collection, EntityKind, SyncMeta, SyncRecord};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RitualStep {
    pub title: String,
    pub duration_secs: u32,
}

impl RitualStep {
    pub fn new(title: impl Into<String>, duration_secs: u32) -> Self {
        Self {
            title: title.into(),
            duration_secs,
        }
    }
}

/// A user-defined sequence of steps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ritual {
    #[serde(flatten)]
    pub sync: SyncMeta,
    pub name: String,
    pub steps: Vec<RitualStep>,
    #[serde(default)]
    pub is_archived: bool,
    /// Local-only UI state. Never sent to the server.
    #[serde(default)]
    pub is_locked: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteRitual {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<RitualStep>,
    #[serde(default)]
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
}

impl Ritual {
    pub fn new(name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            sync: SyncMeta::new_local(),
            name: name.into(),
            steps: Vec::new(),
            is_archived: false,
            is_locked: false,
            created_at,
        }
    }

    pub fn with_steps(mut self, steps: Vec<RitualStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn total_secs(&self) -> u32 {
        self.steps.iter().map(|s| s.duration_secs).sum()
    }
}

impl SyncRecord for Ritual {
    type Remote = RemoteRitual;

    const ENTITY: EntityKind = EntityKind::Ritual;
    const COLLECTION: Collection = Collection::Rituals;
    const DOC: DocKind = DocKind::Rituals;

    fn meta(&self) -> &SyncMeta {
        &self.sync
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.sync
    }

    fn recency(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn remote_id(remote: &RemoteRitual) -> &str {
        &remote.id
    }

    fn from_remote(remote: RemoteRitual, local_id: String, local: Option<&Self>) -> Self {
        Self {
            sync: SyncMeta::synced(local_id, remote.id),
            name: remote.name,
            steps: remote.steps,
            is_archived: remote.is_archived,
            is_locked: local.map(|r| r.is_locked).unwrap_or(false),
            created_at: remote.created_at,
        }
    }

    fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "steps": self.steps,
            "is_archived": self.is_archived,
            "created_at": self.created_at,
        })
    }
}

impl fmt::Display for Ritual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "{}", "=".repeat(self.name.len()))?;

        if self.is_archived {
            writeln!(f, "(archived)")?;
        }

        for (i, step) in self.steps.iter().enumerate() {
            writeln!(f, "  {}. {} ({}s)", i + 1, step.title, step.duration_secs)?;
        }

        Ok(())
    }
}

/// One completed run of a ritual.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RitualCompletion {
    #[serde(flatten)]
    pub sync: SyncMeta,
    pub ritual_local_id: String,
    pub ritual_server_id: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCompletion {
    pub id: String,
    pub ritual_id: String,
    pub completed_at: DateTime<Utc>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RitualCompletion {
    pub fn new(ritual: &Ritual, completed_at: DateTime<Utc>) -> Self {
        Self {
            sync: SyncMeta::new_local(),
            ritual_local_id: ritual.sync.local_id.clone(),
            ritual_server_id: ritual.sync.server_id.clone(),
            completed_at,
            notes: None,
        }
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

impl SyncRecord for RitualCompletion {
    type Remote = RemoteCompletion;

    const ENTITY: EntityKind = EntityKind::Completion;
    const COLLECTION: Collection = Collection::Completions;
    const DOC: DocKind = DocKind::Completions;

    fn meta(&self) -> &SyncMeta {
        &self.sync
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.sync
    }

    fn recency(&self) -> DateTime<Utc> {
        self.completed_at
    }

    fn remote_id(remote: &RemoteCompletion) -> &str {
        &remote.id
    }

    /// The ritual link is resolved by the ritual store after merging; here it
    /// is only carried over from the local copy.
    fn from_remote(remote: RemoteCompletion, local_id: String, local: Option<&Self>) -> Self {
        Self {
            sync: SyncMeta::synced(local_id, remote.id),
            ritual_local_id: local
                .map(|c| c.ritual_local_id.clone())
                .unwrap_or_default(),
            ritual_server_id: Some(remote.ritual_id),
            completed_at: remote.completed_at,
            notes: remote.notes,
        }
    }

    fn to_body(&self) -> serde_json::Value {
        serde_json::json!({
            "ritual_id": self.ritual_server_id,
            "completed_at": self.completed_at,
            "notes": self.notes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 7, 0, 0).unwrap()
    }

    fn morning() -> Ritual {
        Ritual::new("Morning", at()).with_steps(vec![
            RitualStep::new("Stretch", 120),
            RitualStep::new("Breathe", 60),
        ])
    }

    #[test]
    fn test_total_secs() {
        assert_eq!(morning().total_secs(), 180);
        assert_eq!(Ritual::new("Empty", at()).total_secs(), 0);
    }

    #[test]
    fn test_from_remote_preserves_lock_flag() {
        let mut local = morning();
        local.is_locked = true;

        let remote = RemoteRitual {
            id: "r-1".to_string(),
            name: "Morning v2".to_string(),
            steps: vec![],
            is_archived: true,
            created_at: at(),
        };

        let merged = Ritual::from_remote(remote, local.sync.local_id.clone(), Some(&local));
        assert!(merged.is_locked);
        assert!(merged.is_archived);
        assert_eq!(merged.name, "Morning v2");
        assert_eq!(merged.local_id(), local.local_id());
    }

    #[test]
    fn test_body_omits_lock_flag() {
        let mut ritual = morning();
        ritual.is_locked = true;
        let body = ritual.to_body();
        assert!(body.get("is_locked").is_none());
        assert_eq!(body["steps"][0]["title"], "Stretch");
    }

    #[test]
    fn test_completion_links_ritual() {
        let mut ritual = morning();
        ritual.mark_synced("r-7".to_string());

        let completion = RitualCompletion::new(&ritual, at()).with_notes("felt calm");
        assert_eq!(completion.ritual_local_id, ritual.sync.local_id);
        assert_eq!(completion.ritual_server_id.as_deref(), Some("r-7"));
        assert_eq!(completion.to_body()["ritual_id"], "r-7");
    }

    #[test]
    fn test_display_lists_steps() {
        let output = morning().to_string();
        assert!(output.contains("1. Stretch (120s)"));
        assert!(output.contains("2. Breathe (60s)"));
    }
}
