//! Pending mutations and the closed vocabulary of operations per entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The store that owns an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Mood,
    Journal,
    Ritual,
    Completion,
    Session,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Mood,
        EntityKind::Journal,
        EntityKind::Ritual,
        EntityKind::Completion,
        EntityKind::Session,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Mood => "mood",
            EntityKind::Journal => "journal",
            EntityKind::Ritual => "ritual",
            EntityKind::Completion => "completion",
            EntityKind::Session => "session",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoodOp {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalOp {
    Create,
    Update,
    Delete,
    ToggleFavorite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RitualOp {
    Create,
    Update,
    Delete,
    ArchiveRitual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionOp {
    CompleteRitual,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOp {
    Create,
}

/// What an operation does, tagged by the entity that owns it.
///
/// Serialized as `{"entity": "ritual", "type": "archive_ritual"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "type", rename_all = "snake_case")]
pub enum Mutation {
    Mood(MoodOp),
    Journal(JournalOp),
    Ritual(RitualOp),
    Completion(CompletionOp),
    Session(SessionOp),
}

impl Mutation {
    pub fn entity(&self) -> EntityKind {
        match self {
            Mutation::Mood(_) => EntityKind::Mood,
            Mutation::Journal(_) => EntityKind::Journal,
            Mutation::Ritual(_) => EntityKind::Ritual,
            Mutation::Completion(_) => EntityKind::Completion,
            Mutation::Session(_) => EntityKind::Session,
        }
    }

    /// Wire name of the operation type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Mutation::Mood(MoodOp::Create)
            | Mutation::Journal(JournalOp::Create)
            | Mutation::Ritual(RitualOp::Create)
            | Mutation::Session(SessionOp::Create) => "create",
            Mutation::Mood(MoodOp::Update)
            | Mutation::Journal(JournalOp::Update)
            | Mutation::Ritual(RitualOp::Update) => "update",
            Mutation::Mood(MoodOp::Delete)
            | Mutation::Journal(JournalOp::Delete)
            | Mutation::Ritual(RitualOp::Delete)
            | Mutation::Completion(CompletionOp::Delete) => "delete",
            Mutation::Journal(JournalOp::ToggleFavorite) => "toggle_favorite",
            Mutation::Ritual(RitualOp::ArchiveRitual) => "archive_ritual",
            Mutation::Completion(CompletionOp::CompleteRitual) => "complete_ritual",
        }
    }

    /// Whether the operation creates a new server record.
    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Mutation::Mood(MoodOp::Create)
                | Mutation::Journal(JournalOp::Create)
                | Mutation::Ritual(RitualOp::Create)
                | Mutation::Completion(CompletionOp::CompleteRitual)
                | Mutation::Session(SessionOp::Create)
        )
    }

    /// A "not found" answer means the target is already gone or the change
    /// already applied, so it counts as success.
    pub fn resolves_on_not_found(&self) -> bool {
        !self.is_create()
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_name(), self.entity())
    }
}

/// A pending mutation in the operation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: Uuid,
    pub op: Mutation,
    /// Local id of the record the operation replays against.
    pub local_id: String,
    #[serde(default)]
    pub server_id: Option<String>,
    /// Fields needed to replay the mutation remotely.
    #[serde(default)]
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
}

impl SyncOperation {
    pub fn entity(&self) -> EntityKind {
        self.op.entity()
    }
}

/// An operation that has not been logged yet. The log assigns `id` and
/// `created_at` on append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub op: Mutation,
    pub local_id: String,
    pub server_id: Option<String>,
    pub data: serde_json::Value,
}

impl NewOperation {
    pub fn new(op: Mutation, local_id: impl Into<String>) -> Self {
        Self {
            op,
            local_id: local_id.into(),
            server_id: None,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_server_id(mut self, server_id: Option<String>) -> Self {
        self.server_id = server_id;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_wire_shape() {
        let json = serde_json::to_value(Mutation::Ritual(RitualOp::ArchiveRitual)).unwrap();
        assert_eq!(json["entity"], "ritual");
        assert_eq!(json["type"], "archive_ritual");

        let parsed: Mutation =
            serde_json::from_str(r#"{"entity":"journal","type":"toggle_favorite"}"#).unwrap();
        assert_eq!(parsed, Mutation::Journal(JournalOp::ToggleFavorite));
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let parsed =
            serde_json::from_str::<Mutation>(r#"{"entity":"mood","type":"archive_ritual"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_entity_and_type_name() {
        let op = Mutation::Completion(CompletionOp::CompleteRitual);
        assert_eq!(op.entity(), EntityKind::Completion);
        assert_eq!(op.type_name(), "complete_ritual");
        assert_eq!(op.to_string(), "complete_ritual/completion");
    }

    #[test]
    fn test_not_found_resolution() {
        assert!(!Mutation::Mood(MoodOp::Create).resolves_on_not_found());
        assert!(Mutation::Mood(MoodOp::Delete).resolves_on_not_found());
        assert!(Mutation::Journal(JournalOp::Update).resolves_on_not_found());
        assert!(Mutation::Ritual(RitualOp::ArchiveRitual).resolves_on_not_found());
        assert!(!Mutation::Completion(CompletionOp::CompleteRitual).resolves_on_not_found());
    }

    #[test]
    fn test_entity_kind_ordering_follows_all() {
        let mut sorted = EntityKind::ALL;
        sorted.sort();
        assert_eq!(sorted, EntityKind::ALL);
    }
}
