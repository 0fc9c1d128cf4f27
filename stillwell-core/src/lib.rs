//! Stillwell Core Library
//!
//! Offline-first storage and sync for mood, journal and ritual data.

pub mod clock;
pub mod engine;
pub mod models;
pub mod storage;
pub mod stores;
pub mod sync;

pub use clock::{Clock, SystemClock};
pub use engine::{SyncEngine, SyncStatus, SyncSummary};
pub use models::{JournalEntry, MoodEntry, Ritual, RitualCompletion, RitualStep};
pub use storage::{DocKind, DocumentStorage, StorageError};
pub use stores::{JournalStore, MoodStore, RitualStore, StoreError};
pub use sync::{
    check_server, Connectivity, CredentialFlag, Credentials, DeadLetter, DrainReport, EntityKind,
    HttpRemote, ReconcileReport, RemoteError, RemoteService, SkipReason, SyncOperation,
    SyncSettings,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
