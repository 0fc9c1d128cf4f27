use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Weak};

use super::{RecordStore, StoreError};
use crate::models::{JournalEntry, MoodEntry};
use crate::storage::DocumentStorage;
use crate::sync::{
    EntityKind, JournalOp, Mutation, OperationExecutor, QueueProcessor, ReconcileReport,
    RemoteAction, RemoteError, SyncOperation,
};

/// Journal entries. Content is stored and sent as given.
pub struct JournalStore {
    records: RecordStore<JournalEntry>,
}

impl JournalStore {
    pub fn open(queue: Arc<QueueProcessor>, storage: DocumentStorage) -> Result<Arc<Self>, StoreError> {
        let store = Arc::new(Self {
            records: RecordStore::open(queue.clone(), storage)?,
        });
        let executor: Weak<dyn OperationExecutor> = Arc::downgrade(&store) as Weak<dyn OperationExecutor>;
        queue.register_executor(EntityKind::Journal, executor);
        Ok(store)
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.records.all()
    }

    pub fn favorites(&self) -> Vec<JournalEntry> {
        self.records
            .all()
            .into_iter()
            .filter(|e| e.is_favorite)
            .collect()
    }

    pub fn get(&self, local_id: &str) -> Option<JournalEntry> {
        self.records.get(local_id)
    }

    pub fn unsynced_count(&self) -> usize {
        self.records.unsynced_count()
    }

    pub async fn write(
        &self,
        content: String,
        title: Option<String>,
        mood: Option<u8>,
    ) -> Result<JournalEntry, StoreError> {
        if content.trim().is_empty() {
            return Err(StoreError::Invalid("journal content is empty".to_string()));
        }
        if let Some(mood) = mood {
            if !MoodEntry::is_valid_level(mood) {
                return Err(StoreError::Invalid(format!("mood out of range: {}", mood)));
            }
        }

        let mut entry = JournalEntry::new(content, self.records.context().clock.now());
        entry.title = title;
        entry.mood = mood;

        Ok(self
            .records
            .create(entry, Mutation::Journal(JournalOp::Create))
            .await)
    }

    /// Replaces the content and, when given, the title.
    pub async fn edit(
        &self,
        local_id: &str,
        content: Option<String>,
        title: Option<String>,
    ) -> Result<JournalEntry, StoreError> {
        if content.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(StoreError::Invalid("journal content is empty".to_string()));
        }

        let now = self.records.context().clock.now();
        self.records
            .update(local_id, Mutation::Journal(JournalOp::Update), move |entry| {
                if let Some(content) = content {
                    entry.content = content;
                }
                if title.is_some() {
                    entry.title = title;
                }
                entry.updated_at = now;
            })
            .await
    }

    pub async fn toggle_favorite(&self, local_id: &str) -> Result<JournalEntry, StoreError> {
        let favorite = !self
            .records
            .get(local_id)
            .ok_or_else(|| StoreError::NotFound(local_id.to_string()))?
            .is_favorite;

        self.records
            .act(
                local_id,
                RemoteAction::Favorite,
                Mutation::Journal(JournalOp::ToggleFavorite),
                json!({ "is_favorite": favorite }),
                move |entry| entry.is_favorite = favorite,
            )
            .await
    }

    pub async fn delete(&self, local_id: &str) -> Result<JournalEntry, StoreError> {
        self.records
            .delete(local_id, Mutation::Journal(JournalOp::Delete))
            .await
    }

    pub async fn reconcile(&self) -> ReconcileReport {
        self.records.reconcile().await
    }
}

#[async_trait]
impl OperationExecutor for JournalStore {
    async fn execute(&self, operation: &SyncOperation) -> Result<(), RemoteError> {
        let Mutation::Journal(op) = operation.op else {
            return Err(RemoteError::Unresolved(format!(
                "{} routed to the journal store",
                operation.op
            )));
        };

        match op {
            JournalOp::Create => self.records.replay_create(operation).await,
            JournalOp::Update => self.records.replay_update(operation).await,
            JournalOp::Delete => self.records.replay_delete(operation).await,
            JournalOp::ToggleFavorite => {
                self.records
                    .replay_action(operation, RemoteAction::Favorite)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::harness::Harness;
    use crate::sync::fake::RemoteCall;
    use crate::sync::{Collection, SyncRecord};
    use chrono::Duration;

    fn open(h: &Harness) -> Arc<JournalStore> {
        JournalStore::open(h.queue.clone(), h.storage()).unwrap()
    }

    #[tokio::test]
    async fn test_write_online() {
        let h = Harness::new(true);
        let store = open(&h);

        let entry = store
            .write("Quiet morning.".to_string(), Some("Sunday".to_string()), Some(4))
            .await
            .unwrap();

        assert!(entry.is_synced());
        let server = h.remote.record(Collection::Journal, "srv-1").unwrap();
        assert_eq!(server["content"], "Quiet morning.");
        assert_eq!(server["title"], "Sunday");
    }

    #[tokio::test]
    async fn test_write_rejects_empty_content() {
        let h = Harness::new(true);
        let store = open(&h);
        assert!(matches!(
            store.write("   ".to_string(), None, None).await,
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            store.write("ok".to_string(), None, Some(9)).await,
            Err(StoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_edit_bumps_updated_at() {
        let h = Harness::new(true);
        let store = open(&h);
        let entry = store.write("draft".to_string(), None, None).await.unwrap();

        h.clock.advance(Duration::minutes(10));
        let edited = store
            .edit(entry.local_id(), Some("final".to_string()), None)
            .await
            .unwrap();

        assert_eq!(edited.content, "final");
        assert!(edited.updated_at > entry.updated_at);
        assert!(edited.is_synced());
        assert_eq!(
            h.remote.record(Collection::Journal, "srv-1").unwrap()["content"],
            "final"
        );
    }

    #[tokio::test]
    async fn test_toggle_favorite_online_uses_action() {
        let h = Harness::new(true);
        let store = open(&h);
        let entry = store.write("grateful".to_string(), None, None).await.unwrap();

        let toggled = store.toggle_favorite(entry.local_id()).await.unwrap();

        assert!(toggled.is_favorite);
        assert!(h.remote.calls().contains(&RemoteCall::Action(
            Collection::Journal,
            "srv-1".to_string(),
            RemoteAction::Favorite
        )));
        assert_eq!(
            h.remote.record(Collection::Journal, "srv-1").unwrap()["is_favorite"],
            true
        );
        assert_eq!(store.favorites().len(), 1);
    }

    #[tokio::test]
    async fn test_toggle_favorite_offline_is_queued_and_replayed() {
        let h = Harness::new(true);
        let store = open(&h);
        let entry = store.write("grateful".to_string(), None, None).await.unwrap();

        h.connectivity.set_online(false);
        store.toggle_favorite(entry.local_id()).await.unwrap();

        let pending = h.log().list_pending(None);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].op, Mutation::Journal(JournalOp::ToggleFavorite));
        assert_eq!(pending[0].data["is_favorite"], true);

        h.connectivity.set_online(true);
        let report = h.queue.drain().await;
        assert_eq!(report.succeeded, 1);
        assert!(store.get(entry.local_id()).unwrap().is_synced());
        assert_eq!(
            h.remote.record(Collection::Journal, "srv-1").unwrap()["is_favorite"],
            true
        );
    }

    #[tokio::test]
    async fn test_favorite_of_unsynced_entry_rides_on_create() {
        let h = Harness::new(false);
        let store = open(&h);
        let entry = store.write("offline".to_string(), None, None).await.unwrap();
        store.toggle_favorite(entry.local_id()).await.unwrap();

        // Only the create is queued; it carries the favorite flag.
        assert_eq!(h.log().len(), 1);

        h.connectivity.set_online(true);
        h.queue.drain().await;
        assert_eq!(
            h.remote.record(Collection::Journal, "srv-1").unwrap()["is_favorite"],
            true
        );
    }

    #[tokio::test]
    async fn test_failed_replays_retry_then_evict() {
        let h = Harness::new(false);
        let store = open(&h);
        let entry = store.write("lost".to_string(), None, None).await.unwrap();

        h.connectivity.set_online(true);
        h.remote.fail_with(RemoteError::Status(503));
        let max = h.log().max_retries();
        for _ in 0..max {
            h.queue.drain().await;
        }
        h.queue.scheduler().cancel();

        assert!(h.log().is_empty());
        assert_eq!(h.log().dead_letters().len(), 1);
        // The local record is never lost.
        assert!(store.get(entry.local_id()).is_some());
    }
}
