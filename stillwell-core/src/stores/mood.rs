use async_trait::async_trait;
use std::sync::{Arc, Weak};

use super::{RecordStore, StoreError};
use crate::models::MoodEntry;
use crate::storage::DocumentStorage;
use crate::sync::{
    EntityKind, MoodOp, Mutation, OperationExecutor, QueueProcessor, ReconcileReport,
    RemoteError, SyncOperation,
};

/// Mood check-ins.
pub struct MoodStore {
    records: RecordStore<MoodEntry>,
}

impl MoodStore {
    /// Opens the store and registers it as the executor for mood operations.
    pub fn open(queue: Arc<QueueProcessor>, storage: DocumentStorage) -> Result<Arc<Self>, StoreError> {
        let store = Arc::new(Self {
            records: RecordStore::open(queue.clone(), storage)?,
        });
        let executor: Weak<dyn OperationExecutor> = Arc::downgrade(&store) as Weak<dyn OperationExecutor>;
        queue.register_executor(EntityKind::Mood, executor);
        Ok(store)
    }

    /// All entries, newest first.
    pub fn entries(&self) -> Vec<MoodEntry> {
        self.records.all()
    }

    pub fn get(&self, local_id: &str) -> Option<MoodEntry> {
        self.records.get(local_id)
    }

    pub fn unsynced_count(&self) -> usize {
        self.records.unsynced_count()
    }

    pub async fn log_mood(
        &self,
        mood: u8,
        note: Option<String>,
        tags: Vec<String>,
    ) -> Result<MoodEntry, StoreError> {
        if !MoodEntry::is_valid_level(mood) {
            return Err(StoreError::Invalid(format!(
                "mood must be between {} and {}, got {}",
                MoodEntry::MIN,
                MoodEntry::MAX,
                mood
            )));
        }

        let mut entry = MoodEntry::new(mood, self.records.context().clock.now()).with_tags(tags);
        entry.note = note;

        Ok(self.records.create(entry, Mutation::Mood(MoodOp::Create)).await)
    }

    pub async fn update_note(
        &self,
        local_id: &str,
        note: Option<String>,
    ) -> Result<MoodEntry, StoreError> {
        self.records
            .update(local_id, Mutation::Mood(MoodOp::Update), move |entry| {
                entry.note = note
            })
            .await
    }

    pub async fn delete(&self, local_id: &str) -> Result<MoodEntry, StoreError> {
        self.records
            .delete(local_id, Mutation::Mood(MoodOp::Delete))
            .await
    }

    pub async fn reconcile(&self) -> ReconcileReport {
        self.records.reconcile().await
    }
}

#[async_trait]
impl OperationExecutor for MoodStore {
    async fn execute(&self, operation: &SyncOperation) -> Result<(), RemoteError> {
        let Mutation::Mood(op) = operation.op else {
            return Err(RemoteError::Unresolved(format!(
                "{} routed to the mood store",
                operation.op
            )));
        };

        match op {
            MoodOp::Create => self.records.replay_create(operation).await,
            MoodOp::Update => self.records.replay_update(operation).await,
            MoodOp::Delete => self.records.replay_delete(operation).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::harness::Harness;
    use crate::sync::fake::RemoteCall;
    use crate::sync::{Collection, SkipReason, SyncRecord};
    use serde_json::json;

    fn open(h: &Harness) -> Arc<MoodStore> {
        MoodStore::open(h.queue.clone(), h.storage()).unwrap()
    }

    #[tokio::test]
    async fn test_offline_create_is_queued() {
        let h = Harness::new(false);
        let store = open(&h);

        let entry = store.log_mood(3, None, vec![]).await.unwrap();

        assert!(!entry.is_synced());
        assert!(entry.server_id().is_none());
        let pending = h.log().list_pending(None);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].op, Mutation::Mood(MoodOp::Create));
        assert_eq!(pending[0].local_id, entry.local_id());
        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_offline_create_syncs_after_reconnect_drain() {
        let h = Harness::new(false);
        let store = open(&h);
        let entry = store.log_mood(4, Some("walk".to_string()), vec![]).await.unwrap();

        h.connectivity.set_online(true);
        let report = h.queue.drain().await;

        assert_eq!(report.succeeded, 1);
        assert!(h.log().is_empty());
        let synced = store.get(entry.local_id()).unwrap();
        assert!(synced.is_synced());
        assert_eq!(synced.server_id(), Some("srv-1"));
        // Executor mode: no batch submit.
        assert_eq!(h.remote.batch_calls(), 0);
    }

    #[tokio::test]
    async fn test_online_create_is_direct() {
        let h = Harness::new(true);
        let store = open(&h);

        let entry = store
            .log_mood(5, None, vec!["sun".to_string()])
            .await
            .unwrap();

        assert!(entry.is_synced());
        assert!(h.log().is_empty());
        assert_eq!(h.remote.calls(), vec![RemoteCall::Create(Collection::Moods)]);
        assert_eq!(h.remote.records(Collection::Moods)[0]["tags"], json!(["sun"]));
    }

    #[tokio::test]
    async fn test_no_credential_behaves_like_offline() {
        let h = Harness::new(true);
        h.credentials.set(false);
        let store = open(&h);

        store.log_mood(2, None, vec![]).await.unwrap();

        assert!(h.remote.calls().is_empty());
        assert_eq!(h.log().len(), 1);
        assert_eq!(store.reconcile().await.skipped, Some(SkipReason::NoCredential));
    }

    #[tokio::test]
    async fn test_invalid_level_is_rejected() {
        let h = Harness::new(true);
        let store = open(&h);

        assert!(matches!(
            store.log_mood(0, None, vec![]).await,
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            store.log_mood(6, None, vec![]).await,
            Err(StoreError::Invalid(_))
        ));
        assert!(store.entries().is_empty());
    }

    #[tokio::test]
    async fn test_offline_update_of_synced_entry_is_queued() {
        let h = Harness::new(true);
        let store = open(&h);
        let entry = store.log_mood(3, None, vec![]).await.unwrap();

        h.connectivity.set_online(false);
        let updated = store
            .update_note(entry.local_id(), Some("rough night".to_string()))
            .await
            .unwrap();

        assert!(!updated.is_synced());
        let pending = h.log().list_pending(None);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].op, Mutation::Mood(MoodOp::Update));
        assert_eq!(pending[0].server_id.as_deref(), Some("srv-1"));
        assert_eq!(h.remote.write_calls().len(), 1);

        h.connectivity.set_online(true);
        h.queue.drain().await;
        assert!(store.get(entry.local_id()).unwrap().is_synced());
        assert_eq!(
            h.remote.record(Collection::Moods, "srv-1").unwrap()["note"],
            "rough night"
        );
    }

    #[tokio::test]
    async fn test_reconcile_before_drain_keeps_offline_edit() {
        let h = Harness::new(true);
        let store = open(&h);
        let entry = store.log_mood(3, None, vec![]).await.unwrap();

        h.connectivity.set_online(false);
        store
            .update_note(entry.local_id(), Some("rough night".to_string()))
            .await
            .unwrap();
        h.connectivity.set_online(true);

        let report = store.reconcile().await;
        assert!(report.is_applied());
        let merged = store.get(entry.local_id()).unwrap();
        assert_eq!(merged.note.as_deref(), Some("rough night"));
        assert!(!merged.is_synced());

        h.queue.drain().await;
        assert!(h.log().is_empty());
        assert!(store.get(entry.local_id()).unwrap().is_synced());
        assert_eq!(
            h.remote.record(Collection::Moods, "srv-1").unwrap()["note"],
            "rough night"
        );
    }

    #[tokio::test]
    async fn test_deleting_unsynced_entry_purges_queue() {
        let h = Harness::new(false);
        let store = open(&h);
        let entry = store.log_mood(3, None, vec![]).await.unwrap();
        assert_eq!(h.log().len(), 1);

        store.delete(entry.local_id()).await.unwrap();

        assert!(store.entries().is_empty());
        assert!(h.log().is_empty());
        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_queued_delete_resolves_on_404() {
        let h = Harness::new(true);
        let store = open(&h);
        let entry = store.log_mood(3, None, vec![]).await.unwrap();

        h.connectivity.set_online(false);
        store.delete(entry.local_id()).await.unwrap();
        let pending = h.log().list_pending(None);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].op, Mutation::Mood(MoodOp::Delete));

        // Someone else already removed it.
        h.remote.seed(Collection::Moods, vec![]);
        h.connectivity.set_online(true);
        let report = h.queue.drain().await;

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
        assert!(h.log().is_empty());
        assert!(h.log().dead_letters().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_keeps_pending_and_reuses_local_ids() {
        let h = Harness::new(true);
        let store = open(&h);
        let synced = store.log_mood(4, None, vec![]).await.unwrap();

        h.connectivity.set_online(false);
        let pending = store.log_mood(1, None, vec![]).await.unwrap();
        h.connectivity.set_online(true);

        h.remote.seed(
            Collection::Moods,
            vec![
                json!({"id": "srv-1", "mood": 2, "created_at": "2025-06-01T08:00:00Z"}),
                json!({"id": "srv-9", "mood": 5, "created_at": "2025-05-30T08:00:00Z"}),
            ],
        );

        let report = store.reconcile().await;
        assert!(report.is_applied());
        assert_eq!(report.server_records, 2);
        assert_eq!(report.local_pending, 1);
        assert_eq!(report.total, 3);

        let entries = store.entries();
        let kept = entries
            .iter()
            .find(|e| e.server_id() == Some("srv-1"))
            .unwrap();
        assert_eq!(kept.local_id(), synced.local_id());
        assert_eq!(kept.mood, 2);
        assert!(entries.iter().any(|e| e.local_id() == pending.local_id()));
    }

    #[tokio::test]
    async fn test_misrouted_operation_is_rejected() {
        let h = Harness::new(true);
        let store = open(&h);
        let op = h.log().append(crate::sync::NewOperation::new(
            Mutation::Session(crate::sync::SessionOp::Create),
            "x",
        ));

        assert!(matches!(
            store.execute(&op).await,
            Err(RemoteError::Unresolved(_))
        ));
    }
}
