//! The local collection behind each entity store, together with the
//! optimistic write paths and queue replays every store shares.
//!
//! Writes always land locally first. A remote call is only attempted when
//! the engine can reach the server; otherwise, or when the call fails, the
//! equivalent operation is queued. Records without a server id are never
//! updated or deleted remotely: their pending create carries the latest state.

use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};

use super::StoreError;
use crate::storage::DocumentStorage;
use crate::sync::{
    fetch_snapshot, merge_collections, Mutation, NewOperation, QueueProcessor, ReconcileReport,
    RemoteAction, RemoteError, SkipReason, SyncContext, SyncOperation, SyncRecord,
};

/// Reads the server id out of a create or complete response.
pub(crate) fn server_id_of(response: &Value) -> Result<String, RemoteError> {
    response
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RemoteError::Decode("response has no id".to_string()))
}

/// A change to a record the server already knows.
enum Change {
    Update(Value),
    Action(RemoteAction, Value),
}

impl Change {
    fn into_body(self) -> Value {
        match self {
            Change::Update(body) | Change::Action(_, body) => body,
        }
    }
}

/// One entity collection: in-memory records, their persisted copy and the
/// merge guard.
pub struct RecordStore<R: SyncRecord> {
    queue: Arc<QueueProcessor>,
    storage: DocumentStorage,
    records: Mutex<Vec<R>>,
    merging: tokio::sync::Mutex<()>,
}

impl<R: SyncRecord> RecordStore<R> {
    pub fn open(queue: Arc<QueueProcessor>, storage: DocumentStorage) -> Result<Self, StoreError> {
        let mut records: Vec<R> = storage.load_or_default(R::DOC)?;
        records.sort_by(|a, b| b.recency().cmp(&a.recency()));
        tracing::debug!("Loaded {} {} record(s)", records.len(), R::COLLECTION);

        Ok(Self {
            queue,
            storage,
            records: Mutex::new(records),
            merging: tokio::sync::Mutex::new(()),
        })
    }

    pub fn context(&self) -> &SyncContext {
        self.queue.context()
    }

    pub fn queue(&self) -> &Arc<QueueProcessor> {
        &self.queue
    }

    fn lock(&self) -> MutexGuard<'_, Vec<R>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, records: &[R]) {
        if let Err(e) = self.storage.save(R::DOC, records) {
            tracing::warn!("Failed to persist {}: {}", R::COLLECTION, e);
        }
    }

    /// All records, newest first.
    pub fn all(&self) -> Vec<R> {
        self.lock().clone()
    }

    pub fn get(&self, local_id: &str) -> Option<R> {
        self.lock().iter().find(|r| r.local_id() == local_id).cloned()
    }

    pub fn find_by_server_id(&self, server_id: &str) -> Option<R> {
        self.lock()
            .iter()
            .find(|r| r.server_id() == Some(server_id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Records whose local copy is not known to match the server.
    pub fn unsynced_count(&self) -> usize {
        self.lock().iter().filter(|r| !r.is_synced()).count()
    }

    /// Inserts a record, keeping newest-first order.
    pub fn insert(&self, record: R) {
        let mut records = self.lock();
        let at = records
            .iter()
            .position(|r| r.recency() < record.recency())
            .unwrap_or(records.len());
        records.insert(at, record);
        self.persist(&records);
    }

    /// Edits one record in place and returns the edited copy.
    pub fn modify<F>(&self, local_id: &str, edit: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut R),
    {
        let mut records = self.lock();
        let record = records
            .iter_mut()
            .find(|r| r.local_id() == local_id)
            .ok_or_else(|| StoreError::NotFound(local_id.to_string()))?;
        edit(record);
        let edited = record.clone();
        self.persist(&records);
        Ok(edited)
    }

    /// Applies `edit` to every record. `edit` returns whether it changed
    /// anything; the collection is persisted only if something did.
    pub fn modify_all<F>(&self, mut edit: F) -> usize
    where
        F: FnMut(&mut R) -> bool,
    {
        let mut records = self.lock();
        let mut changed = 0;
        for record in records.iter_mut() {
            if edit(record) {
                changed += 1;
            }
        }
        if changed > 0 {
            self.persist(&records);
        }
        changed
    }

    pub fn remove(&self, local_id: &str) -> Result<R, StoreError> {
        let mut records = self.lock();
        let index = records
            .iter()
            .position(|r| r.local_id() == local_id)
            .ok_or_else(|| StoreError::NotFound(local_id.to_string()))?;
        let removed = records.remove(index);
        self.persist(&records);
        Ok(removed)
    }

    /// Removes every record matching `pred` and returns them.
    pub fn remove_where<F>(&self, mut pred: F) -> Vec<R>
    where
        F: FnMut(&R) -> bool,
    {
        let mut records = self.lock();
        let (removed, kept): (Vec<R>, Vec<R>) = records.drain(..).partition(|r| pred(r));
        *records = kept;
        if !removed.is_empty() {
            self.persist(&records);
        }
        removed
    }

    /// Records the server id for a record. It only counts as synced when no
    /// other operation for it is still queued.
    pub(crate) fn settle(&self, local_id: &str, server_id: String, finished: Option<&SyncOperation>) {
        let more_pending = self
            .context()
            .log
            .list_pending(Some(R::ENTITY))
            .iter()
            .any(|op| op.local_id == local_id && Some(op.id) != finished.map(|f| f.id));

        let mut records = self.lock();
        if let Some(record) = records.iter_mut().find(|r| r.local_id() == local_id) {
            if more_pending {
                record.meta_mut().server_id = Some(server_id);
            } else {
                record.mark_synced(server_id);
            }
            self.persist(&records);
        }
    }

    /// Writes a new record locally, then creates it remotely or queues `op`.
    pub async fn create(&self, record: R, op: Mutation) -> R {
        let local_id = record.local_id().to_string();
        let body = record.to_body();
        self.insert(record.clone());

        let ctx = self.context();
        if ctx.can_reach_remote() {
            let created = ctx
                .call(ctx.remote.create(R::COLLECTION, body.clone()))
                .await
                .and_then(|response| server_id_of(&response));

            match created {
                Ok(server_id) => {
                    tracing::debug!("Created {} {} as {}", R::COLLECTION, local_id, server_id);
                    self.settle(&local_id, server_id, None);
                    return self.get(&local_id).unwrap_or(record);
                }
                Err(e) => {
                    tracing::warn!("Create of {} {} failed, queueing: {}", R::COLLECTION, local_id, e)
                }
            }
        }

        self.queue
            .enqueue(NewOperation::new(op, local_id.clone()).with_data(body));
        self.get(&local_id).unwrap_or(record)
    }

    /// Edits a record locally and pushes the new state as an update.
    pub async fn update<F>(&self, local_id: &str, op: Mutation, edit: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut R) + Send,
    {
        let record = self.modify(local_id, |r| {
            edit(r);
            r.mark_dirty();
        })?;
        let body = record.to_body();
        Ok(self.push_change(record, op, Change::Update(body)).await)
    }

    /// Edits a record locally and pushes a record action (archive, favorite)
    /// carrying `body`.
    pub async fn act<F>(
        &self,
        local_id: &str,
        action: RemoteAction,
        op: Mutation,
        body: Value,
        edit: F,
    ) -> Result<R, StoreError>
    where
        F: FnOnce(&mut R) + Send,
    {
        let record = self.modify(local_id, |r| {
            edit(r);
            r.mark_dirty();
        })?;
        Ok(self
            .push_change(record, op, Change::Action(action, body))
            .await)
    }

    async fn push_change(&self, record: R, op: Mutation, change: Change) -> R {
        let local_id = record.local_id().to_string();
        let Some(server_id) = record.server_id().map(str::to_string) else {
            tracing::debug!("{} {} not on the server yet, kept local", R::COLLECTION, local_id);
            return record;
        };

        let ctx = self.context();
        if ctx.can_reach_remote() {
            let sent = match &change {
                Change::Update(body) => ctx
                    .call(ctx.remote.update(R::COLLECTION, &server_id, body.clone()))
                    .await
                    .map(|_| ()),
                Change::Action(action, body) => ctx
                    .call(
                        ctx.remote
                            .action(R::COLLECTION, &server_id, *action, body.clone()),
                    )
                    .await
                    .map(|_| ()),
            };

            match sent {
                Ok(()) => {
                    self.settle(&local_id, server_id, None);
                    return self.get(&local_id).unwrap_or(record);
                }
                Err(e) if op.resolves_on_not_found() && e.is_not_found() => {
                    tracing::debug!("{} {} is gone on the server", R::COLLECTION, local_id);
                    return record;
                }
                Err(e) => tracing::warn!("{} for {} failed, queueing: {}", op, local_id, e),
            }
        }

        self.queue.enqueue(
            NewOperation::new(op, local_id)
                .with_server_id(Some(server_id))
                .with_data(change.into_body()),
        );
        record
    }

    /// Removes a record locally and deletes it remotely or queues `op`.
    ///
    /// Queued operations for the record are purged first. A record that never
    /// reached the server is simply discarded.
    pub async fn delete(&self, local_id: &str, op: Mutation) -> Result<R, StoreError> {
        let record = self.remove(local_id)?;
        let purged = self.context().log.remove_for_record(R::ENTITY, local_id);

        let Some(server_id) = record.server_id().map(str::to_string) else {
            tracing::debug!(
                "Discarded unsynced {} {} ({} queued operation(s) dropped)",
                R::COLLECTION,
                local_id,
                purged
            );
            return Ok(record);
        };

        let ctx = self.context();
        if ctx.can_reach_remote() {
            match ctx.call(ctx.remote.delete(R::COLLECTION, &server_id)).await {
                Ok(()) => return Ok(record),
                Err(e) if e.is_not_found() => {
                    tracing::debug!("{} {} already deleted on the server", R::COLLECTION, local_id);
                    return Ok(record);
                }
                Err(e) => tracing::warn!("Delete of {} {} failed, queueing: {}", R::COLLECTION, local_id, e),
            }
        }

        self.queue
            .enqueue(NewOperation::new(op, local_id).with_server_id(Some(server_id)));
        Ok(record)
    }

    /// Server id and body for replaying a change: the current local copy
    /// wins over what was captured at enqueue time.
    fn replay_target(&self, operation: &SyncOperation) -> (Option<String>, Value) {
        match self.get(&operation.local_id) {
            Some(record) => (
                record
                    .server_id()
                    .map(str::to_string)
                    .or_else(|| operation.server_id.clone()),
                record.to_body(),
            ),
            None => (operation.server_id.clone(), operation.data.clone()),
        }
    }

    /// Replays a queued create. Edits made while it was queued go out too.
    pub async fn replay_create(&self, operation: &SyncOperation) -> Result<(), RemoteError> {
        let body = match self.get(&operation.local_id) {
            Some(record) if record.server_id().is_some() => return Ok(()),
            Some(record) => record.to_body(),
            None => operation.data.clone(),
        };

        let created = self.context().remote.create(R::COLLECTION, body).await?;
        let server_id = server_id_of(&created)?;
        tracing::debug!("Replayed create of {} {} as {}", R::COLLECTION, operation.local_id, server_id);
        self.settle(&operation.local_id, server_id, Some(operation));
        Ok(())
    }

    pub async fn replay_update(&self, operation: &SyncOperation) -> Result<(), RemoteError> {
        let (server_id, body) = self.replay_target(operation);
        let Some(server_id) = server_id else {
            return Ok(());
        };

        self.context()
            .remote
            .update(R::COLLECTION, &server_id, body)
            .await?;
        self.settle(&operation.local_id, server_id, Some(operation));
        Ok(())
    }

    pub async fn replay_action(
        &self,
        operation: &SyncOperation,
        action: RemoteAction,
    ) -> Result<(), RemoteError> {
        let (server_id, _) = self.replay_target(operation);
        let Some(server_id) = server_id else {
            return Ok(());
        };

        self.context()
            .remote
            .action(R::COLLECTION, &server_id, action, operation.data.clone())
            .await?;
        self.settle(&operation.local_id, server_id, Some(operation));
        Ok(())
    }

    pub async fn replay_delete(&self, operation: &SyncOperation) -> Result<(), RemoteError> {
        let Some(server_id) = operation.server_id.as_deref() else {
            return Ok(());
        };
        self.context().remote.delete(R::COLLECTION, server_id).await
    }

    /// Pulls the server snapshot and merges it into the local collection.
    ///
    /// Skipped without a credential, while offline, or when a merge for this
    /// collection is already running. On failure local state is untouched.
    pub async fn reconcile(&self) -> ReconcileReport {
        let ctx = self.context();
        if let Some(reason) = ctx.blocked_by() {
            return ReconcileReport::skipped(reason);
        }

        let Ok(_guard) = self.merging.try_lock() else {
            tracing::debug!("Merge of {} already running", R::COLLECTION);
            return ReconcileReport::skipped(SkipReason::AlreadyRunning);
        };

        let snapshot = match fetch_snapshot::<R>(ctx).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Reconcile of {} failed, keeping local state: {}", R::COLLECTION, e);
                return ReconcileReport::failed(e);
            }
        };
        let server_records = snapshot.len();

        let (local_pending, total) = {
            let mut records = self.lock();
            let merged = merge_collections::<R>(snapshot, &records);
            let local_pending = merged
                .iter()
                .filter(|r| r.meta().is_pending_create())
                .count();
            *records = merged;
            self.persist(&records);
            (local_pending, records.len())
        };

        tracing::info!(
            "Reconciled {}: {} from server, {} pending local",
            R::COLLECTION,
            server_records,
            local_pending
        );

        ReconcileReport {
            skipped: None,
            error: None,
            server_records,
            local_pending,
            total,
        }
    }
}
