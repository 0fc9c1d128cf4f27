//! In-memory remote service for tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::operation::SyncOperation;
use super::remote::{
    BatchFailure, BatchOutcome, Collection, RemoteAction, RemoteError, RemoteService,
};

/// Recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    SubmitBatch(Vec<Uuid>),
    Fetch(Collection, usize),
    Create(Collection),
    Update(Collection, String),
    Delete(Collection, String),
    Action(Collection, String, RemoteAction),
}

#[derive(Debug, Default)]
struct FakeState {
    collections: HashMap<Collection, Vec<Value>>,
    calls: Vec<RemoteCall>,
    failure: Option<RemoteError>,
    batch_failures: HashMap<Uuid, BatchFailure>,
    batch_omissions: HashSet<Uuid>,
    delay: Option<Duration>,
    next_id: u64,
}

/// Fake remote service backed by in-memory collections.
///
/// Server records are JSON objects with an `"id"` field.
#[derive(Debug, Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_sizes().len()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                RemoteCall::SubmitBatch(ids) => Some(ids.len()),
                _ => None,
            })
            .collect()
    }

    /// Calls other than fetches; used to assert that nothing was pushed.
    pub fn write_calls(&self) -> Vec<RemoteCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| !matches!(c, RemoteCall::Fetch(_, _)))
            .cloned()
            .collect()
    }

    /// Makes every call fail with `error` until [`FakeRemote::recover`].
    pub fn fail_with(&self, error: RemoteError) {
        self.lock().failure = Some(error);
    }

    pub fn recover(&self) {
        self.lock().failure = None;
    }

    /// Scripts a per-operation failure in batch responses.
    pub fn fail_batch_op(&self, failure: BatchFailure) {
        self.lock().batch_failures.insert(failure.id, failure);
    }

    /// Leaves an operation out of batch responses entirely.
    pub fn omit_from_batch(&self, id: Uuid) {
        self.lock().batch_omissions.insert(id);
    }

    /// Delays every response.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// Replaces a collection's server-side records.
    pub fn seed(&self, collection: Collection, records: Vec<Value>) {
        self.lock().collections.insert(collection, records);
    }

    pub fn records(&self, collection: Collection) -> Vec<Value> {
        self.lock()
            .collections
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn record(&self, collection: Collection, server_id: &str) -> Option<Value> {
        self.records(collection)
            .into_iter()
            .find(|r| r["id"] == server_id)
    }

    /// Records the call, then applies delay and scripted failure.
    async fn enter(&self, call: RemoteCall) -> Result<(), RemoteError> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(call);
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.lock().failure.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn insert(&self, collection: Collection, mut body: Value) -> Value {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("srv-{}", state.next_id);
        if let Value::Object(map) = &mut body {
            map.insert("id".to_string(), Value::String(id));
        }
        state
            .collections
            .entry(collection)
            .or_default()
            .push(body.clone());
        body
    }

    fn patch(
        &self,
        collection: Collection,
        server_id: &str,
        body: &Value,
    ) -> Result<Value, RemoteError> {
        let mut state = self.lock();
        let record = state
            .collections
            .get_mut(&collection)
            .and_then(|records| records.iter_mut().find(|r| r["id"] == server_id))
            .ok_or(RemoteError::NotFound)?;

        if let (Value::Object(target), Value::Object(fields)) = (&mut *record, body) {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(record.clone())
    }
}

#[async_trait]
impl RemoteService for FakeRemote {
    async fn submit_batch(&self, operations: &[SyncOperation]) -> Result<BatchOutcome, RemoteError> {
        self.enter(RemoteCall::SubmitBatch(
            operations.iter().map(|op| op.id).collect(),
        ))
        .await?;

        let state = self.lock();
        let mut outcome = BatchOutcome::default();
        for op in operations.iter().filter(|op| !state.batch_omissions.contains(&op.id)) {
            match state.batch_failures.get(&op.id) {
                Some(failure) => outcome.failed.push(failure.clone()),
                None => outcome.succeeded.push(op.id),
            }
        }
        Ok(outcome)
    }

    async fn fetch(&self, collection: Collection, limit: usize) -> Result<Vec<Value>, RemoteError> {
        self.enter(RemoteCall::Fetch(collection, limit)).await?;
        Ok(self.records(collection).into_iter().take(limit).collect())
    }

    async fn create(&self, collection: Collection, body: Value) -> Result<Value, RemoteError> {
        self.enter(RemoteCall::Create(collection)).await?;
        Ok(self.insert(collection, body))
    }

    async fn update(
        &self,
        collection: Collection,
        server_id: &str,
        body: Value,
    ) -> Result<Value, RemoteError> {
        self.enter(RemoteCall::Update(collection, server_id.to_string()))
            .await?;
        self.patch(collection, server_id, &body)
    }

    async fn delete(&self, collection: Collection, server_id: &str) -> Result<(), RemoteError> {
        self.enter(RemoteCall::Delete(collection, server_id.to_string()))
            .await?;
        let mut state = self.lock();
        let records = state.collections.entry(collection).or_default();
        let before = records.len();
        records.retain(|r| r["id"] != server_id);
        if records.len() == before {
            return Err(RemoteError::NotFound);
        }
        Ok(())
    }

    async fn action(
        &self,
        collection: Collection,
        server_id: &str,
        action: RemoteAction,
        body: Value,
    ) -> Result<Value, RemoteError> {
        self.enter(RemoteCall::Action(
            collection,
            server_id.to_string(),
            action,
        ))
        .await?;

        match action {
            RemoteAction::Archive => {
                self.patch(collection, server_id, &serde_json::json!({ "is_archived": true }))
            }
            RemoteAction::Favorite => self.patch(collection, server_id, &body),
            RemoteAction::Complete => {
                if self.record(collection, server_id).is_none() {
                    return Err(RemoteError::NotFound);
                }
                let mut completion = body;
                if let Value::Object(map) = &mut completion {
                    map.insert("ritual_id".to_string(), Value::String(server_id.to_string()));
                }
                Ok(self.insert(Collection::Completions, completion))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let remote = FakeRemote::new();
        let a = remote.create(Collection::Moods, json!({"mood": 3})).await.unwrap();
        let b = remote.create(Collection::Moods, json!({"mood": 4})).await.unwrap();
        assert_ne!(a["id"], b["id"]);
        assert_eq!(remote.records(Collection::Moods).len(), 2);
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let remote = FakeRemote::new();
        let err = remote.delete(Collection::Journal, "nope").await.unwrap_err();
        assert_eq!(err, RemoteError::NotFound);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_then_returned() {
        let remote = FakeRemote::new();
        remote.fail_with(RemoteError::Status(500));
        assert!(remote.fetch(Collection::Rituals, 10).await.is_err());
        assert_eq!(remote.calls(), vec![RemoteCall::Fetch(Collection::Rituals, 10)]);

        remote.recover();
        assert!(remote.fetch(Collection::Rituals, 10).await.is_ok());
    }

    #[tokio::test]
    async fn test_complete_creates_completion() {
        let remote = FakeRemote::new();
        remote.seed(Collection::Rituals, vec![json!({"id": "r1", "name": "Evening"})]);

        let completion = remote
            .action(Collection::Rituals, "r1", RemoteAction::Complete, json!({"notes": null}))
            .await
            .unwrap();
        assert_eq!(completion["ritual_id"], "r1");
        assert_eq!(remote.records(Collection::Completions).len(), 1);
    }
}
