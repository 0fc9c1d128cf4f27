//! Rituals and their completions.
//!
//! Completions reference their ritual by local id. The server only knows the
//! ritual's server id, so a completion logged against a ritual that has not
//! synced yet is resolved when its queued operation replays.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use super::collection::server_id_of;
use super::{RecordStore, StoreError};
use crate::models::{Ritual, RitualCompletion, RitualStep};
use crate::storage::DocumentStorage;
use crate::sync::{
    CompletionOp, EntityKind, Mutation, NewOperation, OperationExecutor, QueueProcessor,
    ReconcileReport, RemoteAction, RemoteError, RitualOp, SyncOperation, SyncRecord,
};

/// Outcome of reconciling both ritual collections.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RitualReconcile {
    pub rituals: ReconcileReport,
    pub completions: ReconcileReport,
}

pub struct RitualStore {
    rituals: RecordStore<Ritual>,
    completions: RecordStore<RitualCompletion>,
}

impl RitualStore {
    /// Opens both collections and registers the store for ritual and
    /// completion operations.
    pub fn open(queue: Arc<QueueProcessor>, storage: DocumentStorage) -> Result<Arc<Self>, StoreError> {
        let store = Arc::new(Self {
            rituals: RecordStore::open(queue.clone(), storage.clone())?,
            completions: RecordStore::open(queue.clone(), storage)?,
        });

        let executor: Weak<dyn OperationExecutor> = Arc::downgrade(&store) as Weak<dyn OperationExecutor>;
        queue.register_executor(EntityKind::Ritual, executor.clone());
        queue.register_executor(EntityKind::Completion, executor);
        Ok(store)
    }

    /// Every ritual, archived ones included, newest first.
    pub fn rituals(&self) -> Vec<Ritual> {
        self.rituals.all()
    }

    pub fn active_rituals(&self) -> Vec<Ritual> {
        self.rituals
            .all()
            .into_iter()
            .filter(|r| !r.is_archived)
            .collect()
    }

    pub fn get(&self, local_id: &str) -> Option<Ritual> {
        self.rituals.get(local_id)
    }

    pub fn completions(&self) -> Vec<RitualCompletion> {
        self.completions.all()
    }

    pub fn completions_for(&self, ritual_local_id: &str) -> Vec<RitualCompletion> {
        self.completions
            .all()
            .into_iter()
            .filter(|c| c.ritual_local_id == ritual_local_id)
            .collect()
    }

    pub fn unsynced_count(&self) -> usize {
        self.rituals.unsynced_count() + self.completions.unsynced_count()
    }

    pub async fn create_ritual(
        &self,
        name: String,
        steps: Vec<RitualStep>,
    ) -> Result<Ritual, StoreError> {
        if name.trim().is_empty() {
            return Err(StoreError::Invalid("ritual name is empty".to_string()));
        }

        let ritual = Ritual::new(name, self.rituals.context().clock.now()).with_steps(steps);
        Ok(self
            .rituals
            .create(ritual, Mutation::Ritual(RitualOp::Create))
            .await)
    }

    pub async fn update_ritual(
        &self,
        local_id: &str,
        name: Option<String>,
        steps: Option<Vec<RitualStep>>,
    ) -> Result<Ritual, StoreError> {
        if name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(StoreError::Invalid("ritual name is empty".to_string()));
        }

        self.rituals
            .update(local_id, Mutation::Ritual(RitualOp::Update), move |ritual| {
                if let Some(name) = name {
                    ritual.name = name;
                }
                if let Some(steps) = steps {
                    ritual.steps = steps;
                }
            })
            .await
    }

    /// Local-only lock flag. Never sent anywhere.
    pub fn set_locked(&self, local_id: &str, locked: bool) -> Result<Ritual, StoreError> {
        self.rituals.modify(local_id, |ritual| ritual.is_locked = locked)
    }

    pub async fn archive(&self, local_id: &str) -> Result<Ritual, StoreError> {
        self.rituals
            .act(
                local_id,
                RemoteAction::Archive,
                Mutation::Ritual(RitualOp::ArchiveRitual),
                json!({}),
                |ritual| ritual.is_archived = true,
            )
            .await
    }

    /// Deletes a ritual. Completions of it that never reached the server are
    /// discarded along with their queued operations.
    pub async fn delete_ritual(&self, local_id: &str) -> Result<Ritual, StoreError> {
        if self.rituals.get(local_id).is_none() {
            return Err(StoreError::NotFound(local_id.to_string()));
        }

        let orphans = self
            .completions
            .remove_where(|c| c.ritual_local_id == local_id && c.meta().is_pending_create());
        let log = &self.completions.context().log;
        for completion in &orphans {
            log.remove_for_record(EntityKind::Completion, completion.local_id());
        }

        self.rituals
            .delete(local_id, Mutation::Ritual(RitualOp::Delete))
            .await
    }

    /// Records a completed run of a ritual.
    pub async fn complete(
        &self,
        ritual_local_id: &str,
        notes: Option<String>,
    ) -> Result<RitualCompletion, StoreError> {
        let ritual = self
            .rituals
            .get(ritual_local_id)
            .ok_or_else(|| StoreError::NotFound(ritual_local_id.to_string()))?;

        let ctx = self.completions.context();
        let mut completion = RitualCompletion::new(&ritual, ctx.clock.now());
        completion.notes = notes;
        let local_id = completion.local_id().to_string();
        self.completions.insert(completion.clone());

        if let Some(ritual_server_id) = ritual.server_id() {
            if ctx.can_reach_remote() {
                let done = ctx
                    .call(ctx.remote.action(
                        Ritual::COLLECTION,
                        ritual_server_id,
                        RemoteAction::Complete,
                        completion.to_body(),
                    ))
                    .await
                    .and_then(|response| server_id_of(&response));

                match done {
                    Ok(server_id) => {
                        self.completions.settle(&local_id, server_id, None);
                        return Ok(self.completions.get(&local_id).unwrap_or(completion));
                    }
                    Err(e) => tracing::warn!(
                        "Completion of ritual {} failed, queueing: {}",
                        ritual_local_id,
                        e
                    ),
                }
            }
        }

        self.completions.queue().enqueue(
            NewOperation::new(
                Mutation::Completion(CompletionOp::CompleteRitual),
                local_id.clone(),
            )
            .with_data(json!({
                "ritual_local_id": ritual_local_id,
                "completed_at": completion.completed_at,
                "notes": completion.notes,
            })),
        );
        Ok(self.completions.get(&local_id).unwrap_or(completion))
    }

    pub async fn delete_completion(&self, local_id: &str) -> Result<RitualCompletion, StoreError> {
        self.completions
            .delete(local_id, Mutation::Completion(CompletionOp::Delete))
            .await
    }

    /// Reconciles rituals, then completions, then points every completion at
    /// the local id of its ritual.
    pub async fn reconcile(&self) -> RitualReconcile {
        let rituals = self.rituals.reconcile().await;
        let completions = self.completions.reconcile().await;

        if rituals.is_applied() || completions.is_applied() {
            let relinked = self.relink_completions();
            if relinked > 0 {
                tracing::debug!("Relinked {} completion(s)", relinked);
            }
        }

        RitualReconcile {
            rituals,
            completions,
        }
    }

    fn relink_completions(&self) -> usize {
        let by_server_id: HashMap<String, String> = self
            .rituals
            .all()
            .into_iter()
            .filter_map(|r| {
                let local_id = r.local_id().to_string();
                r.sync.server_id.map(|server_id| (server_id, local_id))
            })
            .collect();

        self.completions.modify_all(|completion| {
            let Some(local_id) = completion
                .ritual_server_id
                .as_ref()
                .and_then(|server_id| by_server_id.get(server_id))
            else {
                return false;
            };
            if completion.ritual_local_id == *local_id {
                return false;
            }
            completion.ritual_local_id = local_id.clone();
            true
        })
    }

    /// Replays a queued completion, resolving the ritual's server id now.
    async fn replay_completion(&self, operation: &SyncOperation) -> Result<(), RemoteError> {
        let local = self.completions.get(&operation.local_id);
        if local.as_ref().is_some_and(|c| c.server_id().is_some()) {
            return Ok(());
        }

        let ritual_local_id = local
            .as_ref()
            .map(|c| c.ritual_local_id.clone())
            .or_else(|| {
                operation
                    .data
                    .get("ritual_local_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_default();

        let ritual_server_id = self
            .rituals
            .get(&ritual_local_id)
            .and_then(|r| r.sync.server_id)
            .or_else(|| local.as_ref().and_then(|c| c.ritual_server_id.clone()))
            .ok_or_else(|| {
                RemoteError::Unresolved(format!("ritual {} is not on the server yet", ritual_local_id))
            })?;

        let mut body = match &local {
            Some(completion) => completion.to_body(),
            None => operation.data.clone(),
        };
        body["ritual_id"] = json!(ritual_server_id);

        let response = self
            .completions
            .context()
            .remote
            .action(
                Ritual::COLLECTION,
                &ritual_server_id,
                RemoteAction::Complete,
                body,
            )
            .await?;
        let server_id = server_id_of(&response)?;

        match self.completions.modify(&operation.local_id, |c| {
            c.ritual_server_id = Some(ritual_server_id.clone())
        }) {
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {
                tracing::debug!("Completion {} deleted while in flight", operation.local_id);
            }
            Err(e) => tracing::warn!(
                "Could not link completion {} to ritual {}: {}",
                operation.local_id,
                ritual_server_id,
                e
            ),
        }
        self.completions
            .settle(&operation.local_id, server_id, Some(operation));
        Ok(())
    }
}

#[async_trait]
impl OperationExecutor for RitualStore {
    async fn execute(&self, operation: &SyncOperation) -> Result<(), RemoteError> {
        match operation.op {
            Mutation::Ritual(op) => match op {
                RitualOp::Create => self.rituals.replay_create(operation).await,
                RitualOp::Update => self.rituals.replay_update(operation).await,
                RitualOp::Delete => self.rituals.replay_delete(operation).await,
                RitualOp::ArchiveRitual => {
                    self.rituals
                        .replay_action(operation, RemoteAction::Archive)
                        .await
                }
            },
            Mutation::Completion(op) => match op {
                CompletionOp::CompleteRitual => self.replay_completion(operation).await,
                CompletionOp::Delete => self.completions.replay_delete(operation).await,
            },
            other => Err(RemoteError::Unresolved(format!(
                "{} routed to the ritual store",
                other
            ))),
        }
    }
}
