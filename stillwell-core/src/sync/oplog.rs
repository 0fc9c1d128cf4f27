//! Durable operation log: the ordered list of mutations the server has not
//! confirmed yet.
//!
//! The whole log is rewritten to disk on every mutating call. Logs stay small
//! (hundreds of entries), so a full rewrite is cheap and keeps the on-disk
//! document trivially consistent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::operation::{EntityKind, NewOperation, SyncOperation};
use crate::clock::Clock;
use crate::storage::{DocKind, DocumentStorage, StorageError};

/// On-disk shape of the queue document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueDocument {
    #[serde(default)]
    operations: Vec<SyncOperation>,
}

/// An operation dropped after exhausting its retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub operation: SyncOperation,
    pub evicted_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// What happened to an operation after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Still queued with the new retry count.
    Retry(u32),
    /// Retry budget exhausted; moved to the dead-letter record.
    Evicted,
    /// The operation was no longer in the log.
    Missing,
}

/// Result of applying a set of outcomes in one pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AppliedOutcomes {
    pub removed: usize,
    pub retried: usize,
    pub evicted: usize,
    /// Highest retry count among operations still queued after a failure.
    pub max_retry_count: Option<u32>,
}

#[derive(Debug, Default)]
struct LogState {
    operations: Vec<SyncOperation>,
    dead_letters: Vec<DeadLetter>,
}

/// The shared pending-mutation queue.
pub struct OperationLog {
    storage: DocumentStorage,
    clock: Arc<dyn Clock>,
    max_retries: u32,
    state: Mutex<LogState>,
}

impl OperationLog {
    /// Opens the log, replaying the persisted queue into memory.
    ///
    /// Entries that are already at or over the retry cap (written by an older
    /// build with a higher cap) are moved to the dead-letter record so the
    /// in-memory log never violates `retry_count < max_retries`.
    pub fn open(
        storage: DocumentStorage,
        clock: Arc<dyn Clock>,
        max_retries: u32,
    ) -> Result<Self, StorageError> {
        let doc: QueueDocument = storage.load_or_default(DocKind::SyncQueue)?;
        let dead_letters: Vec<DeadLetter> = storage.load_or_default(DocKind::DeadLetters)?;

        let log = Self {
            storage,
            clock,
            max_retries,
            state: Mutex::new(LogState {
                operations: Vec::new(),
                dead_letters,
            }),
        };

        let (keep, over): (Vec<_>, Vec<_>) = doc
            .operations
            .into_iter()
            .partition(|op| op.retry_count < max_retries);

        {
            let mut state = log.lock();
            state.operations = keep;
            let now = log.clock.now();
            for operation in over {
                state.dead_letters.push(DeadLetter {
                    operation,
                    evicted_at: now,
                    last_error: Some("retry budget exhausted before restart".to_string()),
                });
            }
            tracing::debug!("Replayed {} pending operation(s)", state.operations.len());
        }

        Ok(log)
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Persistence failures are logged, not retried. Memory stays
    /// authoritative until the next successful write.
    fn persist(&self, state: &LogState) {
        let doc = QueueDocumentRef {
            operations: &state.operations,
        };
        if let Err(e) = self.storage.save(DocKind::SyncQueue, &doc) {
            tracing::warn!("Failed to persist sync queue: {}", e);
        }
    }

    fn persist_dead_letters(&self, state: &LogState) {
        if let Err(e) = self.storage.save(DocKind::DeadLetters, &state.dead_letters) {
            tracing::warn!("Failed to persist dead letters: {}", e);
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Appends an operation, assigning its id and enqueue time.
    pub fn append(&self, new: NewOperation) -> SyncOperation {
        let operation = SyncOperation {
            id: Uuid::new_v4(),
            op: new.op,
            local_id: new.local_id,
            server_id: new.server_id,
            data: new.data,
            created_at: self.clock.now(),
            retry_count: 0,
        };

        let mut state = self.lock();
        state.operations.push(operation.clone());
        self.persist(&state);

        tracing::debug!("Queued {} for {}", operation.op, operation.local_id);
        operation
    }

    /// Removes one operation. Returns false if it was not present.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut state = self.lock();
        let before = state.operations.len();
        state.operations.retain(|op| op.id != id);
        let removed = state.operations.len() != before;
        if removed {
            self.persist(&state);
        }
        removed
    }

    /// Removes every operation targeting one record.
    pub fn remove_for_record(&self, entity: EntityKind, local_id: &str) -> usize {
        let mut state = self.lock();
        let before = state.operations.len();
        state
            .operations
            .retain(|op| !(op.entity() == entity && op.local_id == local_id));
        let removed = before - state.operations.len();
        if removed > 0 {
            self.persist(&state);
        }
        removed
    }

    /// Pending operations in enqueue order, optionally for one entity.
    pub fn list_pending(&self, entity: Option<EntityKind>) -> Vec<SyncOperation> {
        let state = self.lock();
        let mut ops: Vec<SyncOperation> = state
            .operations
            .iter()
            .filter(|op| entity.map_or(true, |e| op.entity() == e))
            .cloned()
            .collect();
        ops.sort_by_key(|op| op.created_at);
        ops
    }

    pub fn get(&self, id: Uuid) -> Option<SyncOperation> {
        self.lock().operations.iter().find(|op| op.id == id).cloned()
    }

    pub fn has_pending(&self) -> bool {
        !self.lock().operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records one failed attempt.
    pub fn record_failure(&self, id: Uuid, error: &str) -> FailureOutcome {
        let mut state = self.lock();
        let outcome = self.fail_one(&mut state, id, error);
        self.persist(&state);
        if outcome == FailureOutcome::Evicted {
            self.persist_dead_letters(&state);
        }
        outcome
    }

    /// Applies a batch of outcomes with a single rewrite of the log.
    pub fn apply_outcomes(&self, succeeded: &[Uuid], failed: &[(Uuid, String)]) -> AppliedOutcomes {
        let mut state = self.lock();
        let mut applied = AppliedOutcomes::default();

        let before = state.operations.len();
        state.operations.retain(|op| !succeeded.contains(&op.id));
        applied.removed = before - state.operations.len();

        for (id, error) in failed {
            match self.fail_one(&mut state, *id, error) {
                FailureOutcome::Retry(count) => {
                    applied.retried += 1;
                    applied.max_retry_count = applied.max_retry_count.max(Some(count));
                }
                FailureOutcome::Evicted => applied.evicted += 1,
                FailureOutcome::Missing => {}
            }
        }

        self.persist(&state);
        if applied.evicted > 0 {
            self.persist_dead_letters(&state);
        }
        applied
    }

    fn fail_one(&self, state: &mut LogState, id: Uuid, error: &str) -> FailureOutcome {
        let Some(pos) = state.operations.iter().position(|op| op.id == id) else {
            return FailureOutcome::Missing;
        };

        state.operations[pos].retry_count += 1;
        let count = state.operations[pos].retry_count;

        if count >= self.max_retries {
            let operation = state.operations.remove(pos);
            tracing::warn!(
                "Dropping {} for {} after {} failed attempts: {}",
                operation.op,
                operation.local_id,
                count,
                error
            );
            state.dead_letters.push(DeadLetter {
                operation,
                evicted_at: self.clock.now(),
                last_error: Some(error.to_string()),
            });
            FailureOutcome::Evicted
        } else {
            FailureOutcome::Retry(count)
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead_letters.clone()
    }

    pub fn clear_dead_letters(&self) {
        let mut state = self.lock();
        state.dead_letters.clear();
        self.persist_dead_letters(&state);
    }
}

#[derive(Serialize)]
struct QueueDocumentRef<'a> {
    operations: &'a [SyncOperation],
}
