//! Drains the operation log against the remote service.
//!
//! Entities with a registered [`OperationExecutor`] are replayed one
//! operation at a time in enqueue order. Everything else goes out through
//! the batch endpoint. Only one drain runs at a time; overlapping triggers
//! (enqueue, reconnect, retry timer) return immediately as skipped.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::context::{SkipReason, SyncContext};
use super::operation::{EntityKind, NewOperation, SyncOperation};
use super::oplog::{AppliedOutcomes, FailureOutcome};
use super::remote::RemoteError;
use super::retry::RetryScheduler;

/// Replays one queued operation for the entity that owns it.
#[async_trait]
pub trait OperationExecutor: Send + Sync {
    async fn execute(&self, operation: &SyncOperation) -> Result<(), RemoteError>;
}

/// Summary of one drain pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub skipped: Option<SkipReason>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub evicted: usize,
    pub remaining: usize,
}

impl DrainReport {
    fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    fn absorb(&mut self, applied: &AppliedOutcomes) {
        self.succeeded += applied.removed;
        self.failed += applied.retried;
        self.evicted += applied.evicted;
    }
}

/// The queue processor. Construct with [`QueueProcessor::new`]; it is always
/// handled through an `Arc`.
pub struct QueueProcessor {
    ctx: SyncContext,
    scheduler: RetryScheduler,
    executors: RwLock<BTreeMap<EntityKind, Weak<dyn OperationExecutor>>>,
    drain_lock: tokio::sync::Mutex<()>,
    this: Weak<QueueProcessor>,
}

impl QueueProcessor {
    pub fn new(ctx: SyncContext) -> Arc<Self> {
        let scheduler = RetryScheduler::new(ctx.settings.backoff());
        Arc::new_cyclic(|this| Self {
            ctx,
            scheduler,
            executors: RwLock::new(BTreeMap::new()),
            drain_lock: tokio::sync::Mutex::new(()),
            this: this.clone(),
        })
    }

    pub fn context(&self) -> &SyncContext {
        &self.ctx
    }

    pub fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }

    /// Routes an entity's operations through `executor` instead of the batch
    /// endpoint. The processor keeps only a weak reference.
    pub fn register_executor(&self, entity: EntityKind, executor: Weak<dyn OperationExecutor>) {
        self.executors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entity, executor);
    }

    fn live_executors(&self) -> BTreeMap<EntityKind, Arc<dyn OperationExecutor>> {
        self.executors
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(|(entity, weak)| weak.upgrade().map(|exec| (*entity, exec)))
            .collect()
    }

    /// Appends an operation and, if the remote is reachable, arms a retry so
    /// it goes out shortly.
    pub fn enqueue(&self, new: NewOperation) -> SyncOperation {
        let operation = self.ctx.log.append(new);
        if self.ctx.can_reach_remote() && !self.scheduler.is_armed() {
            self.schedule_retry(0);
        }
        operation
    }

    /// Starts a drain in the background. Used for reconnect notifications;
    /// redundant triggers are absorbed by the drain lock.
    pub fn trigger_drain(&self) -> JoinHandle<()> {
        let this = self.this.clone();
        tokio::spawn(async move {
            if let Some(processor) = this.upgrade() {
                processor.drain().await;
            }
        })
    }

    fn schedule_retry(&self, retry_count: u32) {
        let this = self.this.clone();
        self.scheduler.schedule(retry_count, move || async move {
            if let Some(processor) = this.upgrade() {
                processor.drain().await;
            }
        });
    }

    /// Processes as much of the log as the current state allows.
    pub async fn drain(&self) -> DrainReport {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            tracing::debug!("Drain already running, skipping");
            return DrainReport::skipped(SkipReason::AlreadyRunning);
        };

        if let Some(reason) = self.ctx.blocked_by() {
            tracing::debug!("Drain skipped: {:?}", reason);
            return DrainReport::skipped(reason);
        }

        if !self.ctx.log.has_pending() {
            self.scheduler.cancel();
            return DrainReport::default();
        }

        let executors = self.live_executors();
        let mut report = DrainReport::default();
        let mut max_retry: Option<u32> = None;

        for (entity, executor) in &executors {
            self.drain_entity(*entity, executor.as_ref(), &mut report, &mut max_retry)
                .await;
        }

        self.drain_batches(&executors, &mut report, &mut max_retry)
            .await;

        report.remaining = self.ctx.log.len();
        if report.remaining > 0 {
            self.schedule_retry(max_retry.unwrap_or(0));
        } else {
            self.scheduler.cancel();
        }

        tracing::info!(
            "Drain finished: {} ok, {} failed, {} dropped, {} pending",
            report.succeeded,
            report.failed,
            report.evicted,
            report.remaining
        );
        report
    }

    /// Executor mode: sequential, no fail-fast.
    async fn drain_entity(
        &self,
        entity: EntityKind,
        executor: &dyn OperationExecutor,
        report: &mut DrainReport,
        max_retry: &mut Option<u32>,
    ) {
        for operation in self.ctx.log.list_pending(Some(entity)) {
            // A store may have purged it while an earlier operation was in flight.
            if self.ctx.log.get(operation.id).is_none() {
                continue;
            }

            report.attempted += 1;
            match self.ctx.call(executor.execute(&operation)).await {
                Ok(()) => {
                    self.ctx.log.remove(operation.id);
                    report.succeeded += 1;
                }
                Err(e) if e.is_not_found() && operation.op.resolves_on_not_found() => {
                    tracing::debug!("{} for {} already applied", operation.op, operation.local_id);
                    self.ctx.log.remove(operation.id);
                    report.succeeded += 1;
                }
                Err(e) => {
                    tracing::debug!("{} for {} failed: {}", operation.op, operation.local_id, e);
                    match self.ctx.log.record_failure(operation.id, &e.to_string()) {
                        FailureOutcome::Retry(count) => {
                            report.failed += 1;
                            *max_retry = (*max_retry).max(Some(count));
                        }
                        FailureOutcome::Evicted => report.evicted += 1,
                        FailureOutcome::Missing => {}
                    }
                }
            }
        }
    }

    /// Batch mode for entities without an executor.
    async fn drain_batches(
        &self,
        executors: &BTreeMap<EntityKind, Arc<dyn OperationExecutor>>,
        report: &mut DrainReport,
        max_retry: &mut Option<u32>,
    ) {
        loop {
            let batch: Vec<SyncOperation> = self
                .ctx
                .log
                .list_pending(None)
                .into_iter()
                .filter(|op| !executors.contains_key(&op.entity()))
                .take(self.ctx.settings.batch_size)
                .collect();

            if batch.is_empty() {
                return;
            }

            report.attempted += batch.len();
            let applied = match self.ctx.call(self.ctx.remote.submit_batch(&batch)).await {
                Ok(outcome) => {
                    let by_id: HashMap<Uuid, &SyncOperation> =
                        batch.iter().map(|op| (op.id, op)).collect();

                    let mut succeeded: Vec<Uuid> = outcome
                        .succeeded
                        .into_iter()
                        .filter(|id| by_id.contains_key(id))
                        .collect();
                    let mut failed = Vec::new();

                    for failure in outcome.failed {
                        let Some(op) = by_id.get(&failure.id) else {
                            continue;
                        };
                        if failure.is_not_found() && op.op.resolves_on_not_found() {
                            succeeded.push(failure.id);
                        } else {
                            let message = failure
                                .error
                                .clone()
                                .or_else(|| failure.status.map(|s| format!("status {}", s)))
                                .unwrap_or_else(|| "rejected".to_string());
                            failed.push((failure.id, message));
                        }
                    }

                    let answered: HashSet<Uuid> = succeeded
                        .iter()
                        .copied()
                        .chain(failed.iter().map(|(id, _)| *id))
                        .collect();
                    for op in batch.iter().filter(|op| !answered.contains(&op.id)) {
                        tracing::warn!("Batch response omitted {} for {}", op.op, op.local_id);
                        failed.push((op.id, "missing from batch response".to_string()));
                    }

                    self.ctx.log.apply_outcomes(&succeeded, &failed)
                }
                Err(e) => {
                    tracing::warn!("Batch submit of {} operation(s) failed: {}", batch.len(), e);
                    let message = e.to_string();
                    let failed: Vec<(Uuid, String)> =
                        batch.iter().map(|op| (op.id, message.clone())).collect();
                    self.ctx.log.apply_outcomes(&[], &failed)
                }
            };

            report.absorb(&applied);
            *max_retry = (*max_retry).max(applied.max_retry_count);

            // Keep going only while whole batches clear.
            if applied.removed < batch.len() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::storage::DocumentStorage;
    use crate::sync::connectivity::Connectivity;
    use crate::sync::context::{CredentialFlag, SyncSettings};
    use crate::sync::fake::FakeRemote;
    use crate::sync::operation::{MoodOp, Mutation, SessionOp};
    use crate::sync::oplog::OperationLog;
    use crate::sync::remote::BatchFailure;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        processor: Arc<QueueProcessor>,
        remote: FakeRemote,
        connectivity: Connectivity,
        credentials: Arc<CredentialFlag>,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let clock: Arc<dyn Clock> =
            Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()));
        let settings = SyncSettings::default();
        let log = OperationLog::open(
            DocumentStorage::new(dir.path().to_path_buf()),
            clock.clone(),
            settings.max_retries,
        )
        .unwrap();
        let remote = FakeRemote::new();
        let connectivity = Connectivity::new(true);
        let credentials = Arc::new(CredentialFlag::new(true));

        let ctx = SyncContext {
            log: Arc::new(log),
            remote: Arc::new(remote.clone()),
            connectivity: connectivity.clone(),
            credentials: credentials.clone(),
            clock,
            settings,
        };

        Harness {
            processor: QueueProcessor::new(ctx),
            remote,
            connectivity,
            credentials,
            _dir: dir,
        }
    }

    fn session(local_id: &str) -> NewOperation {
        NewOperation::new(Mutation::Session(SessionOp::Create), local_id)
    }

    /// Executor that fails operations whose local id is listed.
    #[derive(Default)]
    struct ScriptedExecutor {
        fail: Mutex<Vec<String>>,
        not_found: Mutex<Vec<String>>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OperationExecutor for ScriptedExecutor {
        async fn execute(&self, operation: &SyncOperation) -> Result<(), RemoteError> {
            self.seen.lock().unwrap().push(operation.local_id.clone());
            if self.not_found.lock().unwrap().contains(&operation.local_id) {
                return Err(RemoteError::NotFound);
            }
            if self.fail.lock().unwrap().contains(&operation.local_id) {
                return Err(RemoteError::Status(500));
            }
            Ok(())
        }
    }

    fn register(h: &Harness, exec: &Arc<ScriptedExecutor>) {
        let weak: Weak<dyn OperationExecutor> = Arc::downgrade(exec) as Weak<dyn OperationExecutor>;
        h.processor.register_executor(EntityKind::Mood, weak);
    }

    #[tokio::test]
    async fn test_drain_empty_log_is_noop() {
        let h = harness();
        let report = h.processor.drain().await;
        assert_eq!(report, DrainReport::default());
        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_drain_skipped_offline_or_without_credential() {
        let h = harness();
        h.processor.context().log.append(session("s"));

        h.connectivity.set_online(false);
        assert_eq!(h.processor.drain().await.skipped, Some(SkipReason::Offline));

        h.connectivity.set_online(true);
        h.credentials.set(false);
        assert_eq!(h.processor.drain().await.skipped, Some(SkipReason::NoCredential));

        assert!(h.remote.calls().is_empty());
        assert_eq!(h.processor.context().log.len(), 1);
    }

    #[tokio::test]
    async fn test_batch_success_empties_log() {
        let h = harness();
        let log = &h.processor.context().log;
        log.append(session("a"));
        log.append(session("b"));

        let report = h.processor.drain().await;
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.remaining, 0);
        assert!(log.is_empty());
        assert!(!h.processor.scheduler().is_armed());

        // Draining again removes nothing further.
        let again = h.processor.drain().await;
        assert_eq!(again.succeeded, 0);
        assert_eq!(h.remote.batch_calls(), 1);
    }

    #[tokio::test]
    async fn test_batch_partial_failure_increments_and_rearms() {
        let h = harness();
        let log = &h.processor.context().log;
        let ok = log.append(session("a"));
        let bad = log.append(session("b"));
        h.remote.fail_batch_op(BatchFailure {
            id: bad.id,
            status: Some(500),
            error: None,
        });

        let report = h.processor.drain().await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert!(log.get(ok.id).is_none());
        assert_eq!(log.get(bad.id).map(|o| o.retry_count), Some(1));
        assert!(h.processor.scheduler().is_armed());
    }

    #[tokio::test]
    async fn test_batch_omission_counts_toward_eviction() {
        let h = harness();
        let log = &h.processor.context().log;
        let ok = log.append(session("a"));
        let lost = log.append(session("b"));
        h.remote.omit_from_batch(lost.id);

        let report = h.processor.drain().await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert!(log.get(ok.id).is_none());
        assert_eq!(log.get(lost.id).map(|o| o.retry_count), Some(1));

        for _ in 0..3 {
            h.processor.drain().await;
        }
        let report = h.processor.drain().await;
        assert_eq!(report.evicted, 1);
        assert!(log.get(lost.id).is_none());
        assert_eq!(
            log.dead_letters()[0].last_error.as_deref(),
            Some("missing from batch response")
        );
    }

    #[tokio::test]
    async fn test_batch_transport_failure_increments_every_operation() {
        let h = harness();
        let log = &h.processor.context().log;
        log.append(session("a"));
        log.append(session("b"));
        h.remote.fail_with(RemoteError::Transport("connection reset".into()));

        let report = h.processor.drain().await;
        assert_eq!(report.failed, 2);
        assert!(log.list_pending(None).iter().all(|op| op.retry_count == 1));
    }

    #[tokio::test]
    async fn test_batch_not_found_on_delete_is_success() {
        let h = harness();
        let log = &h.processor.context().log;
        let del = log.append(
            NewOperation::new(Mutation::Mood(MoodOp::Delete), "m").with_server_id(Some("srv".into())),
        );
        h.remote.fail_batch_op(BatchFailure {
            id: del.id,
            status: Some(404),
            error: None,
        });

        let report = h.processor.drain().await;
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_batch_size_is_bounded() {
        let h = harness();
        let log = &h.processor.context().log;
        for i in 0..120 {
            log.append(session(&format!("s{}", i)));
        }

        let report = h.processor.drain().await;
        assert_eq!(report.succeeded, 120);
        assert_eq!(h.remote.batch_sizes(), vec![50, 50, 20]);
    }

    #[tokio::test]
    async fn test_eviction_after_repeated_batch_failures() {
        let h = harness();
        let log = &h.processor.context().log;
        let op = log.append(session("a"));
        h.remote.fail_with(RemoteError::Status(503));

        for _ in 0..4 {
            h.processor.drain().await;
            assert!(log.get(op.id).is_some());
        }
        let report = h.processor.drain().await;
        assert_eq!(report.evicted, 1);
        assert!(log.get(op.id).is_none());
        assert_eq!(log.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn test_executor_mode_continues_past_failures() {
        let h = harness();
        let exec = Arc::new(ScriptedExecutor::default());
        exec.fail.lock().unwrap().push("b".to_string());
        register(&h, &exec);

        let log = &h.processor.context().log;
        log.append(NewOperation::new(Mutation::Mood(MoodOp::Create), "a"));
        let bad = log.append(NewOperation::new(Mutation::Mood(MoodOp::Create), "b"));
        log.append(NewOperation::new(Mutation::Mood(MoodOp::Create), "c"));

        let report = h.processor.drain().await;
        assert_eq!(*exec.seen.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(log.list_pending(None).len(), 1);
        assert_eq!(log.get(bad.id).map(|o| o.retry_count), Some(1));
        // Executor-owned entities never go through the batch endpoint.
        assert_eq!(h.remote.batch_calls(), 0);
    }

    #[tokio::test]
    async fn test_executor_not_found_on_update_is_success() {
        let h = harness();
        let exec = Arc::new(ScriptedExecutor::default());
        exec.not_found.lock().unwrap().push("gone".to_string());
        register(&h, &exec);

        let log = &h.processor.context().log;
        let update = log.append(
            NewOperation::new(Mutation::Mood(MoodOp::Update), "gone").with_server_id(Some("s".into())),
        );
        let create = log.append(NewOperation::new(Mutation::Mood(MoodOp::Create), "gone"));

        let report = h.processor.drain().await;
        assert_eq!(report.succeeded, 1);
        assert!(log.get(update.id).is_none());
        // A create that hits 404 is a real failure.
        assert_eq!(log.get(create.id).map(|o| o.retry_count), Some(1));
    }

    #[tokio::test]
    async fn test_executor_eviction_after_max_retries() {
        let h = harness();
        let exec = Arc::new(ScriptedExecutor::default());
        exec.fail.lock().unwrap().push("a".to_string());
        register(&h, &exec);

        let log = &h.processor.context().log;
        let op = log.append(NewOperation::new(Mutation::Mood(MoodOp::Create), "a"));

        for attempt in 1..5 {
            h.processor.drain().await;
            assert_eq!(log.get(op.id).map(|o| o.retry_count), Some(attempt));
        }
        h.processor.drain().await;
        assert!(log.get(op.id).is_none());
    }

    #[tokio::test]
    async fn test_dropped_executor_leaves_operations_for_batch() {
        let h = harness();
        {
            let exec = Arc::new(ScriptedExecutor::default());
            register(&h, &exec);
        }
        h.processor
            .context()
            .log
            .append(NewOperation::new(Mutation::Mood(MoodOp::Create), "a"));

        h.processor.drain().await;
        assert_eq!(h.remote.batch_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_drains_collapse() {
        let h = harness();
        h.processor.context().log.append(session("a"));
        h.remote.set_delay(Duration::from_millis(200));

        let (first, second) = tokio::join!(h.processor.drain(), h.processor.drain());
        let skipped = [first.skipped, second.skipped]
            .iter()
            .filter(|s| **s == Some(SkipReason::AlreadyRunning))
            .count();
        assert_eq!(skipped, 1);
        assert_eq!(h.remote.batch_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_remote_call_times_out() {
        let h = harness();
        let log = &h.processor.context().log;
        log.append(session("a"));
        h.remote.set_delay(Duration::from_secs(3600));

        let report = h.processor.drain().await;
        assert_eq!(report.failed, 1);
        assert_eq!(log.list_pending(None)[0].retry_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_timer_drains_after_recovery() {
        let h = harness();
        let log = h.processor.context().log.clone();
        log.append(session("a"));
        h.remote.fail_with(RemoteError::Status(502));

        h.processor.drain().await;
        assert!(h.processor.scheduler().is_armed());

        h.remote.recover();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_trigger_drain_runs_in_background() {
        let h = harness();
        let log = h.processor.context().log.clone();
        log.append(session("a"));

        h.processor.trigger_drain().await.unwrap();
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_arms_retry_when_reachable() {
        let h = harness();
        h.processor.enqueue(session("a"));
        assert!(h.processor.scheduler().is_armed());
        h.processor.scheduler().cancel();

        h.connectivity.set_online(false);
        h.processor.enqueue(session("b"));
        assert!(!h.processor.scheduler().is_armed());
        assert_eq!(h.processor.context().log.len(), 2);
    }
}
