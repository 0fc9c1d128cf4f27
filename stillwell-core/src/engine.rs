//! Assembles the sync engine: one operation log and queue processor shared by
//! the mood, journal and ritual stores, plus the task that reacts to
//! reconnects.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::storage::DocumentStorage;
use crate::stores::{JournalStore, MoodStore, RitualStore, StoreError};
use crate::sync::{
    Connectivity, Credentials, DeadLetter, DrainReport, EntityKind, OperationLog, QueueProcessor,
    ReconcileReport, RemoteService, SyncContext, SyncSettings,
};

/// Result of an explicit sync: one drain, then a reconcile of every
/// collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub drain: DrainReport,
    pub reconciled: Vec<(EntityKind, ReconcileReport)>,
}

/// Point-in-time view of the engine for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub online: bool,
    pub has_credential: bool,
    pub retry_armed: bool,
    /// Queued operations per entity, only entities with at least one.
    pub pending: Vec<(EntityKind, usize)>,
    pub dead_letters: usize,
    /// Local records not known to match the server.
    pub unsynced_records: usize,
}

impl SyncStatus {
    pub fn pending_total(&self) -> usize {
        self.pending.iter().map(|(_, n)| n).sum()
    }
}

#[derive(Clone)]
struct Stores {
    queue: Arc<QueueProcessor>,
    moods: Arc<MoodStore>,
    journal: Arc<JournalStore>,
    rituals: Arc<RitualStore>,
}

impl Stores {
    async fn reconcile_all(&self) -> Vec<(EntityKind, ReconcileReport)> {
        let moods = self.moods.reconcile().await;
        let journal = self.journal.reconcile().await;
        let rituals = self.rituals.reconcile().await;

        vec![
            (EntityKind::Mood, moods),
            (EntityKind::Journal, journal),
            (EntityKind::Ritual, rituals.rituals),
            (EntityKind::Completion, rituals.completions),
        ]
    }
}

pub struct SyncEngine {
    stores: Stores,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Opens the log and every store under `data_dir`.
    ///
    /// Nothing runs in the background until [`SyncEngine::start`].
    pub fn open(
        data_dir: PathBuf,
        settings: SyncSettings,
        remote: Arc<dyn RemoteService>,
        credentials: Arc<dyn Credentials>,
        clock: Arc<dyn Clock>,
        connectivity: Connectivity,
    ) -> Result<Self, StoreError> {
        let storage = DocumentStorage::new(data_dir);
        let log = OperationLog::open(storage.clone(), clock.clone(), settings.max_retries)?;
        tracing::debug!(
            "Opened sync engine at {} with {} pending operation(s)",
            storage.data_dir().display(),
            log.len()
        );

        let queue = QueueProcessor::new(SyncContext {
            log: Arc::new(log),
            remote,
            connectivity,
            credentials,
            clock,
            settings,
        });

        let stores = Stores {
            moods: MoodStore::open(queue.clone(), storage.clone())?,
            journal: JournalStore::open(queue.clone(), storage.clone())?,
            rituals: RitualStore::open(queue.clone(), storage)?,
            queue,
        };

        Ok(Self {
            stores,
            watcher: Mutex::new(None),
        })
    }

    /// Spawns the sync task. It runs one drain and reconcile right away
    /// (skipped when offline or without a credential), then repeats them on
    /// each `false -> true` edge. Must be called from within a Tokio runtime;
    /// calling it again is a no-op.
    pub fn start(&self) {
        let mut watcher = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if watcher.is_some() {
            return;
        }

        let stores = self.stores.clone();
        let mut reconnections = self.connectivity().reconnections();
        *watcher = Some(tokio::spawn(async move {
            if stores.queue.context().can_reach_remote() {
                tracing::debug!("Initial sync");
                stores.queue.drain().await;
                stores.reconcile_all().await;
            }
            while reconnections.next().await.is_some() {
                tracing::info!("Connectivity restored, syncing");
                stores.queue.drain().await;
                stores.reconcile_all().await;
            }
        }));
    }

    pub fn queue(&self) -> &Arc<QueueProcessor> {
        &self.stores.queue
    }

    pub fn log(&self) -> &OperationLog {
        &self.stores.queue.context().log
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.stores.queue.context().connectivity
    }

    pub fn moods(&self) -> &Arc<MoodStore> {
        &self.stores.moods
    }

    pub fn journal(&self) -> &Arc<JournalStore> {
        &self.stores.journal
    }

    pub fn rituals(&self) -> &Arc<RitualStore> {
        &self.stores.rituals
    }

    pub async fn reconcile_all(&self) -> Vec<(EntityKind, ReconcileReport)> {
        self.stores.reconcile_all().await
    }

    /// Drains the queue, then reconciles every collection.
    pub async fn sync_now(&self) -> SyncSummary {
        let drain = self.stores.queue.drain().await;
        let reconciled = self.stores.reconcile_all().await;
        SyncSummary { drain, reconciled }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.log().dead_letters()
    }

    pub fn status(&self) -> SyncStatus {
        let ctx = self.stores.queue.context();
        let pending = EntityKind::ALL
            .iter()
            .map(|entity| (*entity, ctx.log.list_pending(Some(*entity)).len()))
            .filter(|(_, n)| *n > 0)
            .collect();

        SyncStatus {
            online: ctx.connectivity.is_online(),
            has_credential: ctx.credentials.has_valid_credential(),
            retry_armed: self.stores.queue.scheduler().is_armed(),
            pending,
            dead_letters: ctx.log.dead_letters().len(),
            unsynced_records: self.stores.moods.unsynced_count()
                + self.stores.journal.unsynced_count()
                + self.stores.rituals.unsynced_count(),
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        let watcher = self.watcher.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = watcher.take() {
            handle.abort();
        }
    }
}
