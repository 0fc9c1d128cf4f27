//! Shared fixture for store tests.

use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use crate::clock::ManualClock;
use crate::storage::DocumentStorage;
use crate::sync::fake::FakeRemote;
use crate::sync::{
    Connectivity, CredentialFlag, OperationLog, QueueProcessor, SyncContext, SyncSettings,
};

pub(crate) struct Harness {
    pub queue: Arc<QueueProcessor>,
    pub remote: FakeRemote,
    pub connectivity: Connectivity,
    pub credentials: Arc<CredentialFlag>,
    pub clock: Arc<ManualClock>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(online: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
        ));
        let settings = SyncSettings::default();
        let log = OperationLog::open(
            DocumentStorage::new(dir.path().to_path_buf()),
            clock.clone(),
            settings.max_retries,
        )
        .unwrap();
        let remote = FakeRemote::new();
        let connectivity = Connectivity::new(online);
        let credentials = Arc::new(CredentialFlag::new(true));

        let ctx = SyncContext {
            log: Arc::new(log),
            remote: Arc::new(remote.clone()),
            connectivity: connectivity.clone(),
            credentials: credentials.clone(),
            clock: clock.clone(),
            settings,
        };

        Self {
            queue: QueueProcessor::new(ctx),
            remote,
            connectivity,
            credentials,
            clock,
            dir,
        }
    }

    pub fn storage(&self) -> DocumentStorage {
        DocumentStorage::new(self.dir.path().to_path_buf())
    }

    pub fn log(&self) -> &OperationLog {
        &self.queue.context().log
    }
}
