//! Dependencies shared by the queue processor and the entity stores.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::connectivity::Connectivity;
use super::oplog::OperationLog;
use super::remote::{RemoteError, RemoteService};
use super::retry::Backoff;
use crate::clock::Clock;

/// Tunables for the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Failed attempts after which an operation is dropped.
    pub max_retries: u32,
    /// Operations per batch submit.
    pub batch_size: usize,
    /// Records fetched per collection during reconciliation.
    pub fetch_limit: usize,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Upper bound for any single remote call.
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_retries: 5,
            batch_size: 50,
            fetch_limit: 500,
            backoff_base_ms: 1000,
            backoff_cap_ms: 60_000,
            request_timeout_secs: 30,
        }
    }
}

impl SyncSettings {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.backoff_base_ms),
            cap: Duration::from_millis(self.backoff_cap_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Whether we hold a usable access credential.
pub trait Credentials: Send + Sync {
    fn has_valid_credential(&self) -> bool;
}

/// A credential flag flipped by whatever owns authentication.
#[derive(Debug, Default)]
pub struct CredentialFlag(AtomicBool);

impl CredentialFlag {
    pub fn new(valid: bool) -> Self {
        Self(AtomicBool::new(valid))
    }

    pub fn set(&self, valid: bool) {
        self.0.store(valid, Ordering::SeqCst);
    }
}

impl Credentials for CredentialFlag {
    fn has_valid_credential(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a drain or reconciliation did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    NoCredential,
    AlreadyRunning,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Offline => write!(f, "offline"),
            SkipReason::NoCredential => write!(f, "no credential"),
            SkipReason::AlreadyRunning => write!(f, "already running"),
        }
    }
}

/// Handles shared by every sync participant.
#[derive(Clone)]
pub struct SyncContext {
    pub log: Arc<OperationLog>,
    pub remote: Arc<dyn RemoteService>,
    pub connectivity: Connectivity,
    pub credentials: Arc<dyn Credentials>,
    pub clock: Arc<dyn Clock>,
    pub settings: SyncSettings,
}

impl SyncContext {
    /// Returns the reason remote work cannot run right now, if any.
    pub fn blocked_by(&self) -> Option<SkipReason> {
        if !self.credentials.has_valid_credential() {
            Some(SkipReason::NoCredential)
        } else if !self.connectivity.is_online() {
            Some(SkipReason::Offline)
        } else {
            None
        }
    }

    pub fn can_reach_remote(&self) -> bool {
        self.blocked_by().is_none()
    }

    /// Runs a remote call bounded by the request timeout.
    pub async fn call<T, F>(&self, fut: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        match tokio::time::timeout(self.settings.request_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout),
        }
    }
}
