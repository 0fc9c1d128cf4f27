//! Offline-first sync engine.
//!
//! Local writes land in the entity stores immediately. Anything that has to
//! reach the server is recorded in the durable [`OperationLog`] and replayed
//! by the [`QueueProcessor`] when the device is online and holds a valid
//! credential.
//!
//! ## Flow
//!
//! 1. A store mutates its local collection and persists it
//! 2. If the remote is reachable the call is made directly; otherwise (or on
//!    failure) a [`NewOperation`] is enqueued
//! 3. The processor drains the log on enqueue, on reconnect, and when the
//!    retry timer fires
//! 4. After a reconnect each store reconciles against the server snapshot

mod connectivity;
mod context;
mod merge;
mod operation;
mod oplog;
mod processor;
mod record;
mod remote;
mod retry;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use connectivity::{Connectivity, Reconnections};
pub use context::{CredentialFlag, Credentials, SkipReason, SyncContext, SyncSettings};
pub use merge::{fetch_snapshot, merge_collections, ReconcileReport};
pub use operation::{
    CompletionOp, EntityKind, JournalOp, MoodOp, Mutation, NewOperation, RitualOp, SessionOp,
    SyncOperation,
};
pub use oplog::{AppliedOutcomes, DeadLetter, FailureOutcome, OperationLog};
pub use processor::{DrainReport, OperationExecutor, QueueProcessor};
pub use record::{mint_local_id, SyncMeta, SyncRecord};
pub use remote::{
    check_server, BatchFailure, BatchOutcome, Collection, HttpRemote, RemoteAction, RemoteError,
    RemoteService,
};
pub use retry::{Backoff, RetryScheduler};
