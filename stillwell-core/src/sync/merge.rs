//! Reconciliation: fold the server's snapshot together with local records
//! that have not reached the server yet.
//!
//! Policy is server-wins-on-fetch for synced records the server knows about,
//! and client-wins-until-synced for everything else: records the server has
//! never seen and local edits of server records that are still queued.

use std::collections::HashMap;

use super::context::{SkipReason, SyncContext};
use super::record::{mint_local_id, SyncRecord};
use super::remote::RemoteError;

/// Outcome of one reconciliation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub skipped: Option<SkipReason>,
    pub error: Option<RemoteError>,
    /// Records in the server snapshot.
    pub server_records: usize,
    /// Never-synced local records carried into the result.
    pub local_pending: usize,
    pub total: usize,
}

impl ReconcileReport {
    pub fn skipped(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::default()
        }
    }

    pub fn failed(error: RemoteError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_applied(&self) -> bool {
        self.skipped.is_none() && self.error.is_none()
    }
}

/// Merges a server snapshot with the local collection.
///
/// Server records reuse the local id of the local record with the same
/// server id (keeping its local-only state) or get a fresh one. A local record
/// with that server id that is not synced carries an unsent edit and is kept
/// as it is. Local records with no server id that are not synced are appended
/// unchanged. The result is sorted newest first.
pub fn merge_collections<R: SyncRecord>(remote: Vec<R::Remote>, local: &[R]) -> Vec<R> {
    let by_server_id: HashMap<&str, &R> = local
        .iter()
        .filter_map(|r| r.server_id().map(|id| (id, r)))
        .collect();

    let mut merged: Vec<R> = remote
        .into_iter()
        .map(|remote| {
            let existing = by_server_id.get(R::remote_id(&remote)).copied();
            if let Some(dirty) = existing.filter(|r| !r.is_synced()) {
                return dirty.clone();
            }
            let local_id = existing
                .map(|r| r.local_id().to_string())
                .unwrap_or_else(mint_local_id);
            R::from_remote(remote, local_id, existing)
        })
        .collect();

    merged.extend(
        local
            .iter()
            .filter(|r| r.meta().is_pending_create())
            .cloned(),
    );

    merged.sort_by(|a, b| b.recency().cmp(&a.recency()));
    merged
}

/// Fetches and decodes the server's copy of a collection.
///
/// Any record that fails to decode fails the whole fetch so a partial
/// snapshot is never merged.
pub async fn fetch_snapshot<R: SyncRecord>(ctx: &SyncContext) -> Result<Vec<R::Remote>, RemoteError> {
    let raw = ctx
        .call(ctx.remote.fetch(R::COLLECTION, ctx.settings.fetch_limit))
        .await?;

    raw.into_iter()
        .map(|value| {
            serde_json::from_value::<R::Remote>(value).map_err(|e| RemoteError::Decode(e.to_string()))
        })
        .collect()
}
