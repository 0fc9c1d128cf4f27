//! The shape shared by every locally-authored, server-backed record.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::operation::EntityKind;
use super::remote::Collection;
use crate::storage::DocKind;

/// Identity and sync state of a record.
///
/// `local_id` is minted on the device and never changes. `server_id` is set
/// once the server has accepted the record. `is_synced` is true only when the
/// local copy is known to match the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMeta {
    pub local_id: String,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub is_synced: bool,
}

impl SyncMeta {
    /// Metadata for a record created on this device and not yet sent anywhere.
    pub fn new_local() -> Self {
        Self {
            local_id: mint_local_id(),
            server_id: None,
            is_synced: false,
        }
    }

    /// Metadata for a record that mirrors a server copy.
    pub fn synced(local_id: String, server_id: String) -> Self {
        Self {
            local_id,
            server_id: Some(server_id),
            is_synced: true,
        }
    }

    /// A record that has never reached the server. Reconciliation must keep it.
    pub fn is_pending_create(&self) -> bool {
        self.server_id.is_none() && !self.is_synced
    }
}

/// Mints a new client-side record id.
pub fn mint_local_id() -> String {
    Uuid::new_v4().to_string()
}

/// A record type that lives in an entity store and mirrors a server collection.
pub trait SyncRecord: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The server's representation of this record.
    type Remote: DeserializeOwned + Send;

    /// Store that owns queued operations for this record type.
    const ENTITY: EntityKind;
    /// Remote collection the record belongs to.
    const COLLECTION: Collection;
    /// Local document the collection is persisted in.
    const DOC: DocKind;

    fn meta(&self) -> &SyncMeta;
    fn meta_mut(&mut self) -> &mut SyncMeta;

    /// Timestamp the collection is ordered by (newest first).
    fn recency(&self) -> DateTime<Utc>;

    /// Server id carried by the remote representation.
    fn remote_id(remote: &Self::Remote) -> &str;

    /// Builds the local record for a server copy.
    ///
    /// `local` is the existing local record with the same server id, if any;
    /// local-only state must be carried over from it.
    fn from_remote(remote: Self::Remote, local_id: String, local: Option<&Self>) -> Self;

    /// Request body for create and update calls.
    fn to_body(&self) -> serde_json::Value;

    fn local_id(&self) -> &str {
        &self.meta().local_id
    }

    fn server_id(&self) -> Option<&str> {
        self.meta().server_id.as_deref()
    }

    fn is_synced(&self) -> bool {
        self.meta().is_synced
    }

    fn mark_synced(&mut self, server_id: String) {
        let meta = self.meta_mut();
        meta.server_id = Some(server_id);
        meta.is_synced = true;
    }

    fn mark_dirty(&mut self) {
        self.meta_mut().is_synced = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_local_is_pending_create() {
        let meta = SyncMeta::new_local();
        assert!(meta.is_pending_create());
        assert!(!meta.local_id.is_empty());
    }

    #[test]
    fn test_synced_is_not_pending_create() {
        let meta = SyncMeta::synced("l1".to_string(), "s1".to_string());
        assert!(!meta.is_pending_create());
        assert_eq!(meta.server_id.as_deref(), Some("s1"));
    }

    #[test]
    fn test_local_ids_are_unique() {
        assert_ne!(mint_local_id(), mint_local_id());
    }

    #[test]
    fn test_meta_defaults_when_fields_missing() {
        let meta: SyncMeta = serde_json::from_str(r#"{"local_id":"abc"}"#).unwrap();
        assert!(meta.is_pending_create());
    }
}
