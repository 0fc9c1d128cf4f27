//! JSON document storage for persisting the queue and entity collections to disk.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Documents that can be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocKind {
    SyncQueue,
    DeadLetters,
    Moods,
    Journal,
    Rituals,
    Completions,
}

impl DocKind {
    /// Returns the filename for this document.
    pub fn filename(&self) -> &'static str {
        match self {
            DocKind::SyncQueue => "sync_queue.json",
            DocKind::DeadLetters => "dead_letters.json",
            DocKind::Moods => "moods.json",
            DocKind::Journal => "journal.json",
            DocKind::Rituals => "rituals.json",
            DocKind::Completions => "completions.json",
        }
    }
}

/// Storage for flat JSON documents.
///
/// Each document is rewritten in full on every save.
#[derive(Debug, Clone)]
pub struct DocumentStorage {
    data_dir: PathBuf,
}

impl DocumentStorage {
    /// Creates a new storage instance rooted at `data_dir`.
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Returns the full path for a document.
    pub fn path(&self, kind: DocKind) -> PathBuf {
        self.data_dir.join(kind.filename())
    }

    /// Checks if a document exists on disk.
    pub fn exists(&self, kind: DocKind) -> bool {
        self.path(kind).exists()
    }

    /// Loads a document from disk.
    ///
    /// Returns `Ok(None)` if the file doesn't exist.
    pub fn load<T: DeserializeOwned>(&self, kind: DocKind) -> Result<Option<T>, StorageError> {
        let path = self.path(kind);

        match fs::read(&path) {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| StorageError::Decode(path, e))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io(path, e)),
        }
    }

    /// Loads a document or returns the default value if it doesn't exist.
    pub fn load_or_default<T: DeserializeOwned + Default>(
        &self,
        kind: DocKind,
    ) -> Result<T, StorageError> {
        Ok(self.load(kind)?.unwrap_or_default())
    }

    /// Saves a document to disk.
    ///
    /// Creates the data directory if it doesn't exist. The document is written
    /// to a temporary sibling first and renamed into place.
    pub fn save<T: Serialize + ?Sized>(&self, kind: DocKind, value: &T) -> Result<(), StorageError> {
        fs::create_dir_all(&self.data_dir)
            .map_err(|e| StorageError::Io(self.data_dir.clone(), e))?;

        let path = self.path(kind);
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| StorageError::Encode(path.clone(), e))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|e| StorageError::Io(tmp.clone(), e))?;
        fs::rename(&tmp, &path).map_err(|e| StorageError::Io(path, e))?;

        Ok(())
    }
}

/// Errors that can occur during document storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error for {}: {1}", .0.display())]
    Io(PathBuf, #[source] io::Error),

    #[error("Failed to decode document {}: {1}", .0.display())]
    Decode(PathBuf, #[source] serde_json::Error),

    #[error("Failed to encode document {}: {1}", .0.display())]
    Encode(PathBuf, #[source] serde_json::Error),
}
