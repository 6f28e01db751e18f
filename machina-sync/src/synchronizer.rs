//! Applies bus events to the attribute hash.
//!
//! Each [`ChangeEvent`] maps 1:1 onto a store operation:
//!
//! | event              | store operation      |
//! |--------------------|----------------------|
//! | `key: value`       | set field `key`      |
//! | `delete: key`      | delete field `key`   |
//!
//! The synchronizer keeps the hash in memory and writes it out on
//! [`Synchronizer::flush`]; callers decide how often to flush.

use std::path::{Path, PathBuf};

use chrono::Utc;
use machina_core::ChangeEvent;

use crate::error::StoreError;
use crate::store::{self, AttributeHash, HashFile};

/// Outcome of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Field created or changed.
    Set,
    /// Field already held this value.
    Unchanged,
    /// Field removed.
    Deleted,
    /// Deletion of a field that did not exist.
    Missing,
}

#[derive(Debug)]
pub struct Synchronizer {
    home: PathBuf,
    hash: String,
    file: HashFile,
    dirty: bool,
}

impl Synchronizer {
    /// Start from an empty hash. The first flush replaces whatever a previous
    /// agent run left on disk, so the store only reflects live providers.
    pub fn new(home: &Path, hash: impl Into<String>) -> Self {
        Self {
            home: home.to_path_buf(),
            hash: hash.into(),
            file: HashFile::empty(),
            dirty: true,
        }
    }

    pub fn hash_name(&self) -> &str {
        &self.hash
    }

    pub fn path(&self) -> PathBuf {
        store::store_path_at(&self.home, &self.hash)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.file.fields.get(key).map(String::as_str)
    }

    pub fn fields(&self) -> &AttributeHash {
        &self.file.fields
    }

    pub fn apply(&mut self, event: &ChangeEvent) -> Applied {
        let applied = match event {
            ChangeEvent::Set { key, value } => {
                match self.file.fields.insert(key.0.clone(), value.clone()) {
                    Some(previous) if previous == *value => Applied::Unchanged,
                    _ => Applied::Set,
                }
            }
            ChangeEvent::Delete { key } => match self.file.fields.remove(key.as_str()) {
                Some(_) => Applied::Deleted,
                None => Applied::Missing,
            },
        };
        if matches!(applied, Applied::Set | Applied::Deleted) {
            self.dirty = true;
        }
        tracing::debug!(event = %event, applied = ?applied, "applied change event");
        applied
    }

    /// Persist the hash if anything changed since the last flush.
    ///
    /// Returns `true` when a write happened.
    pub fn flush(&mut self) -> Result<bool, StoreError> {
        if !self.dirty {
            return Ok(false);
        }
        self.file.synced_at = Utc::now();
        store::save_at(&self.home, &self.hash, &self.file)?;
        self.dirty = false;
        Ok(true)
    }
}
