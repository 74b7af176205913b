//! Database: a named set of collections backed by a data directory

use super::{Collection, PersistentLayer, StorageError};
use crate::document::{Document, Value};
use crate::query::Filter;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Collection holding named sequence counters
pub const COUNTERS_COLLECTION: &str = "counters";

/// Whether a database accepts writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn is_writable(self) -> bool {
        self == AccessMode::ReadWrite
    }
}

/// Database managing collections
pub struct Database {
    name: String,
    mode: AccessMode,
    /// `None` for purely in-memory databases
    persistence: Option<PersistentLayer>,
    collections: DashMap<String, Arc<Collection>>,
    sequence_lock: Mutex<()>,
}

impl Database {
    /// Create a writable database that is never persisted
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: AccessMode::ReadWrite,
            persistence: None,
            collections: DashMap::new(),
            sequence_lock: Mutex::new(()),
        }
    }

    /// Open the database `name` under `data_dir`. Collections load lazily on first use.
    pub fn open<P: AsRef<Path>>(
        data_dir: P,
        name: impl Into<String>,
        mode: AccessMode,
    ) -> Result<Self, StorageError> {
        let name = name.into();
        validate_name(&name)?;
        let root = data_dir.as_ref().join(&name);
        let persistence = PersistentLayer::open(&root, mode.is_writable())?;
        info!(database = %name, path = %root.display(), ?mode, "database opened");

        Ok(Self {
            name,
            mode,
            persistence: Some(persistence),
            collections: DashMap::new(),
            sequence_lock: Mutex::new(()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Directory holding this database's files
    pub fn path(&self) -> Option<PathBuf> {
        self.persistence.as_ref().map(|p| p.root().to_path_buf())
    }

    /// Get a collection, loading it from disk if needed. Unknown names yield an
    /// empty collection. On a read-only database every write through it fails.
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>, StorageError> {
        if let Some(collection) = self.collections.get(name) {
            return Ok(collection.clone());
        }
        validate_name(name)?;

        let mut loaded = match &self.persistence {
            Some(layer) => match layer.load_collection(name)? {
                Some((documents, indexes)) => Collection::from_parts(name, documents, indexes)?,
                None => Collection::new(name),
            },
            None => Collection::new(name),
        };
        if !self.mode.is_writable() {
            loaded = loaded.into_read_only();
        }

        let collection = self
            .collections
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(loaded))
            .clone();
        Ok(collection)
    }

    /// Get a collection for writing; fails on a read-only database
    pub fn collection_mut(&self, name: &str) -> Result<Arc<Collection>, StorageError> {
        self.ensure_writable()?;
        self.collection(name)
    }

    fn ensure_writable(&self) -> Result<(), StorageError> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(StorageError::ReadOnly(self.name.clone()))
        }
    }

    /// Names of the stored and loaded collections, sorted
    pub fn collection_names(&self) -> Result<Vec<String>, StorageError> {
        let mut names = match &self.persistence {
            Some(layer) => layer.collection_names()?,
            None => Vec::new(),
        };
        for entry in self.collections.iter() {
            if entry.value().document_count() > 0 && !names.contains(entry.key()) {
                names.push(entry.key().clone());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a collection and its files
    pub fn drop_collection(&self, name: &str) -> Result<bool, StorageError> {
        self.ensure_writable()?;
        let loaded = self.collections.remove(name).is_some();
        let stored = match &self.persistence {
            Some(layer) => layer.drop_collection(name)?,
            None => false,
        };
        Ok(loaded || stored)
    }

    /// Increment and return the counter `name` kept in the counters collection
    /// as `{"_id": name, "c": n}`. The first value handed out is 1.
    pub fn next_sequence(&self, name: &str) -> Result<i64, StorageError> {
        let counters = self.collection_mut(COUNTERS_COLLECTION)?;
        let _guard = self.sequence_lock.lock();

        let filter = Filter::eq("_id", name);
        let current = counters
            .find_one(&filter)?
            .and_then(|doc| doc.get("c").and_then(Value::as_i64))
            .unwrap_or(0);
        let next = current + 1;

        let mut counter = Document::new();
        counter.insert("_id", name);
        counter.insert("c", next);
        if !counters.replace_one(&filter, counter.clone())? {
            counters.insert_one(counter)?;
        }

        debug!(counter = name, value = next, "sequence advanced");
        Ok(next)
    }

    /// Persist every collection with pending writes; returns how many were written
    pub fn flush(&self) -> Result<usize, StorageError> {
        let Some(layer) = &self.persistence else {
            return Ok(0);
        };
        if !self.mode.is_writable() {
            return Ok(0);
        }

        let mut written = 0;
        for entry in self.collections.iter() {
            let collection = entry.value();
            if !collection.is_dirty() {
                continue;
            }
            let (documents, indexes) = collection.take_for_flush();
            if let Err(e) = layer.save_collection(collection.name(), &documents, &indexes) {
                collection.mark_dirty();
                warn!(collection = collection.name(), "flush failed: {}", e);
                return Err(e);
            }
            written += 1;
        }
        Ok(written)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("path", &self.path())
            .finish()
    }
}

fn validate_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
        && !name.ends_with(".indexes");
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}
