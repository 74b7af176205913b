//! Persistent storage layer using JSON-lines files
//!
//! A database directory holds one `<collection>.jsonl` file per collection,
//! one document per line, and an optional `<collection>.indexes.json` with
//! the declared index definitions. Files are replaced atomically.

use super::{IndexDefinition, StorageError};
use crate::document::Document;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const DOCUMENTS_EXT: &str = "jsonl";
const INDEXES_SUFFIX: &str = ".indexes.json";

/// Persistent storage layer rooted at a database directory
#[derive(Debug, Clone)]
pub struct PersistentLayer {
    /// Database directory path
    root: PathBuf,
}

impl PersistentLayer {
    /// Open a database directory. The directory is created only when `create` is set;
    /// a missing directory otherwise reads as an empty database.
    pub fn open<P: AsRef<Path>>(root: P, create: bool) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        if create {
            fs::create_dir_all(&root).map_err(|source| StorageError::Io {
                path: root.clone(),
                source,
            })?;
        }
        Ok(Self { root })
    }

    /// Get the database directory path
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn documents_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{}.{}", collection, DOCUMENTS_EXT))
    }

    fn indexes_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{}{}", collection, INDEXES_SUFFIX))
    }

    /// Names of the collections stored on disk, sorted
    pub fn collection_names(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|e| e.to_str()) == Some(DOCUMENTS_EXT))
            .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Load a collection's documents and index definitions; `None` if it was never stored
    pub fn load_collection(
        &self,
        collection: &str,
    ) -> Result<Option<(Vec<Document>, Vec<IndexDefinition>)>, StorageError> {
        let path = self.documents_path(collection);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::Io { path, source }),
        };

        let mut documents = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let doc = Document::from_json(&line).map_err(|e| StorageError::Corrupt {
                path: path.clone(),
                line: number + 1,
                message: e.to_string(),
            })?;
            documents.push(doc);
        }

        let indexes_path = self.indexes_path(collection);
        let indexes = match fs::read_to_string(&indexes_path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| StorageError::Corrupt {
                path: indexes_path.clone(),
                line: e.line(),
                message: e.to_string(),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => {
                return Err(StorageError::Io {
                    path: indexes_path,
                    source,
                })
            }
        };

        debug!(collection, documents = documents.len(), "loaded collection");
        Ok(Some((documents, indexes)))
    }

    /// Write a collection's documents and index definitions
    pub fn save_collection(
        &self,
        collection: &str,
        documents: &[Document],
        indexes: &[IndexDefinition],
    ) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root).map_err(|source| StorageError::Io {
            path: self.root.clone(),
            source,
        })?;

        let path = self.documents_path(collection);
        write_atomically(&path, |out| {
            for doc in documents {
                let line = doc.to_json().map_err(StorageError::Document)?;
                writeln!(out, "{}", line).map_err(|source| StorageError::Io {
                    path: path.clone(),
                    source,
                })?;
            }
            Ok(())
        })?;

        let indexes_path = self.indexes_path(collection);
        let content = serde_json::to_string_pretty(indexes)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        write_atomically(&indexes_path, |out| {
            out.write_all(content.as_bytes())
                .map_err(|source| StorageError::Io {
                    path: indexes_path.clone(),
                    source,
                })
        })?;

        info!(collection, documents = documents.len(), "saved collection");
        Ok(())
    }

    /// Delete a collection's files; returns whether anything was removed
    pub fn drop_collection(&self, collection: &str) -> Result<bool, StorageError> {
        let mut removed = false;
        for path in [self.documents_path(collection), self.indexes_path(collection)] {
            match fs::remove_file(&path) {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(StorageError::Io { path, source }),
            }
        }
        Ok(removed)
    }
}

/// Write through a temporary sibling file, then rename over `path`
fn write_atomically<F>(path: &Path, write: F) -> Result<(), StorageError>
where
    F: FnOnce(&mut BufWriter<fs::File>) -> Result<(), StorageError>,
{
    let tmp = path.with_extension("tmp");
    let io_err = |source| StorageError::Io {
        path: tmp.clone(),
        source,
    };

    let file = fs::File::create(&tmp).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    write(&mut out)?;
    out.flush().map_err(io_err)?;
    out.get_ref().sync_all().map_err(io_err)?;
    drop(out);

    fs::rename(&tmp, path).map_err(|source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    })
}
