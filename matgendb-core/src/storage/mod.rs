//! Embedded document storage
//!
//! Collections live in memory and are persisted as JSON-lines files under
//! `<data_dir>/<database>/`. A [`Database`] opened read-only refuses writes.

pub mod collection;
pub mod database;
pub mod persistent;

pub use collection::{Collection, IndexDefinition};
pub use database::{AccessMode, Database};
pub use persistent::PersistentLayer;

use crate::document::DocumentError;
use crate::query::QueryExecutionError;
use std::path::PathBuf;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Duplicate key on index {key}: {value}")]
    DuplicateKey { key: String, value: String },

    #[error("Database {0} is opened read-only")]
    ReadOnly(String),

    #[error("Invalid collection name: {0:?}")]
    InvalidName(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt data in {path} at line {line}: {message}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Execution(#[from] QueryExecutionError),
}
