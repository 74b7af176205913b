//! Error type returned by the query engine and ingestion

use crate::composition::CompositionError;
use crate::config::ConfigError;
use crate::document::DocumentError;
use crate::query::{QueryExecutionError, QueryParseError};
use crate::storage::StorageError;
use crate::structure::StructureError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Invalid criteria: {0}")]
    Parse(#[from] QueryParseError),

    #[error("Query failed: {0}")]
    Execution(#[from] QueryExecutionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Composition error: {0}")]
    Composition(#[from] CompositionError),

    #[error("Structure error: {0}")]
    Structure(#[from] StructureError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Ambiguous(String),
}
