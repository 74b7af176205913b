//! matgendb - materials task databases and a query engine
//!
//! This crate provides:
//! - An embedded document store with MongoDB-style criteria, projections and indexes
//! - A query engine translating property aliases and formulas into criteria and
//!   mapping stored task documents to records, computed entries and structures
//! - Ingestion of task documents into a database

pub mod aliases;
pub mod composition;
pub mod config;
pub mod document;
pub mod entry;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod query;
pub mod query_engine;
pub mod results;
pub mod storage;
pub mod structure;

pub use aliases::AliasConfig;
pub use composition::{Composition, CompositionError, Element};
pub use config::{ConfigError, DbConfig};
pub use document::{Document, DocumentError, ObjectId, Value};
pub use entry::ComputedEntry;
pub use error::QueryError;
pub use ingest::{IngestOptions, IngestOutcome, IngestReport, Ingestor, TaskDocument};
pub use logging::{init_logging, LoggingConfig};
pub use query_engine::{Criteria, Properties, QueryEngine, QueryOptions};
pub use results::{QueryListResults, QueryResults, Record};
pub use storage::{AccessMode, Collection, Database, StorageError};
pub use structure::{Lattice, Site, Structure};

/// Package version
pub const VERSION: &str = "0.4.3";
