//! Query engine internals
//!
//! This module provides MongoDB-compatible criteria parsing and execution

pub mod ast;
pub mod executor;
pub mod parser;
pub mod planner;

pub use ast::{Filter, Projection, ProjectionType, Query, Sort, SortOrder};
pub use executor::{QueryExecutionError, QueryExecutor};
pub use parser::{QueryParseError, QueryParser};
pub use planner::{ExecutionStrategy, QueryPlanner};
