//! Query Abstract Syntax Tree (AST) definitions
//!
//! Defines the structure for MongoDB-compatible criteria, projections and sorts

use crate::document::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field name used when an `$elemMatch` body holds operators on the array
/// element itself rather than on fields of a sub-document.
pub const ELEMENT_FIELD: &str = "$elem";

/// Query structure with filter, projection, sort, skip, limit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Query {
    /// Filter conditions
    pub filter: Filter,
    /// Projection (fields to include/exclude)
    pub projection: Option<Projection>,
    /// Sort specification
    pub sort: Option<Sort>,
    /// Number of documents to skip
    pub skip: Option<u64>,
    /// Maximum number of documents to return
    pub limit: Option<u64>,
}

impl Query {
    /// Create a new empty query (matches all documents)
    pub fn new() -> Self {
        Self::with_filter(Filter::Empty)
    }

    /// Create a query with a filter
    pub fn with_filter(filter: Filter) -> Self {
        Self {
            filter,
            projection: None,
            sort: None,
            skip: None,
            limit: None,
        }
    }

    /// Set projection
    pub fn projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Set sort
    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Set skip
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set limit
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter conditions for queries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", content = "args")]
pub enum Filter {
    /// Empty filter (matches all documents)
    Empty,

    /// Equality: field == value (or an array field contains value)
    Eq { field: String, value: Value },

    /// Not equal: no value at field equals value
    Ne { field: String, value: Value },

    /// Greater than: field > value
    Gt { field: String, value: Value },

    /// Greater than or equal: field >= value
    Gte { field: String, value: Value },

    /// Less than: field < value
    Lt { field: String, value: Value },

    /// Less than or equal: field <= value
    Lte { field: String, value: Value },

    /// In: field in [values]
    In { field: String, values: Vec<Value> },

    /// Not in: field not in [values]
    Nin { field: String, values: Vec<Value> },

    /// All: array field contains every value
    All { field: String, values: Vec<Value> },

    /// Size: array field has exactly `size` elements
    Size { field: String, size: usize },

    /// Exists: field exists (or not)
    Exists { field: String, exists: bool },

    /// Regex: field matches pattern
    Regex {
        field: String,
        pattern: String,
        options: Option<String>,
    },

    /// ElemMatch: at least one array element satisfies the filter
    ElemMatch { field: String, filter: Box<Filter> },

    /// Logical AND: all conditions must match
    And(Vec<Filter>),

    /// Logical OR: at least one condition must match
    Or(Vec<Filter>),

    /// Logical NOR: no condition may match
    Nor(Vec<Filter>),

    /// Logical NOT: condition must not match
    Not(Box<Filter>),
}

impl Filter {
    /// Create an equality filter
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a not-equal filter
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than filter
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than-or-equal filter
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gte {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than filter
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than-or-equal filter
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lte {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an in filter
    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::In {
            field: field.into(),
            values,
        }
    }

    /// Create a not-in filter
    pub fn nin(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::Nin {
            field: field.into(),
            values,
        }
    }

    /// Create an all filter
    pub fn all(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::All {
            field: field.into(),
            values,
        }
    }

    /// Create an exists filter
    pub fn exists(field: impl Into<String>, exists: bool) -> Self {
        Self::Exists {
            field: field.into(),
            exists,
        }
    }

    /// Create a regex filter
    pub fn regex(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Regex {
            field: field.into(),
            pattern: pattern.into(),
            options: None,
        }
    }

    /// Create an AND filter
    pub fn and(filters: Vec<Filter>) -> Self {
        Self::And(filters)
    }

    /// Create an OR filter
    pub fn or(filters: Vec<Filter>) -> Self {
        Self::Or(filters)
    }

    /// Create a NOT filter
    pub fn not(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Get all fields referenced in this filter
    pub fn get_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields.sort();
        fields.dedup();
        fields
    }

    fn collect_fields(&self, fields: &mut Vec<String>) {
        match self {
            Filter::Empty => {}
            Filter::Eq { field, .. }
            | Filter::Ne { field, .. }
            | Filter::Gt { field, .. }
            | Filter::Gte { field, .. }
            | Filter::Lt { field, .. }
            | Filter::Lte { field, .. }
            | Filter::In { field, .. }
            | Filter::Nin { field, .. }
            | Filter::All { field, .. }
            | Filter::Size { field, .. }
            | Filter::Exists { field, .. }
            | Filter::Regex { field, .. }
            | Filter::ElemMatch { field, .. } => {
                fields.push(field.clone());
            }
            Filter::And(filters) | Filter::Or(filters) | Filter::Nor(filters) => {
                for f in filters {
                    f.collect_fields(fields);
                }
            }
            Filter::Not(filter) => {
                filter.collect_fields(fields);
            }
        }
    }

    /// Check if this filter is empty (matches all)
    pub fn is_empty(&self) -> bool {
        matches!(self, Filter::Empty)
    }
}

/// Projection specification (fields to include/exclude)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Projection {
    /// Dotted field paths and whether they are included or excluded
    pub fields: BTreeMap<String, ProjectionType>,
}

impl Projection {
    /// Create a new empty projection
    pub fn new() -> Self {
        Self {
            fields: BTreeMap::new(),
        }
    }

    /// Include a field
    pub fn include(mut self, field: impl Into<String>) -> Self {
        self.fields.insert(field.into(), ProjectionType::Include);
        self
    }

    /// Exclude a field
    pub fn exclude(mut self, field: impl Into<String>) -> Self {
        self.fields.insert(field.into(), ProjectionType::Exclude);
        self
    }

    /// Check if this is an inclusion projection (`_id` does not count)
    pub fn is_inclusion(&self) -> bool {
        self.fields
            .iter()
            .any(|(k, t)| k != "_id" && matches!(t, ProjectionType::Include))
    }

    /// Check if this is an exclusion projection
    pub fn is_exclusion(&self) -> bool {
        self.fields
            .values()
            .any(|t| matches!(t, ProjectionType::Exclude))
    }

    /// Whether `_id` survives the projection
    pub fn includes_id(&self) -> bool {
        self.fields.get("_id") != Some(&ProjectionType::Exclude)
    }

    /// Check if a top-level field should be included
    pub fn should_include(&self, field: &str) -> bool {
        if field == "_id" {
            return self.includes_id();
        }
        if self.is_inclusion() {
            self.fields.iter().any(|(path, t)| {
                *t == ProjectionType::Include
                    && (path == field || path.split('.').next() == Some(field))
            })
        } else {
            self.fields.get(field) != Some(&ProjectionType::Exclude)
        }
    }
}

impl Default for Projection {
    fn default() -> Self {
        Self::new()
    }
}

/// Projection type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProjectionType {
    /// Include the field
    Include,
    /// Exclude the field
    Exclude,
}

/// Sort specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sort {
    /// Fields to sort by with their order
    pub fields: Vec<(String, SortOrder)>,
}

impl Sort {
    /// Create a new empty sort
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Add a field to sort by
    pub fn add(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.fields.push((field.into(), order));
        self
    }

    /// Sort by field in ascending order
    pub fn asc(self, field: impl Into<String>) -> Self {
        self.add(field, SortOrder::Ascending)
    }

    /// Sort by field in descending order
    pub fn desc(self, field: impl Into<String>) -> Self {
        self.add(field, SortOrder::Descending)
    }
}

impl Default for Sort {
    fn default() -> Self {
        Self::new()
    }
}

/// Sort order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending order (1)
    Ascending,
    /// Descending order (-1)
    Descending,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_creation() {
        let query = Query::new();
        assert!(query.filter.is_empty());
        assert!(query.projection.is_none());
        assert!(query.sort.is_none());
        assert!(query.skip.is_none());
        assert!(query.limit.is_none());
    }

    #[test]
    fn test_query_builder() {
        let query = Query::with_filter(Filter::eq("nelements", 2))
            .projection(Projection::new().include("task_id").include("pretty_formula"))
            .sort(Sort::new().asc("pretty_formula"))
            .skip(10)
            .limit(20);

        assert!(!query.filter.is_empty());
        assert!(query.projection.is_some());
        assert!(query.sort.is_some());
        assert_eq!(query.skip, Some(10));
        assert_eq!(query.limit, Some(20));
    }

    #[test]
    fn test_filter_get_fields() {
        let filter = Filter::and(vec![
            Filter::eq("state", "successful"),
            Filter::gt("nelements", 1),
            Filter::or(vec![Filter::exists("analysis.bandgap", true)]),
        ]);

        let fields = filter.get_fields();
        assert_eq!(fields, vec!["analysis.bandgap", "nelements", "state"]);
    }

    #[test]
    fn test_projection_include() {
        let proj = Projection::new().include("output.crystal").include("task_id");
        assert!(proj.is_inclusion());
        assert!(!proj.is_exclusion());
        assert!(proj.should_include("output"));
        assert!(proj.should_include("task_id"));
        assert!(proj.should_include("_id"));
        assert!(!proj.should_include("input"));
    }

    #[test]
    fn test_projection_id_only_exclusion_is_not_inclusion() {
        let proj = Projection::new().exclude("_id");
        assert!(!proj.is_inclusion());
        assert!(proj.is_exclusion());
        assert!(!proj.includes_id());
        assert!(proj.should_include("task_id"));
    }

    #[test]
    fn test_projection_exclude() {
        let proj = Projection::new().exclude("input").exclude("calculations");
        assert!(!proj.is_inclusion());
        assert!(proj.is_exclusion());
        assert!(proj.should_include("output"));
        assert!(!proj.should_include("input"));
        assert!(!proj.should_include("calculations"));
    }

    #[test]
    fn test_sort_creation() {
        let sort = Sort::new().asc("pretty_formula").desc("energy");
        assert_eq!(sort.fields.len(), 2);
        assert_eq!(sort.fields[0], ("pretty_formula".to_string(), SortOrder::Ascending));
        assert_eq!(sort.fields[1], ("energy".to_string(), SortOrder::Descending));
    }
}
