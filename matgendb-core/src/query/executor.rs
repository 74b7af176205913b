//! Query executor for executing queries against collections
//!
//! Executes queries with filtering, projection, sorting, skip, and limit

use super::ast::{Filter, Projection, ProjectionType, Query, Sort, SortOrder, ELEMENT_FIELD};
use crate::document::{Document, Value};
use parking_lot::Mutex;
use regex::Regex;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};

/// Compiled patterns kept before the regex cache is emptied
const REGEX_CACHE_LIMIT: usize = 256;

/// Query executor
pub struct QueryExecutor {
    regex_cache: Mutex<HashMap<String, Regex>>,
}

impl QueryExecutor {
    /// Create a new query executor
    pub fn new() -> Self {
        Self {
            regex_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Execute a query over a set of candidate documents
    pub fn execute<'a, I>(&self, documents: I, query: &Query) -> Result<Vec<Document>, QueryExecutionError>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut results = Vec::new();
        for doc in documents {
            if self.matches_filter(doc, &query.filter)? {
                results.push(doc.clone());
            }
        }

        if let Some(ref sort) = query.sort {
            self.apply_sort(&mut results, sort);
        }

        if let Some(skip) = query.skip {
            if skip > 0 {
                results = results.into_iter().skip(skip as usize).collect();
            }
        }

        if let Some(limit) = query.limit {
            if limit > 0 {
                results.truncate(limit as usize);
            }
        }

        if let Some(ref projection) = query.projection {
            results = results
                .iter()
                .map(|doc| self.apply_projection(doc, projection))
                .collect();
        }

        Ok(results)
    }

    /// Unique values of `key` over the documents matching `filter`, arrays unwound
    pub fn distinct<'a, I>(&self, documents: I, key: &str, filter: &Filter) -> Result<Vec<Value>, QueryExecutionError>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut values: Vec<Value> = Vec::new();
        for doc in documents {
            if !self.matches_filter(doc, filter)? {
                continue;
            }
            for found in doc.lookup_path(key) {
                let items: Vec<&Value> = match found {
                    Value::Array(arr) => arr.iter().collect(),
                    other => vec![other],
                };
                for item in items {
                    if !values.contains(item) {
                        values.push(item.clone());
                    }
                }
            }
        }
        Ok(values)
    }

    /// Check if a document matches a filter
    pub fn matches_filter(&self, doc: &Document, filter: &Filter) -> Result<bool, QueryExecutionError> {
        match filter {
            Filter::Empty => Ok(true),

            Filter::Eq { field, value } => Ok(Self::matches_eq(doc, field, value)),

            Filter::Ne { field, value } => Ok(!Self::matches_eq(doc, field, value)),

            Filter::Gt { field, value } => {
                Ok(Self::any_candidate(doc, field, |v| Self::compare(v, value) == Some(CmpOrdering::Greater)))
            }

            Filter::Gte { field, value } => Ok(Self::any_candidate(doc, field, |v| {
                matches!(Self::compare(v, value), Some(CmpOrdering::Greater | CmpOrdering::Equal))
            })),

            Filter::Lt { field, value } => {
                Ok(Self::any_candidate(doc, field, |v| Self::compare(v, value) == Some(CmpOrdering::Less)))
            }

            Filter::Lte { field, value } => Ok(Self::any_candidate(doc, field, |v| {
                matches!(Self::compare(v, value), Some(CmpOrdering::Less | CmpOrdering::Equal))
            })),

            Filter::In { field, values } => Ok(values.iter().any(|v| Self::matches_eq(doc, field, v))),

            Filter::Nin { field, values } => Ok(!values.iter().any(|v| Self::matches_eq(doc, field, v))),

            Filter::All { field, values } => {
                Ok(!values.is_empty() && values.iter().all(|v| Self::matches_eq(doc, field, v)))
            }

            Filter::Size { field, size } => Ok(doc
                .lookup_path(field)
                .into_iter()
                .any(|v| matches!(v, Value::Array(arr) if arr.len() == *size))),

            Filter::Exists { field, exists } => {
                let has_field = !doc.lookup_path(field).is_empty();
                Ok(has_field == *exists)
            }

            Filter::Regex { field, pattern, options } => {
                let regex = self.compile_regex(pattern, options.as_deref())?;
                Ok(Self::any_candidate(doc, field, |v| match v {
                    Value::String(s) => regex.is_match(s),
                    _ => false,
                }))
            }

            Filter::ElemMatch { field, filter } => {
                for found in doc.lookup_path(field) {
                    let Value::Array(items) = found else { continue };
                    for item in items {
                        let mut element_doc = match item {
                            Value::Object(obj) => Document::from_fields(obj.clone()),
                            _ => Document::new(),
                        };
                        element_doc.insert(ELEMENT_FIELD, item.clone());
                        if self.matches_filter(&element_doc, filter)? {
                            return Ok(true);
                        }
                    }
                }
                Ok(false)
            }

            Filter::And(filters) => {
                for f in filters {
                    if !self.matches_filter(doc, f)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }

            Filter::Or(filters) => {
                for f in filters {
                    if self.matches_filter(doc, f)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }

            Filter::Nor(filters) => {
                for f in filters {
                    if self.matches_filter(doc, f)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }

            Filter::Not(filter) => Ok(!self.matches_filter(doc, filter)?),
        }
    }

    /// Equality with array semantics; `null` also matches a missing field
    fn matches_eq(doc: &Document, field: &str, value: &Value) -> bool {
        let found = doc.lookup_path(field);
        if found.is_empty() {
            return value.is_null();
        }
        found.into_iter().any(|v| {
            v == value || matches!(v, Value::Array(arr) if arr.iter().any(|item| item == value))
        })
    }

    /// True when any value at `field` (or any element of an array there) satisfies `pred`
    fn any_candidate<F>(doc: &Document, field: &str, pred: F) -> bool
    where
        F: Fn(&Value) -> bool,
    {
        doc.lookup_path(field).into_iter().any(|v| match v {
            Value::Array(arr) => arr.iter().any(&pred),
            other => pred(other),
        })
    }

    /// Range comparison; values from different type brackets never compare
    fn compare(a: &Value, b: &Value) -> Option<CmpOrdering> {
        if a.comparable_with(b) {
            Some(a.mongo_cmp(b))
        } else {
            None
        }
    }

    fn compile_regex(&self, pattern: &str, options: Option<&str>) -> Result<Regex, QueryExecutionError> {
        let flags: String = options
            .unwrap_or("")
            .chars()
            .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
            .collect();
        let source = if flags.is_empty() {
            pattern.to_string()
        } else {
            format!("(?{}){}", flags, pattern)
        };

        let mut cache = self.regex_cache.lock();
        if let Some(regex) = cache.get(&source) {
            return Ok(regex.clone());
        }
        let regex = Regex::new(&source).map_err(|e| QueryExecutionError::InvalidRegex(e.to_string()))?;
        if cache.len() >= REGEX_CACHE_LIMIT {
            cache.clear();
        }
        cache.insert(source, regex.clone());
        Ok(regex)
    }

    /// Apply sorting to documents
    pub fn apply_sort(&self, documents: &mut [Document], sort: &Sort) {
        documents.sort_by(|a, b| {
            for (field, order) in &sort.fields {
                let a_key = Self::sort_key(a, field, *order);
                let b_key = Self::sort_key(b, field, *order);

                let cmp = match order {
                    SortOrder::Ascending => a_key.mongo_cmp(&b_key),
                    SortOrder::Descending => b_key.mongo_cmp(&a_key),
                };

                if cmp != CmpOrdering::Equal {
                    return cmp;
                }
            }
            CmpOrdering::Equal
        });
    }

    /// Arrays sort by their smallest element ascending and largest descending;
    /// missing fields sort as null.
    fn sort_key(doc: &Document, field: &str, order: SortOrder) -> Value {
        let mut candidates: Vec<&Value> = Vec::new();
        for v in doc.lookup_path(field) {
            match v {
                Value::Array(arr) if !arr.is_empty() => candidates.extend(arr.iter()),
                other => candidates.push(other),
            }
        }
        let pick = match order {
            SortOrder::Ascending => candidates.into_iter().min_by(|a, b| a.mongo_cmp(b)),
            SortOrder::Descending => candidates.into_iter().max_by(|a, b| a.mongo_cmp(b)),
        };
        pick.cloned().unwrap_or(Value::Null)
    }

    /// Apply a projection to a single document
    pub fn apply_projection(&self, doc: &Document, projection: &Projection) -> Document {
        if !projection.is_inclusion() {
            let mut projected = doc.clone();
            for path in projection.fields.keys() {
                projected.remove_by_path(path);
            }
            return projected;
        }

        let mut projected = Document::new();
        if projection.includes_id() {
            if let Some(id) = doc.id() {
                projected.insert("_id", id.clone());
            }
        }

        let included: Vec<&str> = projection
            .fields
            .iter()
            .filter(|(path, kind)| path.as_str() != "_id" && **kind == ProjectionType::Include)
            .map(|(path, _)| path.as_str())
            .collect();
        // a path under another included path is already carried whole by its parent
        let covered = |path: &str| {
            included.iter().any(|parent| {
                path.strip_prefix(parent)
                    .map_or(false, |rest| rest.starts_with('.'))
            })
        };

        for path in included.iter().copied().filter(|p| !covered(p)) {
            let parts: Vec<&str> = path.split('.').collect();
            let Some(top) = doc.get(parts[0]) else { continue };
            let Some(value) = project_value(top, &parts[1..]) else { continue };

            match projected.get_mut(parts[0]) {
                Some(existing) => merge_projected(existing, value),
                None => {
                    projected.insert(parts[0], value);
                }
            }
        }

        projected
    }
}

impl Default for QueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the part of `value` reachable by `parts`, keeping the nesting.
/// Arrays of sub-documents project element-wise; elements lacking the path
/// become empty objects and non-document elements are dropped.
fn project_value(value: &Value, parts: &[&str]) -> Option<Value> {
    if parts.is_empty() {
        return Some(value.clone());
    }

    match value {
        Value::Object(obj) => {
            let inner = project_value(obj.get(parts[0])?, &parts[1..])?;
            let mut map = BTreeMap::new();
            map.insert(parts[0].to_string(), inner);
            Some(Value::Object(map))
        }
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter(|item| item.is_object())
                .map(|item| project_value(item, parts).unwrap_or_else(|| Value::Object(BTreeMap::new())))
                .collect(),
        )),
        _ => None,
    }
}

fn merge_projected(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(dst), Value::Object(src)) => {
            for (key, value) in src {
                match dst.get_mut(&key) {
                    Some(existing) => merge_projected(existing, value),
                    None => {
                        dst.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(dst), Value::Array(src)) if dst.len() == src.len() => {
            for (existing, value) in dst.iter_mut().zip(src) {
                merge_projected(existing, value);
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Query execution errors
#[derive(Debug, thiserror::Error)]
pub enum QueryExecutionError {
    #[error("Invalid regex pattern: {0}")]
    InvalidRegex(String),
}
