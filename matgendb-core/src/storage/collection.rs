//! Collection management
//!
//! A collection keeps its documents in insertion order together with the
//! index definitions declared on it. Every collection carries a unique index
//! on `_id`.

use super::StorageError;
use crate::document::{Document, Value};
use crate::query::{ExecutionStrategy, Filter, Query, QueryExecutor, QueryPlanner};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Index declared on a dotted field path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Dotted field path
    pub key: String,
    /// Reject documents repeating an existing value
    #[serde(default)]
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(key: impl Into<String>, unique: bool) -> Self {
        Self {
            key: key.into(),
            unique,
        }
    }

    fn id_index() -> Self {
        Self::new("_id", true)
    }
}

#[derive(Default)]
struct CollectionState {
    documents: Vec<Document>,
    indexes: Vec<IndexDefinition>,
    /// field -> index key -> document positions
    entries: HashMap<String, HashMap<String, Vec<usize>>>,
}

impl CollectionState {
    fn rebuild_entries(&mut self) -> Result<(), StorageError> {
        let mut entries: HashMap<String, HashMap<String, Vec<usize>>> = HashMap::new();
        for index in &self.indexes {
            let slot = entries.entry(index.key.clone()).or_default();
            for (pos, doc) in self.documents.iter().enumerate() {
                for key in index_keys(doc, &index.key) {
                    let positions = slot.entry(key).or_default();
                    if index.unique && !positions.is_empty() {
                        return Err(StorageError::DuplicateKey {
                            key: index.key.clone(),
                            value: describe(doc, &index.key),
                        });
                    }
                    positions.push(pos);
                }
            }
        }
        self.entries = entries;
        Ok(())
    }

    /// Fail if `doc` would repeat a value of a unique index (ignoring position `skip`)
    fn check_unique(&self, doc: &Document, skip: Option<usize>) -> Result<(), StorageError> {
        for index in self.indexes.iter().filter(|i| i.unique) {
            let Some(slot) = self.entries.get(&index.key) else { continue };
            for key in index_keys(doc, &index.key) {
                let taken = slot
                    .get(&key)
                    .map(|positions| positions.iter().any(|p| Some(*p) != skip))
                    .unwrap_or(false);
                if taken {
                    return Err(StorageError::DuplicateKey {
                        key: index.key.clone(),
                        value: describe(doc, &index.key),
                    });
                }
            }
        }
        Ok(())
    }

    fn add_entries(&mut self, pos: usize) {
        let doc = &self.documents[pos];
        for index in &self.indexes {
            let slot = self.entries.entry(index.key.clone()).or_default();
            for key in index_keys(doc, &index.key) {
                slot.entry(key).or_default().push(pos);
            }
        }
    }

    fn indexed_fields(&self) -> Vec<String> {
        self.indexes.iter().map(|i| i.key.clone()).collect()
    }

    /// Candidate documents for a filter, narrowed through an index when possible
    fn candidates(&self, filter: &Filter) -> Vec<&Document> {
        match QueryPlanner::create_plan(filter, &self.indexed_fields()) {
            ExecutionStrategy::IndexLookup { field, keys } => {
                let Some(slot) = self.entries.get(&field) else {
                    return self.documents.iter().collect();
                };
                let positions: BTreeSet<usize> = keys
                    .iter()
                    .filter_map(|k| slot.get(&index_key(k)))
                    .flatten()
                    .copied()
                    .collect();
                debug!(field = %field, candidates = positions.len(), "index lookup");
                positions.into_iter().map(|p| &self.documents[p]).collect()
            }
            ExecutionStrategy::CollectionScan => self.documents.iter().collect(),
        }
    }
}

/// Collection managing documents and indexes
pub struct Collection {
    /// Collection name
    name: String,
    state: RwLock<CollectionState>,
    executor: QueryExecutor,
    /// Set on every write, cleared once the collection is persisted
    dirty: AtomicBool,
    writable: bool,
}

impl Collection {
    /// Create a new empty collection
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(CollectionState {
                indexes: vec![IndexDefinition::id_index()],
                ..Default::default()
            }),
            executor: QueryExecutor::new(),
            dirty: AtomicBool::new(false),
            writable: true,
        }
    }

    /// Reject every write made through this handle
    pub(crate) fn into_read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    /// Rebuild a collection from persisted documents and index definitions
    pub fn from_parts(
        name: impl Into<String>,
        documents: Vec<Document>,
        indexes: Vec<IndexDefinition>,
    ) -> Result<Self, StorageError> {
        let collection = Self::new(name);
        {
            let mut state = collection.state.write();
            state.documents = documents;
            for doc in state.documents.iter_mut() {
                doc.ensure_id();
            }
            for index in indexes {
                if !state.indexes.iter().any(|i| i.key == index.key) {
                    state.indexes.push(index);
                }
            }
            state.rebuild_entries()?;
        }
        Ok(collection)
    }

    /// Get collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get document count
    pub fn document_count(&self) -> usize {
        self.state.read().documents.len()
    }

    /// Whether there are writes not yet persisted
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Whether writes are accepted
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    fn ensure_writable(&self) -> Result<(), StorageError> {
        if self.writable {
            Ok(())
        } else {
            Err(StorageError::ReadOnly(self.name.clone()))
        }
    }

    /// Snapshot for persistence, clearing the dirty flag under the same lock
    /// so a write racing the save marks the collection dirty again
    pub(crate) fn take_for_flush(&self) -> (Vec<Document>, Vec<IndexDefinition>) {
        let state = self.state.write();
        self.dirty.store(false, Ordering::Release);
        snapshot_of(&state)
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Insert a document, assigning an ObjectId `_id` when missing
    pub fn insert_one(&self, mut doc: Document) -> Result<Value, StorageError> {
        self.ensure_writable()?;
        doc.validate()?;
        let id = doc.ensure_id();

        let mut state = self.state.write();
        state.check_unique(&doc, None)?;
        state.documents.push(doc);
        let pos = state.documents.len() - 1;
        state.add_entries(pos);
        self.dirty.store(true, Ordering::Release);

        Ok(id)
    }

    /// Insert documents in order, stopping at the first failure
    pub fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<Value>, StorageError> {
        docs.into_iter().map(|doc| self.insert_one(doc)).collect()
    }

    /// Replace the first document matching `filter`. The replacement keeps the
    /// original `_id` unless it brings its own. Returns whether a document matched.
    pub fn replace_one(&self, filter: &Filter, mut doc: Document) -> Result<bool, StorageError> {
        self.ensure_writable()?;
        doc.validate()?;

        let mut state = self.state.write();
        let mut target = None;
        for (pos, existing) in state.documents.iter().enumerate() {
            if self.executor.matches_filter(existing, filter)? {
                target = Some(pos);
                break;
            }
        }
        let Some(pos) = target else {
            return Ok(false);
        };

        if doc.id().is_none() {
            if let Some(id) = state.documents[pos].id().cloned() {
                doc.insert("_id", id);
            }
        }
        state.check_unique(&doc, Some(pos))?;

        let previous = std::mem::replace(&mut state.documents[pos], doc);
        if let Err(e) = state.rebuild_entries() {
            state.documents[pos] = previous;
            state.rebuild_entries()?;
            return Err(e);
        }
        self.dirty.store(true, Ordering::Release);
        Ok(true)
    }

    /// Run a query
    pub fn find(&self, query: &Query) -> Result<Vec<Document>, StorageError> {
        let state = self.state.read();
        let candidates = state.candidates(&query.filter);
        Ok(self.executor.execute(candidates, query)?)
    }

    /// First document matching `filter`
    pub fn find_one(&self, filter: &Filter) -> Result<Option<Document>, StorageError> {
        let query = Query::with_filter(filter.clone()).limit(1);
        Ok(self.find(&query)?.into_iter().next())
    }

    /// Count documents matching `filter`
    pub fn count(&self, filter: &Filter) -> Result<usize, StorageError> {
        let state = self.state.read();
        let mut count = 0;
        for doc in state.candidates(filter) {
            if self.executor.matches_filter(doc, filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Distinct values of `key` among documents matching `filter`
    pub fn distinct(&self, key: &str, filter: &Filter) -> Result<Vec<Value>, StorageError> {
        let state = self.state.read();
        let candidates = state.candidates(filter);
        Ok(self.executor.distinct(candidates, key, filter)?)
    }

    /// Declare an index; returns false when an index on `key` already exists.
    /// Declaring a unique index fails if existing documents repeat a value.
    pub fn ensure_index(&self, key: &str, unique: bool) -> Result<bool, StorageError> {
        self.ensure_writable()?;
        let mut state = self.state.write();
        if state.indexes.iter().any(|i| i.key == key) {
            return Ok(false);
        }

        state.indexes.push(IndexDefinition::new(key, unique));
        if let Err(e) = state.rebuild_entries() {
            state.indexes.pop();
            state.rebuild_entries()?;
            return Err(e);
        }
        self.dirty.store(true, Ordering::Release);
        debug!(collection = %self.name, key, unique, "index created");
        Ok(true)
    }

    /// Declared indexes, `_id` first
    pub fn indexes(&self) -> Vec<IndexDefinition> {
        self.state.read().indexes.clone()
    }

    /// Copy of the documents and non-`_id` index definitions, for persistence
    pub fn snapshot(&self) -> (Vec<Document>, Vec<IndexDefinition>) {
        snapshot_of(&self.state.read())
    }

    /// Remove every document, keeping index definitions
    pub fn clear(&self) -> Result<(), StorageError> {
        self.ensure_writable()?;
        let mut state = self.state.write();
        state.documents.clear();
        state.entries.clear();
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }
}

fn snapshot_of(state: &CollectionState) -> (Vec<Document>, Vec<IndexDefinition>) {
    let indexes = state
        .indexes
        .iter()
        .filter(|i| i.key != "_id")
        .cloned()
        .collect();
    (state.documents.clone(), indexes)
}

/// Index keys of a document for a field: scalar values, and the scalar
/// elements of arrays, deduplicated.
fn index_keys(doc: &Document, field: &str) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    for value in doc.lookup_path(field) {
        match value {
            Value::Array(items) => {
                for item in items.iter().filter(|i| !i.is_array() && !i.is_object()) {
                    keys.insert(index_key(item));
                }
            }
            Value::Object(_) => {}
            other => {
                keys.insert(index_key(other));
            }
        }
    }
    keys
}

/// Canonical key for a scalar; numbers of either representation share a key
fn index_key(value: &Value) -> String {
    match value.as_f64() {
        Some(n) if n == 0.0 => "number:0".to_string(),
        Some(n) => format!("number:{}", n),
        None => format!("{}:{}", value.type_name(), value.to_json()),
    }
}

fn describe(doc: &Document, field: &str) -> String {
    doc.lookup_path(field)
        .first()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "null".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryParser;
    use serde_json::json;

    fn task(task_id: i64, formula: &str, chemsys: &str) -> Document {
        Document::from_json_value(&json!({
            "task_id": task_id,
            "pretty_formula": formula,
            "chemsys": chemsys,
            "elements": chemsys.split('-').collect::<Vec<_>>(),
        }))
        .unwrap()
    }

    fn populated() -> Collection {
        let collection = Collection::new("tasks");
        collection
            .insert_many(vec![
                task(1, "Li2O", "Li-O"),
                task(2, "Li", "Li"),
                task(3, "Fe2O3", "Fe-O"),
                task(4, "Li2O2", "Li-O"),
            ])
            .unwrap();
        collection
    }

    #[test]
    fn test_insert_assigns_ids() {
        let collection = populated();
        assert_eq!(collection.document_count(), 4);
        assert!(collection.is_dirty());

        let all = collection.find(&Query::new()).unwrap();
        assert!(all.iter().all(|d| matches!(d.id(), Some(Value::ObjectId(_)))));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let collection = Collection::new("tasks");
        let mut doc = task(1, "Li", "Li");
        doc.insert("_id", "mp-1");
        collection.insert_one(doc.clone()).unwrap();

        let err = collection.insert_one(doc).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { ref key, .. } if key == "_id"));
        assert_eq!(collection.document_count(), 1);
    }

    #[test]
    fn test_unique_index_on_existing_duplicates_fails() {
        let collection = populated();
        let err = collection.ensure_index("chemsys", true).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateKey { .. }));
        assert_eq!(collection.indexes().len(), 1);

        assert!(collection.ensure_index("task_id", true).unwrap());
        assert!(!collection.ensure_index("task_id", true).unwrap());
        assert!(collection.insert_one(task(2, "Na", "Na")).is_err());
        assert!(collection.insert_one(task(5, "Na", "Na")).is_ok());
    }

    #[test]
    fn test_unique_index_treats_int_and_float_alike() {
        let collection = populated();
        collection.ensure_index("task_id", true).unwrap();
        let mut doc = Document::new();
        doc.insert("task_id", 3.0);
        assert!(collection.insert_one(doc).is_err());
    }

    #[test]
    fn test_indexed_lookup_matches_scan() {
        let collection = populated();
        let filter = QueryParser::parse_filter(&json!({"chemsys": {"$in": ["Li-O", "Li"]}, "elements": "O"})).unwrap();
        let scanned = collection.find(&Query::with_filter(filter.clone())).unwrap();

        collection.ensure_index("chemsys", false).unwrap();
        let indexed = collection.find(&Query::with_filter(filter)).unwrap();

        assert_eq!(scanned, indexed);
        assert_eq!(indexed.len(), 2);
    }

    #[test]
    fn test_array_field_index() {
        let collection = populated();
        collection.ensure_index("elements", false).unwrap();
        assert_eq!(collection.count(&Filter::eq("elements", "O")).unwrap(), 3);
        assert_eq!(collection.count(&Filter::eq("elements", "Fe")).unwrap(), 1);
    }

    #[test]
    fn test_replace_one() {
        let collection = populated();
        collection.ensure_index("task_id", true).unwrap();
        let before = collection.find_one(&Filter::eq("task_id", 2)).unwrap().unwrap();

        let replaced = collection
            .replace_one(&Filter::eq("task_id", 2), task(2, "Li3", "Li"))
            .unwrap();
        assert!(replaced);

        let after = collection.find_one(&Filter::eq("task_id", 2)).unwrap().unwrap();
        assert_eq!(after.id(), before.id());
        assert_eq!(after.get("pretty_formula").unwrap().as_str(), Some("Li3"));

        // a replacement may not collide with another document's unique value
        assert!(collection
            .replace_one(&Filter::eq("task_id", 2), task(3, "X", "X"))
            .is_err());
        assert!(!collection
            .replace_one(&Filter::eq("task_id", 99), task(99, "X", "X"))
            .unwrap());
    }

    #[test]
    fn test_distinct_and_count() {
        let collection = populated();
        let systems = collection.distinct("chemsys", &Filter::Empty).unwrap();
        assert_eq!(systems.len(), 3);
        assert_eq!(collection.count(&Filter::eq("chemsys", "Li-O")).unwrap(), 2);
    }

    #[test]
    fn test_from_parts_and_snapshot() {
        let collection = populated();
        collection.ensure_index("task_id", true).unwrap();
        let (docs, indexes) = collection.snapshot();
        assert_eq!(indexes, vec![IndexDefinition::new("task_id", true)]);

        let restored = Collection::from_parts("tasks", docs.clone(), indexes.clone()).unwrap();
        assert_eq!(restored.document_count(), 4);
        assert!(!restored.is_dirty());

        let mut dup = docs;
        dup.push(task(1, "Li2O", "Li-O"));
        assert!(Collection::from_parts("tasks", dup, indexes).is_err());
    }

    #[test]
    fn test_clear() {
        let collection = populated();
        collection.clear().unwrap();
        assert_eq!(collection.document_count(), 0);
        assert_eq!(collection.count(&Filter::Empty).unwrap(), 0);
    }

    #[test]
    fn test_read_only_collection_rejects_writes() {
        let collection = Collection::from_parts("tasks", vec![task(1, "Li2O", "Li-O")], vec![])
            .unwrap()
            .into_read_only();
        assert!(!collection.is_writable());

        let read_only = |result: Result<(), StorageError>| matches!(result, Err(StorageError::ReadOnly(_)));
        assert!(read_only(collection.insert_one(task(2, "Li", "Li")).map(|_| ())));
        assert!(read_only(collection.replace_one(&Filter::eq("task_id", 1), task(1, "X", "X")).map(|_| ())));
        assert!(read_only(collection.ensure_index("task_id", true).map(|_| ())));
        assert!(read_only(collection.clear()));

        assert_eq!(collection.document_count(), 1);
        assert!(!collection.is_dirty());
    }

    #[test]
    fn test_write_after_flush_snapshot_stays_dirty() {
        let collection = populated();
        let (documents, _) = collection.take_for_flush();
        assert_eq!(documents.len(), 4);
        assert!(!collection.is_dirty());

        collection.insert_one(task(5, "Na", "Na")).unwrap();
        assert!(collection.is_dirty());
        assert_eq!(collection.take_for_flush().0.len(), 5);
    }
}
