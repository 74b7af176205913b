//! Query results mapped onto requested property names

use crate::document::Document;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::sync::Arc;

/// A mapped record: property name → value
pub type Record = JsonMap<String, JsonValue>;

/// Rewrites every mapped record before it is returned
pub type ResultHook = Arc<dyn Fn(&mut Record) + Send + Sync>;

/// Property names with the path segments they are read from, in request order
pub type PropertyPaths = Vec<(String, Vec<String>)>;

/// Records returned by a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResults {
    records: Vec<Record>,
}

impl QueryResults {
    /// Map raw documents through `properties`; `None` keeps whole documents
    pub fn new(documents: Vec<Document>, properties: Option<&PropertyPaths>, hooks: &[ResultHook]) -> Self {
        let records = documents
            .into_iter()
            .map(|doc| {
                let raw = match doc.to_json_value() {
                    JsonValue::Object(map) => map,
                    _ => Record::new(),
                };
                let mut record = match properties {
                    Some(properties) => map_record(&raw, properties),
                    None => raw,
                };
                for hook in hooks {
                    hook(&mut record);
                }
                record
            })
            .collect();
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn first(&self) -> Option<&Record> {
        self.records.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Record> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl IntoIterator for QueryResults {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryResults {
    type Item = &'a Record;
    type IntoIter = std::slice::Iter<'a, Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Values returned by a distinct query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryListResults {
    values: Vec<JsonValue>,
}

impl QueryListResults {
    pub fn new(values: Vec<JsonValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&JsonValue> {
        self.values.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, JsonValue> {
        self.values.iter()
    }

    pub fn into_values(self) -> Vec<JsonValue> {
        self.values
    }
}

impl IntoIterator for QueryListResults {
    type Item = JsonValue;
    type IntoIter = std::vec::IntoIter<JsonValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.into_iter()
    }
}

fn map_record(raw: &Record, properties: &PropertyPaths) -> Record {
    properties
        .iter()
        .map(|(name, path)| {
            let value = resolve_path(raw, path).unwrap_or(JsonValue::Null);
            (name.clone(), value)
        })
        .collect()
}

/// Follow `path` from the top-level record. Once a list is reached, each
/// following segment is read from every element; any missing key yields `None`.
fn resolve_path(raw: &Record, path: &[String]) -> Option<JsonValue> {
    let (first, rest) = path.split_first()?;
    let mut current = raw.get(first)?.clone();
    for key in rest {
        current = match current {
            JsonValue::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|item| item.as_object().and_then(|o| o.get(key)).cloned())
                    .collect::<Option<Vec<_>>>()?,
            ),
            JsonValue::Object(mut map) => map.remove(key)?,
            _ => return None,
        };
    }
    Some(current)
}
