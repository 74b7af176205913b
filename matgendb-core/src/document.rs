//! Document and Value types for task databases
//!
//! This module provides the core data structures for document storage:
//! - Document: a JSON-like document with nested fields
//! - Value: all JSON types plus ObjectId and DateTime, exchanged as MongoDB extended JSON
//! - Field path navigation, including fan-out over arrays of sub-documents

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map as JsonMap, Number as JsonNumber, Value as JsonValue};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use uuid::Uuid;

/// Maximum document size in bytes (16 MB)
pub const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

/// Maximum nesting depth for documents
pub const MAX_NESTING_DEPTH: usize = 100;

static OBJECT_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

/// ObjectId type for MongoDB compatibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Create a new ObjectId
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];
        // Timestamp (4 bytes)
        let timestamp = Utc::now().timestamp() as u32;
        bytes[0..4].copy_from_slice(&timestamp.to_be_bytes());

        // Random value (5 bytes)
        let uuid = Uuid::new_v4();
        bytes[4..9].copy_from_slice(&uuid.as_bytes()[0..5]);

        // Counter (3 bytes)
        let counter = OBJECT_ID_COUNTER
            .fetch_add(1, AtomicOrdering::Relaxed)
            .wrapping_add(rand::random::<u32>() & 0x00FF_0000);
        bytes[9..12].copy_from_slice(&counter.to_be_bytes()[1..4]);

        Self(bytes)
    }

    /// Create from bytes
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Get bytes
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Seconds since the epoch encoded in the id
    pub fn timestamp(&self) -> i64 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.0[0..4]);
        u32::from_be_bytes(bytes) as i64
    }

    /// Hex form, as printed by MongoDB tools
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for ObjectId {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|_| DocumentError::InvalidObjectId(s.to_string()))?;
        let bytes: [u8; 12] = raw
            .try_into()
            .map_err(|_| DocumentError::InvalidObjectId(s.to_string()))?;
        Ok(Self(bytes))
    }
}

/// Value type supporting all JSON types plus ObjectId and DateTime
#[derive(Debug, Clone)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit integer
    Int64(i64),
    /// 64-bit floating point
    Float64(f64),
    /// String value
    String(String),
    /// Array of values
    Array(Vec<Value>),
    /// Object with string keys
    Object(BTreeMap<String, Value>),
    /// ObjectId for MongoDB compatibility
    ObjectId(ObjectId),
    /// DateTime with UTC timezone
    DateTime(DateTime<Utc>),
}

impl Value {
    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if value is a number (int or float)
    pub fn is_number(&self) -> bool {
        matches!(self, Value::Int64(_) | Value::Float64(_))
    }

    /// Check if value is a string
    pub fn is_string(&self) -> bool {
        matches!(self, Value::String(_))
    }

    /// Check if value is an array
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    /// Check if value is an object
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    /// Get as boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64; floats with no fractional part convert
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(i) => Some(*i),
            Value::Float64(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    /// Get as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(i) => Some(*i as f64),
            Value::Float64(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as string reference
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get as array reference
    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Get as object reference
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Get as mutable object reference
    pub fn as_object_mut(&mut self) -> Option<&mut BTreeMap<String, Value>> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Name of the value's type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int64(_) => "int",
            Value::Float64(_) => "double",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::ObjectId(_) => "objectId",
            Value::DateTime(_) => "date",
        }
    }

    /// Calculate the size of this value in bytes (approximate)
    pub fn size_bytes(&self) -> usize {
        match self {
            Value::Null => 1,
            Value::Bool(_) => 1,
            Value::Int64(_) => 8,
            Value::Float64(_) => 8,
            Value::String(s) => s.len(),
            Value::Array(arr) => arr.iter().map(|v| v.size_bytes()).sum::<usize>() + 8,
            Value::Object(obj) => {
                obj.iter()
                    .map(|(k, v)| k.len() + v.size_bytes())
                    .sum::<usize>()
                    + 8
            }
            Value::ObjectId(_) => 12,
            Value::DateTime(_) => 8,
        }
    }

    /// Get the nesting depth of this value
    pub fn nesting_depth(&self) -> usize {
        match self {
            Value::Array(arr) => 1 + arr.iter().map(|v| v.nesting_depth()).max().unwrap_or(0),
            Value::Object(obj) => 1 + obj.values().map(|v| v.nesting_depth()).max().unwrap_or(0),
            _ => 0,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 1,
            Value::Int64(_) | Value::Float64(_) => 2,
            Value::String(_) => 3,
            Value::Object(_) => 4,
            Value::Array(_) => 5,
            Value::ObjectId(_) => 7,
            Value::Bool(_) => 8,
            Value::DateTime(_) => 9,
        }
    }

    /// Whether range operators may compare the two values (same type bracket)
    pub fn comparable_with(&self, other: &Value) -> bool {
        self.type_rank() == other.type_rank()
    }

    /// Total order following MongoDB's cross-type comparison rules.
    ///
    /// Numbers compare numerically regardless of representation.
    pub fn mongo_cmp(&self, other: &Value) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::ObjectId(a), Value::ObjectId(b)) => a.cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let cmp = x.mongo_cmp(y);
                    if cmp != Ordering::Equal {
                        return cmp;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Value::Object(a), Value::Object(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let cmp = ka.cmp(kb).then_with(|| va.mongo_cmp(vb));
                    if cmp != Ordering::Equal {
                        return cmp;
                    }
                }
                a.len().cmp(&b.len())
            }
            (a, b) => match (a.as_f64(), b.as_f64()) {
                // NaN sorts below every other number
                (Some(x), Some(y)) => match (x.is_nan(), y.is_nan()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                },
                _ => Ordering::Equal,
            },
        }
    }

    /// Convert to a plain JSON value, using extended JSON for ObjectId and DateTime
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int64(i) => JsonValue::Number((*i).into()),
            Value::Float64(f) => JsonNumber::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Array(arr) => JsonValue::Array(arr.iter().map(Value::to_json).collect()),
            Value::Object(obj) => JsonValue::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<JsonMap<_, _>>(),
            ),
            Value::ObjectId(oid) => {
                let mut map = JsonMap::new();
                map.insert("$oid".to_string(), JsonValue::String(oid.to_hex()));
                JsonValue::Object(map)
            }
            Value::DateTime(dt) => {
                let mut map = JsonMap::new();
                map.insert("$date".to_string(), JsonValue::String(dt.to_rfc3339()));
                JsonValue::Object(map)
            }
        }
    }

    fn from_extended_json(obj: &JsonMap<String, JsonValue>) -> Option<Value> {
        if obj.len() != 1 {
            return None;
        }
        if let Some(JsonValue::String(s)) = obj.get("$oid") {
            return s.parse::<ObjectId>().ok().map(Value::ObjectId);
        }
        match obj.get("$date") {
            Some(JsonValue::String(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| Value::DateTime(dt.with_timezone(&Utc))),
            Some(JsonValue::Number(n)) => n
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .map(Value::DateTime),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.mongo_cmp(other) == Ordering::Equal
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{}", s),
            Value::ObjectId(oid) => write!(f, "{}", oid),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        JsonValue::deserialize(deserializer).map(Value::from)
    }
}

impl From<JsonValue> for Value {
    fn from(json: JsonValue) -> Self {
        Value::from(&json)
    }
}

impl From<&JsonValue> for Value {
    fn from(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int64(i),
                None => Value::Float64(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(arr) => Value::Array(arr.iter().map(Value::from).collect()),
            JsonValue::Object(obj) => Value::from_extended_json(obj).unwrap_or_else(|| {
                Value::Object(obj.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect())
            }),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int64(i as i64)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int64(i)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int64(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float64(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(arr: Vec<Value>) -> Self {
        Value::Array(arr)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(obj: BTreeMap<String, Value>) -> Self {
        Value::Object(obj)
    }
}

impl From<ObjectId> for Value {
    fn from(oid: ObjectId) -> Self {
        Value::ObjectId(oid)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc.fields)
    }
}

/// Document structure with nested fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    /// Document fields stored in a BTreeMap for ordered iteration
    pub fields: BTreeMap<String, Value>,
}

impl Document {
    /// Create a new empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a document from fields
    pub fn from_fields(fields: BTreeMap<String, Value>) -> Self {
        Self { fields }
    }

    /// The `_id` field, if assigned
    pub fn id(&self) -> Option<&Value> {
        self.fields.get("_id")
    }

    /// Assign a fresh ObjectId unless `_id` is already present; returns the id
    pub fn ensure_id(&mut self) -> Value {
        self.fields
            .entry("_id".to_string())
            .or_insert_with(|| Value::ObjectId(ObjectId::new()))
            .clone()
    }

    /// Insert a field
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Get a field by key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a mutable field by key
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields.get_mut(key)
    }

    /// Remove a field
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    /// Check if a field exists
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Number of top-level fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over top-level fields
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Get field by path (e.g., "output.crystal.lattice"); numeric segments index arrays
    pub fn get_by_path(&self, path: &str) -> Option<&Value> {
        let parts: Vec<&str> = path.split('.').collect();
        let mut current = self.fields.get(parts[0])?;

        for &part in &parts[1..] {
            match current {
                Value::Object(obj) => {
                    current = obj.get(part)?;
                }
                Value::Array(arr) => {
                    let index = part.parse::<usize>().ok()?;
                    current = arr.get(index)?;
                }
                _ => return None,
            }
        }

        Some(current)
    }

    /// All values reachable by `path`, fanning out over arrays of sub-documents
    /// the way MongoDB resolves dotted field names.
    pub fn lookup_path(&self, path: &str) -> Vec<&Value> {
        let parts: Vec<&str> = path.split('.').collect();
        let mut found = Vec::new();
        if let Some(first) = self.fields.get(parts[0]) {
            collect_path(first, &parts[1..], &mut found);
        }
        found
    }

    /// Set field by path, creating intermediate objects
    pub fn set_by_path(&mut self, path: &str, value: impl Into<Value>) -> Result<(), DocumentError> {
        let parts: Vec<&str> = path.split('.').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(DocumentError::InvalidPath(path.to_string()));
        }

        if parts.len() == 1 {
            self.fields.insert(parts[0].to_string(), value.into());
            return Ok(());
        }

        let parent_path = &parts[..parts.len() - 1];
        let field_name = parts[parts.len() - 1];

        let mut current = self
            .fields
            .entry(parent_path[0].to_string())
            .or_insert_with(|| Value::Object(BTreeMap::new()));

        for &part in &parent_path[1..] {
            match current {
                Value::Object(obj) => {
                    current = obj
                        .entry(part.to_string())
                        .or_insert_with(|| Value::Object(BTreeMap::new()));
                }
                _ => {
                    return Err(DocumentError::InvalidPath(format!(
                        "{}: path traverses non-object",
                        path
                    )));
                }
            }
        }

        match current {
            Value::Object(obj) => {
                obj.insert(field_name.to_string(), value.into());
                Ok(())
            }
            _ => Err(DocumentError::InvalidPath(format!(
                "{}: parent is not an object",
                path
            ))),
        }
    }

    /// Remove the value at `path`, descending into arrays of sub-documents
    pub fn remove_by_path(&mut self, path: &str) {
        let parts: Vec<&str> = path.split('.').collect();
        if parts.len() == 1 {
            self.fields.remove(parts[0]);
            return;
        }
        if let Some(first) = self.fields.get_mut(parts[0]) {
            remove_path(first, &parts[1..]);
        }
    }

    /// Calculate document size in bytes (approximate)
    pub fn size_bytes(&self) -> usize {
        self.fields
            .iter()
            .map(|(k, v)| k.len() + v.size_bytes())
            .sum::<usize>()
    }

    /// Validate document constraints
    pub fn validate(&self) -> Result<(), DocumentError> {
        let size = self.size_bytes();
        if size > MAX_DOCUMENT_SIZE {
            return Err(DocumentError::DocumentTooLarge {
                size,
                max: MAX_DOCUMENT_SIZE,
            });
        }

        let max_depth = self
            .fields
            .values()
            .map(|v| v.nesting_depth())
            .max()
            .unwrap_or(0);

        if max_depth > MAX_NESTING_DEPTH {
            return Err(DocumentError::NestingTooDeep {
                depth: max_depth,
                max: MAX_NESTING_DEPTH,
            });
        }

        Ok(())
    }

    /// Convert to a JSON object value
    pub fn to_json_value(&self) -> JsonValue {
        Value::Object(self.fields.clone()).to_json()
    }

    /// Build a document from a JSON value, which must be an object
    pub fn from_json_value(json: &JsonValue) -> Result<Self, DocumentError> {
        match Value::from(json) {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(DocumentError::NotAnObject(other.type_name())),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String, DocumentError> {
        serde_json::to_string(self).map_err(|e| DocumentError::SerializationError(e.to_string()))
    }

    /// Convert to pretty JSON string
    pub fn to_json_pretty(&self) -> Result<String, DocumentError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DocumentError::SerializationError(e.to_string()))
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        let value: JsonValue = serde_json::from_str(json)
            .map_err(|e| DocumentError::DeserializationError(e.to_string()))?;
        Self::from_json_value(&value)
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

fn collect_path<'a>(value: &'a Value, parts: &[&str], found: &mut Vec<&'a Value>) {
    if parts.is_empty() {
        found.push(value);
        return;
    }

    match value {
        Value::Object(obj) => {
            if let Some(next) = obj.get(parts[0]) {
                collect_path(next, &parts[1..], found);
            }
        }
        Value::Array(arr) => {
            if let Ok(index) = parts[0].parse::<usize>() {
                if let Some(next) = arr.get(index) {
                    collect_path(next, &parts[1..], found);
                }
            }
            for item in arr.iter().filter(|item| item.is_object()) {
                collect_path(item, parts, found);
            }
        }
        _ => {}
    }
}

fn remove_path(value: &mut Value, parts: &[&str]) {
    match value {
        Value::Object(obj) => {
            if parts.len() == 1 {
                obj.remove(parts[0]);
            } else if let Some(next) = obj.get_mut(parts[0]) {
                remove_path(next, &parts[1..]);
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                remove_path(item, parts);
            }
        }
        _ => {}
    }
}

/// Document-related errors
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Document too large: {size} bytes (max: {max})")]
    DocumentTooLarge { size: usize, max: usize },

    #[error("Nesting too deep: {depth} levels (max: {max})")]
    NestingTooDeep { depth: usize, max: usize },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid ObjectId: {0}")]
    InvalidObjectId(String),

    #[error("Expected a JSON object, found {0}")]
    NotAnObject(&'static str),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
