//! Database population from task files
//!
//! Task documents are read from `.json` files (one object or an array of
//! objects) and `.jsonl` files (one object per line), enriched with derived
//! composition fields, given a `task_id` when missing and inserted into the
//! task collection.

use crate::composition::Composition;
use crate::document::{Document, Value};
use crate::error::{QueryError, Result};
use crate::query::Filter;
use crate::storage::{Collection, Database, StorageError};
use crate::structure::Structure;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Counter used to number tasks
pub const TASK_ID_COUNTER: &str = "taskid";

/// Derives the searchable fields of a task document
pub struct TaskDocument;

impl TaskDocument {
    /// Fill `elements`, `nelements`, `chemsys`, `pretty_formula`,
    /// `reduced_cell_formula` and `unit_cell_formula` from the final
    /// structure (`output.crystal`, which also gives `nsites`) or, lacking
    /// one, from an existing `unit_cell_formula`. Always stamps `last_updated`.
    pub fn prepare(doc: &mut Document) -> Result<()> {
        let composition = match doc.get_by_path("output.crystal") {
            Some(crystal) if !crystal.is_null() => {
                let structure = Structure::from_value(crystal)?;
                doc.insert("nsites", structure.num_sites());
                Some(structure.composition()?)
            }
            _ => match doc.get("unit_cell_formula") {
                Some(formula) if !formula.is_null() => Some(Composition::from_value(formula)?),
                _ => None,
            },
        };

        if let Some(composition) = composition {
            let mut elements: Vec<Value> = composition
                .elements()
                .iter()
                .map(|e| Value::from(e.symbol()))
                .collect();
            elements.sort_by(|a, b| a.mongo_cmp(b));

            doc.insert("nelements", elements.len());
            doc.insert("elements", elements);
            doc.insert("chemsys", composition.chemical_system());
            doc.insert("pretty_formula", composition.reduced_formula());
            doc.insert(
                "reduced_cell_formula",
                Value::from(JsonValue::Object(composition.reduced_composition().to_json_map())),
            );
            doc.insert(
                "unit_cell_formula",
                Value::from(JsonValue::Object(composition.to_json_map())),
            );
        }

        doc.insert("last_updated", Utc::now());
        Ok(())
    }
}

/// Ingestion settings
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Files processed concurrently
    pub ncpus: usize,
    /// Replace tasks whose `task_id` already exists instead of skipping them
    pub update_duplicates: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            ncpus: num_cpus::get(),
            update_duplicates: false,
        }
    }
}

/// What happened to one document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted,
    Updated,
    Skipped,
}

/// Summary of an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Source file and message for each failure
    pub errors: Vec<(PathBuf, String)>,
}

impl IngestReport {
    fn record(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Inserted => self.inserted += 1,
            IngestOutcome::Updated => self.updated += 1,
            IngestOutcome::Skipped => self.skipped += 1,
        }
    }

    fn fail(&mut self, path: &Path, message: String) {
        self.failed += 1;
        self.errors.push((path.to_path_buf(), message));
    }

    fn merge(&mut self, other: IngestReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }

    /// Documents that reached the collection
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Inserts task documents into a collection
#[derive(Clone)]
pub struct Ingestor {
    database: Arc<Database>,
    collection: Arc<Collection>,
    options: IngestOptions,
}

impl Ingestor {
    /// Prepare ingestion into `collection`; declares the unique `task_id` index
    pub fn new(database: Arc<Database>, collection: &str, options: IngestOptions) -> Result<Self> {
        let collection = database.collection_mut(collection)?;
        collection.ensure_index("task_id", true)?;
        Ok(Self {
            database,
            collection,
            options,
        })
    }

    /// Prepare, number and store one document
    pub fn ingest_document(&self, mut doc: Document) -> Result<IngestOutcome> {
        TaskDocument::prepare(&mut doc)?;

        let task_id = match doc.get("task_id") {
            Some(id) if !id.is_null() => id.clone(),
            _ => return self.insert_numbered(doc),
        };

        match self.collection.insert_one(doc.clone()) {
            Ok(_) => Ok(IngestOutcome::Inserted),
            Err(StorageError::DuplicateKey { key, .. }) if key == "task_id" => {
                if !self.options.update_duplicates {
                    debug!(task_id = %task_id, "task exists, skipping");
                    return Ok(IngestOutcome::Skipped);
                }
                doc.remove("_id");
                if self.collection.replace_one(&Filter::eq("task_id", task_id), doc)? {
                    Ok(IngestOutcome::Updated)
                } else {
                    Ok(IngestOutcome::Skipped)
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Insert under the next free counter id, stepping past ids already taken
    fn insert_numbered(&self, mut doc: Document) -> Result<IngestOutcome> {
        loop {
            let id = Value::from(self.database.next_sequence(TASK_ID_COUNTER)?);
            doc.insert("task_id", id.clone());
            match self.collection.insert_one(doc.clone()) {
                Ok(_) => return Ok(IngestOutcome::Inserted),
                Err(StorageError::DuplicateKey { key, .. }) if key == "task_id" => {
                    debug!(task_id = %id, "counter id already taken, advancing");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Ingest every task file under `paths`, then persist the database
    pub async fn ingest_paths(&self, paths: &[PathBuf]) -> Result<IngestReport> {
        let run_id = Uuid::new_v4();
        let files = collect_task_files(paths);
        info!(run = %run_id, files = files.len(), ncpus = self.options.ncpus, "ingestion started");

        let permits = Arc::new(Semaphore::new(self.options.ncpus.max(1)));
        let mut tasks = JoinSet::new();
        for file in files {
            let permits = Arc::clone(&permits);
            let ingestor = self.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                ingestor.ingest_file(&file).await
            });
        }

        let mut report = IngestReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(file_report) => report.merge(file_report),
                Err(e) => {
                    warn!(run = %run_id, "ingestion task failed: {}", e);
                    report.failed += 1;
                }
            }
        }

        self.database.flush()?;
        info!(
            run = %run_id,
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            "ingestion finished"
        );
        Ok(report)
    }

    async fn ingest_file(&self, path: &Path) -> IngestReport {
        let mut report = IngestReport::default();
        let documents = match read_task_file(path).await {
            Ok(documents) => documents,
            Err(e) => {
                warn!(path = %path.display(), "unreadable task file: {}", e);
                report.fail(path, e.to_string());
                return report;
            }
        };

        for doc in documents {
            match self.ingest_document(doc) {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    warn!(path = %path.display(), "task rejected: {}", e);
                    report.fail(path, e.to_string());
                }
            }
        }
        debug!(path = %path.display(), inserted = report.inserted, "file ingested");
        report
    }
}

fn is_task_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("jsonl")
    )
}

/// Files named directly plus `.json`/`.jsonl` files found below directories, sorted
pub fn collect_task_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(
                WalkDir::new(path)
                    .follow_links(true)
                    .into_iter()
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.file_type().is_file() && is_task_file(entry.path()))
                    .map(|entry| entry.into_path()),
            );
        } else {
            files.push(path.clone());
        }
    }
    files.sort();
    files.dedup();
    files
}

/// Parse a task file into documents
pub async fn read_task_file(path: &Path) -> Result<Vec<Document>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })?;

    let is_lines = path.extension().and_then(|e| e.to_str()) == Some("jsonl");
    if is_lines {
        return content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Document::from_json(line).map_err(QueryError::from))
            .collect();
    }

    let value: JsonValue = serde_json::from_str(&content).map_err(|e| StorageError::Corrupt {
        path: path.to_path_buf(),
        line: e.line(),
        message: e.to_string(),
    })?;
    match value {
        JsonValue::Array(items) => items
            .iter()
            .map(|item| Document::from_json_value(item).map_err(QueryError::from))
            .collect(),
        other => Ok(vec![Document::from_json_value(&other)?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn task_with_crystal(task_id: Option<i64>) -> Document {
        let mut value = json!({
            "state": "successful",
            "output": {
                "final_energy": -14.4,
                "crystal": {
                    "lattice": {"matrix": [[4.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 4.0]]},
                    "sites": [
                        {"species": [{"element": "Li", "occu": 1}], "abc": [0.0, 0.0, 0.0]},
                        {"species": [{"element": "Li", "occu": 1}], "abc": [0.5, 0.5, 0.0]},
                        {"species": [{"element": "O", "occu": 1}], "abc": [0.5, 0.0, 0.0]},
                    ]
                }
            }
        });
        if let Some(id) = task_id {
            value["task_id"] = json!(id);
        }
        Document::from_json_value(&value).unwrap()
    }

    #[test]
    fn test_prepare_from_structure() {
        let mut doc = task_with_crystal(None);
        TaskDocument::prepare(&mut doc).unwrap();

        assert_eq!(doc.get("pretty_formula").unwrap().as_str(), Some("Li2O"));
        assert_eq!(doc.get("chemsys").unwrap().as_str(), Some("Li-O"));
        assert_eq!(doc.get("nelements").unwrap().as_i64(), Some(2));
        assert_eq!(doc.get("nsites").unwrap().as_i64(), Some(3));
        assert_eq!(doc.get_by_path("unit_cell_formula.Li").unwrap().as_f64(), Some(2.0));
        assert_eq!(doc.get_by_path("reduced_cell_formula.O").unwrap().as_f64(), Some(1.0));
        assert!(matches!(doc.get("last_updated"), Some(Value::DateTime(_))));
    }

    #[test]
    fn test_prepare_from_formula_only() {
        let mut doc = Document::from_json_value(&json!({"unit_cell_formula": {"Fe": 4, "O": 6}})).unwrap();
        TaskDocument::prepare(&mut doc).unwrap();
        assert_eq!(doc.get("pretty_formula").unwrap().as_str(), Some("Fe2O3"));
        assert!(doc.get("nsites").is_none());

        let mut bare = Document::new();
        TaskDocument::prepare(&mut bare).unwrap();
        assert!(bare.get("chemsys").is_none());
        assert!(bare.contains_key("last_updated"));
    }

    #[test]
    fn test_ingest_document_numbers_and_deduplicates() {
        let db = Arc::new(Database::in_memory("vasp"));
        let ingestor = Ingestor::new(db.clone(), "tasks", IngestOptions::default()).unwrap();

        assert_eq!(ingestor.ingest_document(task_with_crystal(None)).unwrap(), IngestOutcome::Inserted);
        assert_eq!(ingestor.ingest_document(task_with_crystal(None)).unwrap(), IngestOutcome::Inserted);
        assert_eq!(ingestor.ingest_document(task_with_crystal(Some(1))).unwrap(), IngestOutcome::Skipped);

        let tasks = db.collection("tasks").unwrap();
        assert_eq!(tasks.document_count(), 2);
        assert_eq!(tasks.count(&Filter::eq("task_id", 2)).unwrap(), 1);
    }

    #[test]
    fn test_update_duplicates_replaces() {
        let db = Arc::new(Database::in_memory("vasp"));
        let options = IngestOptions {
            ncpus: 1,
            update_duplicates: true,
        };
        let ingestor = Ingestor::new(db.clone(), "tasks", options).unwrap();
        ingestor.ingest_document(task_with_crystal(Some(7))).unwrap();

        let mut changed = task_with_crystal(Some(7));
        changed.set_by_path("output.final_energy", -15.0).unwrap();
        assert_eq!(ingestor.ingest_document(changed).unwrap(), IngestOutcome::Updated);

        let tasks = db.collection("tasks").unwrap();
        let stored = tasks.find_one(&Filter::eq("task_id", 7)).unwrap().unwrap();
        assert_eq!(stored.get_by_path("output.final_energy").unwrap().as_f64(), Some(-15.0));
        assert_eq!(tasks.document_count(), 1);
    }

    #[test]
    fn test_counter_ids_skip_explicit_ids() {
        for update_duplicates in [false, true] {
            let db = Arc::new(Database::in_memory("vasp"));
            let options = IngestOptions {
                ncpus: 1,
                update_duplicates,
            };
            let ingestor = Ingestor::new(db.clone(), "tasks", options).unwrap();

            let mut explicit = task_with_crystal(Some(1));
            explicit.insert("name", "explicit");
            ingestor.ingest_document(explicit).unwrap();

            let mut numbered = task_with_crystal(None);
            numbered.insert("name", "numbered");
            assert_eq!(ingestor.ingest_document(numbered).unwrap(), IngestOutcome::Inserted);

            let tasks = db.collection("tasks").unwrap();
            assert_eq!(tasks.document_count(), 2);
            let first = tasks.find_one(&Filter::eq("task_id", 1)).unwrap().unwrap();
            assert_eq!(first.get("name").unwrap().as_str(), Some("explicit"));
            let second = tasks.find_one(&Filter::eq("task_id", 2)).unwrap().unwrap();
            assert_eq!(second.get("name").unwrap().as_str(), Some("numbered"));
        }
    }

    #[tokio::test]
    async fn test_read_task_files() {
        let temp_dir = TempDir::new().unwrap();
        let single = temp_dir.path().join("single.json");
        let array = temp_dir.path().join("array.json");
        let lines = temp_dir.path().join("tasks.jsonl");
        std::fs::write(&single, r#"{"task_id": 1}"#).unwrap();
        std::fs::write(&array, r#"[{"task_id": 2}, {"task_id": 3}]"#).unwrap();
        std::fs::write(&lines, "{\"task_id\": 4}\n\n{\"task_id\": 5}\n").unwrap();

        assert_eq!(read_task_file(&single).await.unwrap().len(), 1);
        assert_eq!(read_task_file(&array).await.unwrap().len(), 2);
        assert_eq!(read_task_file(&lines).await.unwrap().len(), 2);

        std::fs::write(&single, "[1, 2]").unwrap();
        assert!(read_task_file(&single).await.is_err());
    }

    #[test]
    fn test_collect_task_files() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("t1.json"), "{}").unwrap();
        std::fs::write(temp_dir.path().join("t2.jsonl"), "").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "").unwrap();

        let files = collect_task_files(&[temp_dir.path().to_path_buf()]);
        assert_eq!(files.len(), 2);
        assert!(files.iter().all(|f| is_task_file(f)));
    }
}
