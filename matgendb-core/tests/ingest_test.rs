//! Integration tests for database population from task files

use matgendb::{
    AccessMode, Criteria, Database, IngestOptions, Ingestor, QueryEngine, QueryOptions,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn li_task(task_id: Option<i64>, energy: f64) -> serde_json::Value {
    let mut task = json!({
        "state": "successful",
        "output": {
            "final_energy": energy,
            "crystal": {
                "lattice": {"matrix": [[3.0, 0.0, 0.0], [0.0, 3.0, 0.0], [0.0, 0.0, 3.0]]},
                "sites": [{"species": [{"element": "Li", "occu": 1}], "abc": [0.0, 0.0, 0.0]}]
            }
        }
    });
    if let Some(id) = task_id {
        task["task_id"] = json!(id);
    }
    task
}

fn write_tasks(dir: &std::path::Path) -> Vec<PathBuf> {
    let runs = dir.join("runs").join("batch1");
    std::fs::create_dir_all(&runs).unwrap();

    std::fs::write(runs.join("a.json"), li_task(Some(10), -1.9).to_string()).unwrap();
    std::fs::write(
        runs.join("b.json"),
        json!([li_task(None, -2.0), li_task(None, -2.1)]).to_string(),
    )
    .unwrap();
    let lines = format!("{}\n{}\nnot json\n", li_task(Some(10), -1.8), li_task(Some(11), -1.7));
    std::fs::write(dir.join("runs").join("more.jsonl"), lines).unwrap();
    std::fs::write(runs.join("README.txt"), "ignored").unwrap();

    vec![dir.join("runs")]
}

#[tokio::test]
async fn test_ingest_directory_tree() {
    let temp_dir = TempDir::new().unwrap();
    let paths = write_tasks(temp_dir.path());

    let database = Arc::new(Database::open(temp_dir.path().join("data"), "vasp", AccessMode::ReadWrite).unwrap());
    let options = IngestOptions {
        ncpus: 2,
        update_duplicates: false,
    };
    let ingestor = Ingestor::new(database.clone(), "tasks", options).unwrap();
    let report = ingestor.ingest_paths(&paths).await.unwrap();

    // the malformed line fails the whole .jsonl file
    assert_eq!(report.inserted, 3);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.errors.len(), 1);

    let reopened = Arc::new(Database::open(temp_dir.path().join("data"), "vasp", AccessMode::ReadOnly).unwrap());
    let engine = QueryEngine::new(reopened, "tasks").unwrap();
    let results = engine
        .query(["task_id", "pretty_formula"], Some(&Criteria::new()), &QueryOptions::default())
        .unwrap();
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r["pretty_formula"] == json!("Li")));
    assert!(results.iter().any(|r| r["task_id"] == json!(10)));
}

#[tokio::test]
async fn test_reingest_skips_or_updates() {
    let temp_dir = TempDir::new().unwrap();
    let file = temp_dir.path().join("tasks.jsonl");
    std::fs::write(
        &file,
        format!("{}\n{}\n", li_task(Some(1), -1.9), li_task(Some(2), -1.8)),
    )
    .unwrap();

    let database = Arc::new(Database::in_memory("vasp"));
    let skipping = Ingestor::new(database.clone(), "tasks", IngestOptions::default()).unwrap();
    let first = skipping.ingest_paths(&[file.clone()]).await.unwrap();
    assert_eq!(first.inserted, 2);
    let second = skipping.ingest_paths(&[file.clone()]).await.unwrap();
    assert_eq!(second.skipped, 2);

    std::fs::write(&file, format!("{}\n", li_task(Some(2), -5.0))).unwrap();
    let updating = Ingestor::new(
        database.clone(),
        "tasks",
        IngestOptions {
            ncpus: 1,
            update_duplicates: true,
        },
    )
    .unwrap();
    let third = updating.ingest_paths(&[file]).await.unwrap();
    assert_eq!(third.updated, 1);
    assert_eq!(third.written(), 1);

    let engine = QueryEngine::new(database, "tasks").unwrap();
    let mut criteria = Criteria::new();
    criteria.insert("task_id".to_string(), json!(2));
    let record = engine.query_one(["energy"], Some(&criteria)).unwrap().unwrap();
    assert_eq!(record["energy"], json!(-5.0));
}

#[tokio::test]
async fn test_ingest_into_read_only_database_fails() {
    let temp_dir = TempDir::new().unwrap();
    let database = Arc::new(Database::open(temp_dir.path(), "vasp", AccessMode::ReadOnly).unwrap());
    assert!(Ingestor::new(database, "tasks", IngestOptions::default()).is_err());
}
