//! Integration tests for the query engine
//!
//! Covers:
//! - Package surface (version, root re-export)
//! - Queries with aliases, default criteria and formula criteria
//! - Entries, chemical systems and structures
//! - Persistence and read-only access through a configuration file

use matgendb::query::{Projection, SortOrder};
use matgendb::{
    AccessMode, AliasConfig, Criteria, Database, DbConfig, IngestOptions, Ingestor, Properties,
    QueryEngine, QueryError, QueryOptions, Record, StorageError, TaskDocument,
};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tempfile::TempDir;

// =========================================================================
// Test Helpers
// =========================================================================

fn criteria(value: JsonValue) -> Criteria {
    match value {
        JsonValue::Object(map) => map,
        other => panic!("criteria must be an object, got {}", other),
    }
}

fn crystal(sites: &[(&str, [f64; 3])]) -> JsonValue {
    let sites: Vec<JsonValue> = sites
        .iter()
        .map(|(element, abc)| json!({"species": [{"element": element, "occu": 1}], "abc": abc}))
        .collect();
    json!({
        "lattice": {"matrix": [[4.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 4.0]]},
        "sites": sites,
    })
}

fn task(task_id: i64, state: &str, energy: f64, gap: f64, sites: &[(&str, [f64; 3])]) -> JsonValue {
    json!({
        "task_id": task_id,
        "state": state,
        "run_type": "GGA",
        "is_hubbard": false,
        "hubbards": {},
        "pseudo_potential": {"functional": "PBE", "labels": sites.iter().map(|s| s.0).collect::<Vec<_>>()},
        "input": {"crystal": crystal(sites)},
        "output": {"crystal": crystal(sites), "final_energy": energy},
        "analysis": {"bandgap": gap, "oxide_type": "oxide"},
    })
}

fn sample_tasks() -> Vec<JsonValue> {
    vec![
        task(1, "successful", -14.4, 4.9, &[("Li", [0.0, 0.0, 0.0]), ("Li", [0.5, 0.5, 0.0]), ("O", [0.5, 0.0, 0.0])]),
        task(2, "successful", -1.9, 0.0, &[("Li", [0.0, 0.0, 0.0])]),
        task(3, "successful", -9.8, 0.0, &[("O", [0.0, 0.0, 0.0]), ("O", [0.5, 0.5, 0.5])]),
        task(4, "failed", 0.0, 0.0, &[("Li", [0.0, 0.0, 0.0]), ("O", [0.5, 0.5, 0.5])]),
        task(5, "successful", -38.0, 2.1, &[
            ("Fe", [0.0, 0.0, 0.0]), ("Fe", [0.5, 0.5, 0.5]),
            ("O", [0.5, 0.0, 0.0]), ("O", [0.0, 0.5, 0.0]), ("O", [0.0, 0.0, 0.5]),
        ]),
    ]
}

/// Engine over an in-memory database populated through the ingestor
fn populated_engine() -> QueryEngine {
    let database = Arc::new(Database::in_memory("vasp"));
    let ingestor = Ingestor::new(database.clone(), "tasks", IngestOptions::default()).unwrap();
    for value in sample_tasks() {
        let doc = matgendb::Document::from_json_value(&value).unwrap();
        ingestor.ingest_document(doc).unwrap();
    }
    QueryEngine::new(database, "tasks").unwrap()
}

// =========================================================================
// Package Surface
// =========================================================================

#[test]
fn test_version_and_root_export() {
    assert_eq!(matgendb::VERSION, "0.4.3");
    assert_eq!(matgendb::VERSION, env!("CARGO_PKG_VERSION"));
    let engine: matgendb::QueryEngine = populated_engine();
    assert_eq!(engine.collection_name(), "tasks");
}

// =========================================================================
// Queries
// =========================================================================

#[test]
fn test_query_applies_default_criteria() {
    let engine = populated_engine();
    let results = engine
        .query(["task_id", "pretty_formula"], Some(&Criteria::new()), &QueryOptions::default())
        .unwrap();
    // task 4 failed
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| r["task_id"] != json!(4)));

    let all = engine
        .query(["task_id"], None, &QueryOptions::default())
        .unwrap();
    assert_eq!(all.len(), 5);
}

#[test]
fn test_query_maps_aliases() {
    let engine = populated_engine();
    let results = engine
        .query(
            ["task_id", "energy", "band_gap"],
            Some(&criteria(json!({"band_gap": {"$gt": 1.0}}))),
            &QueryOptions::default().sort_by("energy", SortOrder::Ascending),
        )
        .unwrap();

    let ids: Vec<_> = results.iter().map(|r| r["task_id"].clone()).collect();
    assert_eq!(ids, vec![json!(5), json!(1)]);
    assert_eq!(results.get(1).unwrap()["energy"], json!(-14.4));
    assert_eq!(results.get(1).unwrap()["band_gap"], json!(4.9));
}

#[test]
fn test_formula_criteria() {
    let engine = populated_engine();

    let li2o = engine
        .query_one(["task_id"], Some(&criteria(json!({"reduced_cell_formula": "Li4O2"}))))
        .unwrap()
        .unwrap();
    assert_eq!(li2o["task_id"], json!(1));

    let oxygen = engine
        .query_one(["pretty_formula"], Some(&criteria(json!({"unit_cell_formula": "O2"}))))
        .unwrap()
        .unwrap();
    assert_eq!(oxygen["pretty_formula"], json!("O2"));

    assert!(engine
        .query_one(["task_id"], Some(&criteria(json!({"normalized_formula": "NaCl"}))))
        .unwrap()
        .is_none());
}

#[test]
fn test_query_distinct_and_paging() {
    let engine = populated_engine();
    let systems = engine
        .query_distinct("chemsys", Some(&Criteria::new()))
        .unwrap();
    assert_eq!(systems.len(), 4);

    let page = engine
        .query(
            ["task_id"],
            None,
            &QueryOptions::default()
                .sort_by("task_id", SortOrder::Descending)
                .skip(1)
                .limit(2),
        )
        .unwrap();
    let ids: Vec<_> = page.into_iter().map(|r| r["task_id"].clone()).collect();
    assert_eq!(ids, vec![json!(4), json!(3)]);
}

#[test]
fn test_raw_documents_and_hooks() {
    let mut engine = populated_engine();
    engine.add_result_hook(Arc::new(|record: &mut Record| {
        record.insert("checked".to_string(), json!(true));
    }));
    engine.add_query_hook(Arc::new(|criteria: &mut Criteria, _: &mut Projection| {
        criteria.insert("task_id".to_string(), json!(2));
    }));

    let results = engine
        .query(Properties::All, Some(&Criteria::new()), &QueryOptions::default())
        .unwrap();
    assert_eq!(results.len(), 1);
    let record = results.first().unwrap();
    assert_eq!(record["checked"], json!(true));
    assert_eq!(record["pretty_formula"], json!("Li"));
    assert!(record.contains_key("output"));
}

// =========================================================================
// Entries and Structures
// =========================================================================

#[test]
fn test_get_entries() {
    let engine = populated_engine();
    let entries = engine
        .get_entries(Some(&criteria(json!({"task_id": 1}))), false, &["band_gap"])
        .unwrap();
    assert_eq!(entries.len(), 1);

    let entry = &entries[0];
    assert_eq!(entry.entry_id, Some(json!(1)));
    assert_eq!(entry.composition.reduced_formula(), "Li2O");
    assert!((entry.energy_per_atom() + 4.8).abs() < 1e-9);
    assert_eq!(entry.correction, 0.0);
    assert_eq!(entry.parameters["run_type"], json!("GGA"));
    assert_eq!(entry.parameters["potcar_symbols"], json!(["PBE Li", "PBE Li", "PBE O"]));
    assert_eq!(entry.data["band_gap"], json!(4.9));
    assert_eq!(entry.data["oxide_type"], json!("oxide"));
    assert!(entry.structure.is_none());
}

#[test]
fn test_get_entries_with_structure_for_tasks_without_id() {
    let database = Arc::new(Database::in_memory("vasp"));
    let tasks = database.collection_mut("tasks").unwrap();
    for energy in [-1.9, -2.0] {
        let mut value = task(0, "successful", energy, 0.0, &[("Li", [0.0; 3])]);
        value.as_object_mut().unwrap().remove("task_id");
        let mut doc = matgendb::Document::from_json_value(&value).unwrap();
        TaskDocument::prepare(&mut doc).unwrap();
        tasks.insert_one(doc).unwrap();
    }

    let engine = QueryEngine::new(database, "tasks").unwrap();
    let entries = engine.get_entries(Some(&Criteria::new()), true, &[]).unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.structure.is_none()));
}

#[test]
fn test_get_entries_in_system() {
    let engine = populated_engine();
    let mut ids: Vec<_> = engine
        .get_entries_in_system(&["O", "Li"], true, &[], None)
        .unwrap()
        .into_iter()
        .map(|e| e.entry_id.unwrap())
        .collect();
    ids.sort_by_key(|id| id.as_i64());
    assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);

    let restricted = engine
        .get_entries_in_system(&["Li", "O"], false, &[], Some(&criteria(json!({"nelements": 2}))))
        .unwrap();
    assert_eq!(restricted.len(), 1);
}

#[test]
fn test_get_structure_from_id() {
    let engine = populated_engine();
    let structure = engine.get_structure_from_id(5, true).unwrap();
    assert_eq!(structure.num_sites(), 5);
    assert_eq!(structure.composition().unwrap().reduced_formula(), "Fe2O3");
    assert!((structure.volume() - 64.0).abs() < 1e-9);

    match engine.get_structure_from_id(99, true) {
        Err(QueryError::NotFound(message)) => {
            assert_eq!(message, "No structure found for task_id 99!")
        }
        other => panic!("Expected not found, got {:?}", other),
    }
    // failed tasks are excluded by the default criteria
    assert!(matches!(engine.get_structure_from_id(4, false), Err(QueryError::NotFound(_))));
}

#[test]
fn test_ambiguous_structure_lookup() {
    let database = Arc::new(Database::in_memory("vasp"));
    let tasks = database.collection_mut("tasks").unwrap();
    for _ in 0..2 {
        let doc = matgendb::Document::from_json_value(&task(7, "successful", -1.0, 0.0, &[("Li", [0.0; 3])])).unwrap();
        tasks.insert_one(doc).unwrap();
    }
    let engine = QueryEngine::new(database, "tasks").unwrap();
    match engine.get_structure_from_id(7, true) {
        Err(QueryError::Ambiguous(message)) => {
            assert_eq!(message, "More than one result found for task_id 7!")
        }
        other => panic!("Expected ambiguity, got {:?}", other),
    }
}

// =========================================================================
// Configuration and Persistence
// =========================================================================

#[test]
fn test_from_config_modes() {
    let temp_dir = TempDir::new().unwrap();
    let config = DbConfig {
        data_dir: temp_dir.path().join("data"),
        ..DbConfig::default()
    };
    let config_path = temp_dir.path().join("db.json");
    config.save(&config_path).unwrap();

    {
        let admin = QueryEngine::from_config(&config_path, true).unwrap();
        let ingestor = Ingestor::new(admin.database().clone(), "tasks", IngestOptions::default()).unwrap();
        for value in sample_tasks() {
            ingestor
                .ingest_document(matgendb::Document::from_json_value(&value).unwrap())
                .unwrap();
        }
        assert!(admin.ensure_index("chemsys", false).unwrap());
        admin.close().unwrap();
    }

    let reader = QueryEngine::from_config(&config_path, false).unwrap();
    assert_eq!(reader.database().mode(), AccessMode::ReadOnly);
    assert_eq!(
        reader
            .query(["task_id"], Some(&Criteria::new()), &QueryOptions::default())
            .unwrap()
            .len(),
        4
    );
    assert!(matches!(
        reader.ensure_index("energy", false),
        Err(QueryError::Storage(StorageError::ReadOnly(_)))
    ));
    let stray = matgendb::Document::from_json_value(&json!({"task_id": 100})).unwrap();
    assert!(matches!(reader.collection().insert_one(stray), Err(StorageError::ReadOnly(_))));
    assert_eq!(reader.collection().document_count(), 5);
    assert!(reader.to_string().contains("collection=tasks"));
}

#[test]
fn test_custom_aliases() {
    let mut engine = populated_engine();
    let mut aliases = AliasConfig::empty();
    aliases.aliases.insert("gap".to_string(), "analysis.bandgap".to_string());
    engine.set_aliases_and_defaults(aliases, Some(vec!["gap".to_string(), "task_id".to_string()]));

    // no default criteria any more: the failed task is visible
    let results = engine
        .query(Properties::Default, Some(&Criteria::new()), &QueryOptions::default())
        .unwrap();
    assert_eq!(results.len(), 5);
    assert!(results.iter().all(|r| r.contains_key("gap") && r.len() == 2));

    engine.set_collection("other").unwrap();
    assert_eq!(engine.collection_name(), "other");
    assert!(engine.query(Properties::All, None, &QueryOptions::default()).unwrap().is_empty());
}
