//! Query engine over a task collection
//!
//! Translates alias-based criteria into document criteria, runs them
//! against the task collection and maps the results back onto property
//! names, entries and structures.

use crate::aliases::AliasConfig;
use crate::composition::{Composition, Element};
use crate::config::DbConfig;
use crate::document::Value;
use crate::entry::ComputedEntry;
use crate::error::{QueryError, Result};
use crate::query::{Projection, Query, QueryParser, Sort, SortOrder};
use crate::results::{PropertyPaths, QueryListResults, QueryResults, Record, ResultHook};
use crate::storage::{AccessMode, Collection, Database};
use crate::structure::Structure;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Criteria as a JSON object
pub type Criteria = JsonMap<String, JsonValue>;

/// Rewrites the parsed criteria and projection before a query runs
pub type QueryHook = Arc<dyn Fn(&mut Criteria, &mut Projection) + Send + Sync>;

/// Systems larger than this would expand into too many sub-systems
pub const MAX_SYSTEM_ELEMENTS: usize = 20;

/// Which properties a query returns
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Properties {
    /// The engine's default properties
    #[default]
    Default,
    /// Whole documents, unmapped
    All,
    /// Named properties, mapped into records
    Names(Vec<String>),
    /// Property → include flag. All-include selections map like `Names`;
    /// all-exclude selections return the remaining documents unmapped.
    Selection(Vec<(String, bool)>),
}

impl<S: Into<String>> From<Vec<S>> for Properties {
    fn from(names: Vec<S>) -> Self {
        Properties::Names(names.into_iter().map(Into::into).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Properties {
    fn from(names: [&str; N]) -> Self {
        Properties::Names(names.iter().map(|s| s.to_string()).collect())
    }
}

/// Sorting and paging for a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Property (alias or path) and direction, applied in order
    pub sort: Vec<(String, SortOrder)>,
    pub skip: u64,
    /// 0 means no limit
    pub limit: u64,
}

impl QueryOptions {
    pub fn sort_by(mut self, property: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((property.into(), order));
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }
}

/// Query engine for a task collection
pub struct QueryEngine {
    database: Arc<Database>,
    collection: Arc<Collection>,
    aliases: AliasConfig,
    default_properties: Vec<String>,
    query_hooks: Vec<QueryHook>,
    result_hooks: Vec<ResultHook>,
}

impl QueryEngine {
    /// Engine over `collection` of `database`, with the bundled aliases and default criteria
    pub fn new(database: Arc<Database>, collection: &str) -> Result<Self> {
        let collection = database.collection(collection)?;
        let aliases = AliasConfig::default();
        let default_properties = aliases.names();
        Ok(Self {
            database,
            collection,
            aliases,
            default_properties,
            query_hooks: Vec::new(),
            result_hooks: Vec::new(),
        })
    }

    /// Open the database named by `config` in the given mode
    pub fn open(config: &DbConfig, mode: AccessMode) -> Result<Self> {
        config.validate()?;
        let database = Database::open(&config.data_dir, &config.database, mode)?;
        let engine = Self::new(Arc::new(database), &config.collection)?;
        match &config.aliases_config {
            Some(path) => Ok(engine.with_aliases(AliasConfig::load(path)?)),
            None => Ok(engine),
        }
    }

    /// Open from a configuration file; `use_admin` opens read-write, otherwise read-only
    pub fn from_config<P: AsRef<Path>>(path: P, use_admin: bool) -> Result<Self> {
        let config = DbConfig::load(path)?;
        let mode = if use_admin {
            AccessMode::ReadWrite
        } else {
            AccessMode::ReadOnly
        };
        Self::open(&config, mode)
    }

    /// Replace aliases and default criteria; default properties become the alias names
    pub fn with_aliases(mut self, aliases: AliasConfig) -> Self {
        self.set_aliases_and_defaults(aliases, None);
        self
    }

    pub fn set_aliases_and_defaults(&mut self, aliases: AliasConfig, default_properties: Option<Vec<String>>) {
        self.default_properties = default_properties.unwrap_or_else(|| aliases.names());
        self.aliases = aliases;
    }

    pub fn add_query_hook(&mut self, hook: QueryHook) {
        self.query_hooks.push(hook);
    }

    pub fn add_result_hook(&mut self, hook: ResultHook) {
        self.result_hooks.push(hook);
    }

    /// Switch to another collection of the same database
    pub fn set_collection(&mut self, name: &str) -> Result<()> {
        self.collection = self.database.collection(name)?;
        Ok(())
    }

    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    pub fn aliases(&self) -> &AliasConfig {
        &self.aliases
    }

    pub fn default_properties(&self) -> &[String] {
        &self.default_properties
    }

    /// Translate alias-based criteria into document criteria.
    ///
    /// `None` yields empty criteria without defaults. Otherwise each default
    /// criterion whose key the input does not set is added, and each key is
    /// translated: formula keys become `pretty_formula` (and per-element
    /// amounts for `unit_cell_formula`), `$or`/`$and` members are translated
    /// recursively, and other keys go through the aliases.
    pub fn parse_criteria(&self, criteria: Option<&Criteria>) -> Result<Criteria> {
        let Some(criteria) = criteria else {
            return Ok(Criteria::new());
        };

        let mut parsed = Criteria::new();
        for (key, value) in &self.aliases.defaults {
            if !criteria.contains_key(key) {
                parsed.insert(self.aliases.resolve(key).to_string(), value.clone());
            }
        }

        for (key, value) in criteria {
            match key.as_str() {
                "normalized_formula" | "reduced_cell_formula" => {
                    let composition = Composition::from_value(&Value::from(value))?;
                    parsed.insert("pretty_formula".to_string(), json!(composition.reduced_formula()));
                }
                "unit_cell_formula" => {
                    let composition = Composition::from_value(&Value::from(value))?;
                    let base = self.aliases.resolve(key);
                    for (element, amount) in composition.iter() {
                        parsed.insert(format!("{}.{}", base, element.symbol()), json!(amount));
                    }
                    parsed.insert("nelements".to_string(), json!(composition.elements().len()));
                    parsed.insert("pretty_formula".to_string(), json!(composition.reduced_formula()));
                }
                "$or" | "$and" => {
                    let members = value.as_array().ok_or_else(|| {
                        QueryError::InvalidArgument(format!("{} expects an array of criteria", key))
                    })?;
                    let translated = members
                        .iter()
                        .map(|member| {
                            let member = member.as_object().ok_or_else(|| {
                                QueryError::InvalidArgument(format!("{} members must be objects", key))
                            })?;
                            Ok(JsonValue::Object(self.parse_criteria(Some(member))?))
                        })
                        .collect::<Result<Vec<_>>>()?;
                    parsed.insert(key.clone(), JsonValue::Array(translated));
                }
                _ => {
                    parsed.insert(self.aliases.resolve(key).to_string(), value.clone());
                }
            }
        }
        Ok(parsed)
    }

    /// Projection on aliased paths plus the property → path-segments map.
    /// `None` when whole documents are returned unmapped.
    pub fn parse_properties(&self, properties: &Properties) -> Result<(Option<Projection>, Option<PropertyPaths>)> {
        let names: Vec<String> = match properties {
            Properties::All => return Ok((None, None)),
            Properties::Default => self.default_properties.clone(),
            Properties::Names(names) => names.clone(),
            Properties::Selection(selection) => {
                let included = selection.iter().filter(|(_, include)| *include).count();
                if included == 0 {
                    let projection = selection
                        .iter()
                        .fold(Projection::new(), |p, (name, _)| p.exclude(self.aliases.resolve(name)));
                    return Ok((Some(projection), None));
                }
                if included != selection.len() {
                    return Err(QueryError::InvalidArgument(
                        "cannot mix included and excluded properties".to_string(),
                    ));
                }
                selection.iter().map(|(name, _)| name.clone()).collect()
            }
        };

        let mut projection = Projection::new();
        let mut paths = PropertyPaths::with_capacity(names.len());
        for name in names {
            let path = self.aliases.resolve(&name).to_string();
            let segments = path.split('.').map(String::from).collect();
            projection = projection.include(path);
            if !paths.iter().any(|(existing, _)| *existing == name) {
                paths.push((name, segments));
            }
        }
        Ok((Some(projection), Some(paths)))
    }

    fn build_query(&self, properties: &Properties, criteria: Option<&Criteria>, options: &QueryOptions) -> Result<(Query, Option<PropertyPaths>)> {
        let mut criteria = self.parse_criteria(criteria)?;
        let (projection, paths) = self.parse_properties(properties)?;
        let mut projection = projection.unwrap_or_default();
        for hook in &self.query_hooks {
            hook(&mut criteria, &mut projection);
        }

        let filter = QueryParser::parse_filter(&JsonValue::Object(criteria))?;
        let mut query = Query::with_filter(filter);
        if !projection.fields.is_empty() {
            query = query.projection(projection);
        }
        if !options.sort.is_empty() {
            let sort = options
                .sort
                .iter()
                .fold(Sort::new(), |s, (name, order)| s.add(self.aliases.resolve(name), *order));
            query = query.sort(sort);
        }
        if options.skip > 0 {
            query = query.skip(options.skip);
        }
        if options.limit > 0 {
            query = query.limit(options.limit);
        }
        QueryParser::validate(&query)?;
        Ok((query, paths))
    }

    /// Run a query and map the documents onto the requested properties
    pub fn query(&self, properties: impl Into<Properties>, criteria: Option<&Criteria>, options: &QueryOptions) -> Result<QueryResults> {
        let (query, paths) = self.build_query(&properties.into(), criteria, options)?;
        debug!(collection = self.collection_name(), filter = ?query.filter, "running query");
        let documents = self.collection.find(&query)?;
        Ok(QueryResults::new(documents, paths.as_ref(), &self.result_hooks))
    }

    /// First mapped record, if any
    pub fn query_one(&self, properties: impl Into<Properties>, criteria: Option<&Criteria>) -> Result<Option<Record>> {
        let options = QueryOptions::default().limit(1);
        Ok(self.query(properties, criteria, &options)?.into_iter().next())
    }

    /// Distinct values of a property among matching documents
    pub fn query_distinct(&self, key: &str, criteria: Option<&Criteria>) -> Result<QueryListResults> {
        let (query, _) = self.build_query(&Properties::All, criteria, &QueryOptions::default())?;
        let values = self.collection.distinct(self.aliases.resolve(key), &query.filter)?;
        Ok(QueryListResults::new(values.iter().map(Value::to_json).collect()))
    }

    /// Computed entries for the tasks matching `criteria`. Each entry carries
    /// the requested optional data plus `oxide_type`.
    pub fn get_entries(&self, criteria: Option<&Criteria>, inc_structure: bool, optional_data: &[&str]) -> Result<Vec<ComputedEntry>> {
        let mut data_keys: Vec<String> = optional_data.iter().map(|s| s.to_string()).collect();
        if !data_keys.iter().any(|k| k == "oxide_type") {
            data_keys.push("oxide_type".to_string());
        }

        let mut fields = data_keys.clone();
        fields.extend(
            [
                "task_id",
                "unit_cell_formula",
                "energy",
                "is_hubbard",
                "hubbards",
                "pseudo_potential.labels",
                "pseudo_potential.functional",
                "run_type",
            ]
            .iter()
            .map(|s| s.to_string()),
        );

        let mut entries = Vec::new();
        for record in self.query(fields, criteria, &QueryOptions::default())? {
            let task_id = record.get("task_id").cloned().unwrap_or(JsonValue::Null);
            let Some(energy) = record.get("energy").and_then(JsonValue::as_f64) else {
                warn!(task_id = %task_id, "skipping task without an energy");
                continue;
            };
            let composition = match record.get("unit_cell_formula") {
                Some(formula) if !formula.is_null() => Composition::from_value(&Value::from(formula))?,
                _ => {
                    warn!(task_id = %task_id, "skipping task without a unit cell formula");
                    continue;
                }
            };

            let functional = record
                .get("pseudo_potential.functional")
                .and_then(JsonValue::as_str)
                .unwrap_or_default();
            let potcar_symbols: Vec<JsonValue> = record
                .get("pseudo_potential.labels")
                .and_then(JsonValue::as_array)
                .map(|labels| {
                    labels
                        .iter()
                        .filter_map(JsonValue::as_str)
                        .map(|label| json!(format!("{} {}", functional, label)))
                        .collect()
                })
                .unwrap_or_default();

            let mut entry = ComputedEntry::new(composition, energy).with_entry_id(task_id.clone());
            for key in ["run_type", "is_hubbard", "hubbards"] {
                entry
                    .parameters
                    .insert(key.to_string(), record.get(key).cloned().unwrap_or(JsonValue::Null));
            }
            entry
                .parameters
                .insert("potcar_symbols".to_string(), JsonValue::Array(potcar_symbols));
            for key in &data_keys {
                entry
                    .data
                    .insert(key.clone(), record.get(key).cloned().unwrap_or(JsonValue::Null));
            }

            if inc_structure {
                if task_id.is_null() {
                    warn!("task without a task_id, entry built without a structure");
                } else {
                    let structure = self.get_structure_from_id(task_id, true)?;
                    entry = entry.with_structure(structure);
                }
            }
            entries.push(entry);
        }

        debug!(count = entries.len(), "entries built");
        Ok(entries)
    }

    /// Entries for every sub-system of `elements`, e.g. `Li`, `O` and `Li-O` for `["Li", "O"]`
    pub fn get_entries_in_system(
        &self,
        elements: &[&str],
        inc_structure: bool,
        optional_data: &[&str],
        additional_criteria: Option<&Criteria>,
    ) -> Result<Vec<ComputedEntry>> {
        let mut criteria = Criteria::new();
        criteria.insert(
            "chemsys".to_string(),
            json!({ "$in": chemical_subsystems(elements)? }),
        );
        if let Some(additional) = additional_criteria {
            for (key, value) in additional {
                criteria.insert(key.clone(), value.clone());
            }
        }
        self.get_entries(Some(&criteria), inc_structure, optional_data)
    }

    /// Final (or initial) structure of a task. Fails unless exactly one task matches.
    pub fn get_structure_from_id(&self, task_id: impl Into<JsonValue>, final_structure: bool) -> Result<Structure> {
        let task_id = task_id.into();
        let field = if final_structure {
            "output.crystal"
        } else {
            "input.crystal"
        };

        let mut criteria = Criteria::new();
        criteria.insert("task_id".to_string(), task_id.clone());
        let results = self.query(vec![field], Some(&criteria), &QueryOptions::default())?;

        match results.len() {
            0 => Err(QueryError::NotFound(format!(
                "No structure found for task_id {}!",
                display_id(&task_id)
            ))),
            1 => {
                let crystal = results
                    .first()
                    .and_then(|r| r.get(field))
                    .cloned()
                    .unwrap_or(JsonValue::Null);
                Ok(Structure::from_json_value(&crystal)?)
            }
            _ => Err(QueryError::Ambiguous(format!(
                "More than one result found for task_id {}!",
                display_id(&task_id)
            ))),
        }
    }

    /// Declare an index on the task collection; fails on a read-only database
    pub fn ensure_index(&self, key: &str, unique: bool) -> Result<bool> {
        let collection = self.database.collection_mut(self.collection_name())?;
        let created = collection.ensure_index(key, unique)?;
        if created {
            info!(collection = self.collection_name(), key, unique, "index created");
        }
        Ok(created)
    }

    /// Persist pending writes
    pub fn close(&self) -> Result<()> {
        let written = self.database.flush()?;
        debug!(collections = written, "query engine closed");
        Ok(())
    }
}

impl fmt::Display for QueryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = self
            .database
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string());
        write!(
            f,
            "QueryEngine(path={}, database={}, collection={})",
            location,
            self.database.name(),
            self.collection_name()
        )
    }
}

impl fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryEngine")
            .field("database", &self.database)
            .field("collection", &self.collection_name())
            .field("aliases", &self.aliases.aliases.len())
            .field("query_hooks", &self.query_hooks.len())
            .field("result_hooks", &self.result_hooks.len())
            .finish()
    }
}

fn display_id(task_id: &JsonValue) -> String {
    match task_id {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Chemical systems of every non-empty subset of `elements`
pub fn chemical_subsystems(elements: &[&str]) -> Result<Vec<String>> {
    let unique: BTreeSet<&str> = elements.iter().copied().collect();
    for symbol in &unique {
        Element::from_symbol(symbol)?;
    }
    if unique.len() > MAX_SYSTEM_ELEMENTS {
        return Err(QueryError::InvalidArgument(format!(
            "a system of {} elements has too many sub-systems (at most {})",
            unique.len(),
            MAX_SYSTEM_ELEMENTS
        )));
    }

    let symbols: Vec<&str> = unique.into_iter().collect();
    let mut systems: Vec<String> = (1u32..(1 << symbols.len()))
        .map(|mask| {
            symbols
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, s)| *s)
                .collect::<Vec<_>>()
                .join("-")
        })
        .collect();
    systems.sort_by(|a, b| a.matches('-').count().cmp(&b.matches('-').count()).then(a.cmp(b)));
    Ok(systems)
}
