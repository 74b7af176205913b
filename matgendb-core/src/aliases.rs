//! Property aliases and default criteria
//!
//! Queries name properties by short aliases (`energy`, `band_gap`) which are
//! translated to dotted paths in the stored task documents. An alias file is
//! a JSON object `{"aliases": {name: path}, "defaults": {criteria}}`.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use std::path::Path;

/// Alias → document path pairs for the bundled task layout
const TASK_ALIASES: &[(&str, &str)] = &[
    ("energy", "output.final_energy"),
    ("energy_per_atom", "output.final_energy_per_atom"),
    ("structure", "output.crystal"),
    ("final_structure", "output.crystal"),
    ("initial_structure", "input.crystal"),
    ("band_gap", "analysis.bandgap"),
    ("e_above_hull", "analysis.e_above_hull"),
    ("formation_energy_per_atom", "analysis.formation_energy_per_atom"),
    ("oxide_type", "analysis.oxide_type"),
    ("total_magnetization", "analysis.total_magnetization"),
    ("incar", "input.incar"),
    ("kpoints", "input.kpoints"),
    ("potcar", "input.potcar"),
    ("task_id", "task_id"),
    ("chemsys", "chemsys"),
    ("elements", "elements"),
    ("nelements", "nelements"),
    ("nsites", "nsites"),
    ("pretty_formula", "pretty_formula"),
    ("reduced_cell_formula", "reduced_cell_formula"),
    ("unit_cell_formula", "unit_cell_formula"),
    ("run_type", "run_type"),
    ("is_hubbard", "is_hubbard"),
    ("hubbards", "hubbards"),
];

/// Aliases and default criteria
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasConfig {
    /// Alias name → dotted document path
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// Criteria added to every query that does not constrain the same key
    #[serde(default)]
    pub defaults: JsonMap<String, JsonValue>,
}

impl Default for AliasConfig {
    fn default() -> Self {
        let aliases = TASK_ALIASES
            .iter()
            .map(|(name, path)| (name.to_string(), path.to_string()))
            .collect();
        let mut defaults = JsonMap::new();
        defaults.insert("state".to_string(), json!("successful"));
        Self { aliases, defaults }
    }
}

impl AliasConfig {
    /// No aliases and no default criteria
    pub fn empty() -> Self {
        Self {
            aliases: BTreeMap::new(),
            defaults: JsonMap::new(),
        }
    }

    /// Load an alias file (JSON)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AliasConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        if let Some((name, _)) = config.aliases.iter().find(|(_, p)| p.is_empty()) {
            return Err(ConfigError::Invalid(format!("alias {:?} has an empty path", name)));
        }
        Ok(config)
    }

    /// Document path for a property name; unknown names are their own path
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Alias names, sorted
    pub fn names(&self) -> Vec<String> {
        self.aliases.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_bundled_aliases() {
        let config = AliasConfig::default();
        assert_eq!(config.resolve("energy"), "output.final_energy");
        assert_eq!(config.resolve("band_gap"), "analysis.bandgap");
        assert_eq!(config.resolve("task_id"), "task_id");
        assert_eq!(config.resolve("output.crystal"), "output.crystal");
        assert_eq!(config.defaults.get("state"), Some(&json!("successful")));
        assert!(config.names().contains(&"structure".to_string()));
    }

    #[test]
    fn test_load_alias_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("aliases.json");
        std::fs::write(
            &path,
            r#"{"aliases": {"gap": "analysis.bandgap"}, "defaults": {"is_ordered": true}}"#,
        )
        .unwrap();

        let config = AliasConfig::load(&path).unwrap();
        assert_eq!(config.resolve("gap"), "analysis.bandgap");
        assert_eq!(config.resolve("energy"), "energy");
        assert_eq!(config.defaults.get("is_ordered"), Some(&json!(true)));
    }

    #[test]
    fn test_empty_alias_path_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("aliases.json");
        std::fs::write(&path, r#"{"aliases": {"gap": ""}}"#).unwrap();
        assert!(matches!(AliasConfig::load(&path), Err(ConfigError::Invalid(_))));
    }
}
