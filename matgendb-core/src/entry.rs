//! Computed entries: a composition with a calculated energy

use crate::composition::Composition;
use crate::structure::Structure;
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use std::fmt;

/// Calculated energy of a composition, with the calculation parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedEntry {
    /// Identifier of the source task
    pub entry_id: Option<JsonValue>,
    pub composition: Composition,
    /// Uncorrected total energy in eV
    pub uncorrected_energy: f64,
    pub correction: f64,
    /// Calculation parameters (run type, Hubbard U values, pseudopotentials)
    pub parameters: JsonMap<String, JsonValue>,
    /// Additional properties requested with the entry
    pub data: JsonMap<String, JsonValue>,
    /// Final structure, when requested
    pub structure: Option<Structure>,
}

impl ComputedEntry {
    pub fn new(composition: Composition, energy: f64) -> Self {
        Self {
            entry_id: None,
            composition,
            uncorrected_energy: energy,
            correction: 0.0,
            parameters: JsonMap::new(),
            data: JsonMap::new(),
            structure: None,
        }
    }

    pub fn with_entry_id(mut self, entry_id: impl Into<JsonValue>) -> Self {
        self.entry_id = Some(entry_id.into());
        self
    }

    pub fn with_structure(mut self, structure: Structure) -> Self {
        self.structure = Some(structure);
        self
    }

    /// Corrected total energy
    pub fn energy(&self) -> f64 {
        self.uncorrected_energy + self.correction
    }

    /// Corrected energy per atom; NaN for an empty composition
    pub fn energy_per_atom(&self) -> f64 {
        self.energy() / self.composition.num_atoms()
    }

    pub fn to_json_value(&self) -> JsonValue {
        json!({
            "entry_id": self.entry_id,
            "composition": self.composition.to_json_map(),
            "energy": self.uncorrected_energy,
            "correction": self.correction,
            "parameters": self.parameters,
            "data": self.data,
            "structure": self.structure.as_ref().map(Structure::to_json_value),
        })
    }
}

impl fmt::Display for ComputedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = match &self.entry_id {
            Some(JsonValue::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => "-".to_string(),
        };
        write!(
            f,
            "ComputedEntry {} - {}: energy = {:.4} eV ({:.4} eV/atom), correction = {:.4}",
            id,
            self.composition.reduced_formula(),
            self.energy(),
            self.energy_per_atom(),
            self.correction
        )
    }
}
