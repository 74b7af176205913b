//! Crystal structures as stored in task documents
//!
//! The stored form is the usual dictionary layout: a lattice matrix plus a
//! list of sites, each carrying species occupancies and fractional
//! coordinates.

use crate::composition::{Composition, CompositionError, Element};
use crate::document::Value;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Value as JsonValue};
use thiserror::Error;

/// Structure errors
#[derive(Debug, Error)]
pub enum StructureError {
    #[error("Invalid structure document: {0}")]
    InvalidDocument(String),

    #[error("Site {index} has neither fractional nor cartesian coordinates")]
    MissingCoordinates { index: usize },

    #[error("Lattice is singular")]
    SingularLattice,

    #[error(transparent)]
    Composition(#[from] CompositionError),
}

/// Lattice vectors as matrix rows, in angstrom
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lattice {
    pub matrix: [[f64; 3]; 3],
}

impl Lattice {
    pub fn new(matrix: [[f64; 3]; 3]) -> Self {
        Self { matrix }
    }

    pub fn cubic(a: f64) -> Self {
        Self::new([[a, 0.0, 0.0], [0.0, a, 0.0], [0.0, 0.0, a]])
    }

    /// Lengths of the three lattice vectors
    pub fn abc(&self) -> [f64; 3] {
        self.matrix.map(|v| norm(&v))
    }

    /// Angles alpha, beta, gamma in degrees
    pub fn angles(&self) -> [f64; 3] {
        let [a, b, c] = &self.matrix;
        let angle = |u: &[f64; 3], v: &[f64; 3]| {
            let cos = (dot(u, v) / (norm(u) * norm(v))).clamp(-1.0, 1.0);
            cos.acos().to_degrees()
        };
        [angle(b, c), angle(a, c), angle(a, b)]
    }

    pub fn volume(&self) -> f64 {
        determinant(&self.matrix).abs()
    }

    pub fn cartesian_coords(&self, frac: &[f64; 3]) -> [f64; 3] {
        let m = &self.matrix;
        [0, 1, 2].map(|j| frac[0] * m[0][j] + frac[1] * m[1][j] + frac[2] * m[2][j])
    }

    pub fn fractional_coords(&self, cart: &[f64; 3]) -> Result<[f64; 3], StructureError> {
        let inv = inverse(&self.matrix).ok_or(StructureError::SingularLattice)?;
        Ok([0, 1, 2].map(|j| cart[0] * inv[0][j] + cart[1] * inv[1][j] + cart[2] * inv[2][j]))
    }
}

/// One species on a site with its occupancy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesOccupancy {
    pub element: String,
    #[serde(default = "full_occupancy")]
    pub occu: f64,
}

fn full_occupancy() -> f64 {
    1.0
}

/// A lattice site
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub species: Vec<SpeciesOccupancy>,
    /// Fractional coordinates
    pub abc: [f64; 3],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub properties: JsonMap<String, JsonValue>,
}

impl Site {
    /// Label, falling back to the species formula
    pub fn species_string(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        self.species
            .iter()
            .map(|s| {
                if s.occu == 1.0 {
                    s.element.clone()
                } else {
                    format!("{}:{}", s.element, s.occu)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Deserialize)]
struct RawSite {
    species: Vec<SpeciesOccupancy>,
    abc: Option<[f64; 3]>,
    xyz: Option<[f64; 3]>,
    label: Option<String>,
    #[serde(default)]
    properties: JsonMap<String, JsonValue>,
}

#[derive(Deserialize)]
struct RawStructure {
    lattice: Lattice,
    sites: Vec<RawSite>,
    #[serde(default)]
    charge: Option<f64>,
}

/// Periodic crystal structure
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    pub lattice: Lattice,
    pub sites: Vec<Site>,
    pub charge: Option<f64>,
}

impl Structure {
    pub fn new(lattice: Lattice, sites: Vec<Site>) -> Self {
        Self {
            lattice,
            sites,
            charge: None,
        }
    }

    /// Read the stored dictionary form. Sites given only in cartesian
    /// coordinates are converted to fractional ones.
    pub fn from_json_value(value: &JsonValue) -> Result<Self, StructureError> {
        let raw: RawStructure = serde_json::from_value(value.clone())
            .map_err(|e| StructureError::InvalidDocument(e.to_string()))?;

        let mut sites = Vec::with_capacity(raw.sites.len());
        for (index, site) in raw.sites.into_iter().enumerate() {
            let abc = match (site.abc, site.xyz) {
                (Some(abc), _) => abc,
                (None, Some(xyz)) => raw.lattice.fractional_coords(&xyz)?,
                (None, None) => return Err(StructureError::MissingCoordinates { index }),
            };
            for species in &site.species {
                Element::from_symbol(&species.element)?;
            }
            sites.push(Site {
                species: site.species,
                abc,
                label: site.label,
                properties: site.properties,
            });
        }

        Ok(Self {
            lattice: raw.lattice,
            sites,
            charge: raw.charge,
        })
    }

    pub fn from_value(value: &Value) -> Result<Self, StructureError> {
        Self::from_json_value(&value.to_json())
    }

    /// The stored dictionary form, with derived lattice parameters and cartesian coordinates
    pub fn to_json_value(&self) -> JsonValue {
        let [a, b, c] = self.lattice.abc();
        let [alpha, beta, gamma] = self.lattice.angles();
        let sites: Vec<JsonValue> = self
            .sites
            .iter()
            .map(|site| {
                json!({
                    "species": site.species,
                    "abc": site.abc,
                    "xyz": self.lattice.cartesian_coords(&site.abc),
                    "label": site.species_string(),
                    "properties": site.properties,
                })
            })
            .collect();

        json!({
            "@module": "pymatgen.core.structure",
            "@class": "Structure",
            "charge": self.charge,
            "lattice": {
                "matrix": self.lattice.matrix,
                "a": a, "b": b, "c": c,
                "alpha": alpha, "beta": beta, "gamma": gamma,
                "volume": self.lattice.volume(),
            },
            "sites": sites,
        })
    }

    pub fn num_sites(&self) -> usize {
        self.sites.len()
    }

    pub fn volume(&self) -> f64 {
        self.lattice.volume()
    }

    /// Sum of site occupancies per element
    pub fn composition(&self) -> Result<Composition, CompositionError> {
        let mut composition = Composition::new();
        for site in &self.sites {
            for species in &site.species {
                composition.add(Element::from_symbol(&species.element)?, species.occu)?;
            }
        }
        Ok(composition)
    }

    pub fn cart_coords(&self) -> Vec<[f64; 3]> {
        self.sites
            .iter()
            .map(|s| self.lattice.cartesian_coords(&s.abc))
            .collect()
    }

    pub fn formula(&self) -> Result<String, CompositionError> {
        Ok(self.composition()?.formula())
    }
}

fn dot(u: &[f64; 3], v: &[f64; 3]) -> f64 {
    u[0] * v[0] + u[1] * v[1] + u[2] * v[2]
}

fn norm(v: &[f64; 3]) -> f64 {
    dot(v, v).sqrt()
}

fn determinant(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn inverse(m: &[[f64; 3]; 3]) -> Option<[[f64; 3]; 3]> {
    let det = determinant(m);
    if det.abs() < 1e-12 {
        return None;
    }
    let cofactor = |r0: usize, r1: usize, c0: usize, c1: usize| {
        m[r0][c0] * m[r1][c1] - m[r0][c1] * m[r1][c0]
    };
    Some([
        [cofactor(1, 2, 1, 2) / det, -cofactor(0, 2, 1, 2) / det, cofactor(0, 1, 1, 2) / det],
        [-cofactor(1, 2, 0, 2) / det, cofactor(0, 2, 0, 2) / det, -cofactor(0, 1, 0, 2) / det],
        [cofactor(1, 2, 0, 1) / det, -cofactor(0, 2, 0, 1) / det, cofactor(0, 1, 0, 1) / det],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rocksalt_lio() -> JsonValue {
        json!({
            "lattice": {"matrix": [[4.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 4.0]]},
            "sites": [
                {"species": [{"element": "Li", "occu": 1}], "abc": [0.0, 0.0, 0.0], "label": "Li"},
                {"species": [{"element": "Li", "occu": 1}], "abc": [0.5, 0.5, 0.0]},
                {"species": [{"element": "O", "occu": 1}], "abc": [0.5, 0.0, 0.0]},
            ]
        })
    }

    #[test]
    fn test_lattice_parameters() {
        let lattice = Lattice::new([[3.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 5.0]]);
        assert_eq!(lattice.abc(), [3.0, 4.0, 5.0]);
        assert!((lattice.volume() - 60.0).abs() < 1e-9);
        for angle in lattice.angles() {
            assert!((angle - 90.0).abs() < 1e-9);
        }

        let hexagonal = Lattice::new([[1.0, 0.0, 0.0], [-0.5, 3f64.sqrt() / 2.0, 0.0], [0.0, 0.0, 2.0]]);
        assert!((hexagonal.angles()[2] - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_fractional_cartesian_inverse() {
        let lattice = Lattice::new([[2.0, 0.0, 0.0], [1.0, 2.0, 0.0], [0.0, 0.5, 3.0]]);
        let frac = [0.25, 0.5, 0.75];
        let back = lattice.fractional_coords(&lattice.cartesian_coords(&frac)).unwrap();
        for (x, y) in frac.iter().zip(back.iter()) {
            assert!((x - y).abs() < 1e-9);
        }
        assert!(matches!(
            Lattice::new([[1.0, 0.0, 0.0]; 3]).fractional_coords(&[0.0; 3]),
            Err(StructureError::SingularLattice)
        ));
    }

    #[test]
    fn test_structure_from_document() {
        let structure = Structure::from_json_value(&rocksalt_lio()).unwrap();
        assert_eq!(structure.num_sites(), 3);
        assert!((structure.volume() - 64.0).abs() < 1e-9);
        assert_eq!(structure.composition().unwrap().reduced_formula(), "Li2O");
        assert_eq!(structure.cart_coords()[1], [2.0, 2.0, 0.0]);
        assert_eq!(structure.sites[1].species_string(), "Li");
    }

    #[test]
    fn test_cartesian_only_sites() {
        let doc = json!({
            "lattice": {"matrix": [[4.0, 0.0, 0.0], [0.0, 4.0, 0.0], [0.0, 0.0, 4.0]]},
            "sites": [{"species": [{"element": "Fe"}], "xyz": [2.0, 1.0, 0.0]}]
        });
        let structure = Structure::from_json_value(&doc).unwrap();
        assert_eq!(structure.sites[0].abc, [0.5, 0.25, 0.0]);
        assert_eq!(structure.sites[0].species[0].occu, 1.0);
    }

    #[test]
    fn test_invalid_structures() {
        assert!(matches!(
            Structure::from_json_value(&json!({"sites": []})),
            Err(StructureError::InvalidDocument(_))
        ));
        let unknown = json!({
            "lattice": {"matrix": [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]},
            "sites": [{"species": [{"element": "Zz"}], "abc": [0.0, 0.0, 0.0]}]
        });
        assert!(matches!(
            Structure::from_json_value(&unknown),
            Err(StructureError::Composition(_))
        ));
    }

    #[test]
    fn test_dictionary_round_trip_keeps_sites() {
        let structure = Structure::from_json_value(&rocksalt_lio()).unwrap();
        let stored = structure.to_json_value();
        assert_eq!(stored["lattice"]["a"], json!(4.0));
        assert_eq!(stored["sites"][2]["label"], json!("O"));
        let restored = Structure::from_json_value(&stored).unwrap();
        assert_eq!(restored.lattice, structure.lattice);
        assert_eq!(restored.num_sites(), 3);
    }
}
