//! Chemical elements and compositions
//!
//! Formulas are parsed into element amounts and rendered back the way
//! materials databases expect: elements ordered by electronegativity,
//! reduced by the greatest common divisor, polyanions grouped.

use serde_json::{Map as JsonMap, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::document::Value;

/// Amounts closer than this to zero or to an integer are treated as such
pub const AMOUNT_TOLERANCE: f64 = 1e-8;

/// Composition errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompositionError {
    #[error("Unknown element symbol: {0}")]
    UnknownElement(String),

    #[error("Invalid formula {formula:?}: {message}")]
    InvalidFormula { formula: String, message: String },

    #[error("Invalid amount for {element}: {amount}")]
    InvalidAmount { element: String, amount: String },
}

/// (symbol, Pauling electronegativity) indexed by atomic number - 1
const ELEMENTS: [(&str, f64); 103] = [
    ("H", 2.20), ("He", f64::INFINITY), ("Li", 0.98), ("Be", 1.57), ("B", 2.04),
    ("C", 2.55), ("N", 3.04), ("O", 3.44), ("F", 3.98), ("Ne", f64::INFINITY),
    ("Na", 0.93), ("Mg", 1.31), ("Al", 1.61), ("Si", 1.90), ("P", 2.19),
    ("S", 2.58), ("Cl", 3.16), ("Ar", f64::INFINITY), ("K", 0.82), ("Ca", 1.00),
    ("Sc", 1.36), ("Ti", 1.54), ("V", 1.63), ("Cr", 1.66), ("Mn", 1.55),
    ("Fe", 1.83), ("Co", 1.88), ("Ni", 1.91), ("Cu", 1.90), ("Zn", 1.65),
    ("Ga", 1.81), ("Ge", 2.01), ("As", 2.18), ("Se", 2.55), ("Br", 2.96),
    ("Kr", 3.00), ("Rb", 0.82), ("Sr", 0.95), ("Y", 1.22), ("Zr", 1.33),
    ("Nb", 1.60), ("Mo", 2.16), ("Tc", 1.90), ("Ru", 2.20), ("Rh", 2.28),
    ("Pd", 2.20), ("Ag", 1.93), ("Cd", 1.69), ("In", 1.78), ("Sn", 1.96),
    ("Sb", 2.05), ("Te", 2.10), ("I", 2.66), ("Xe", 2.60), ("Cs", 0.79),
    ("Ba", 0.89), ("La", 1.10), ("Ce", 1.12), ("Pr", 1.13), ("Nd", 1.14),
    ("Pm", 1.13), ("Sm", 1.17), ("Eu", 1.20), ("Gd", 1.20), ("Tb", 1.10),
    ("Dy", 1.22), ("Ho", 1.23), ("Er", 1.24), ("Tm", 1.25), ("Yb", 1.10),
    ("Lu", 1.27), ("Hf", 1.30), ("Ta", 1.50), ("W", 2.36), ("Re", 1.90),
    ("Os", 2.20), ("Ir", 2.20), ("Pt", 2.28), ("Au", 2.54), ("Hg", 2.00),
    ("Tl", 1.62), ("Pb", 2.33), ("Bi", 2.02), ("Po", 2.00), ("At", 2.20),
    ("Rn", 2.20), ("Fr", 0.70), ("Ra", 0.90), ("Ac", 1.10), ("Th", 1.30),
    ("Pa", 1.50), ("U", 1.38), ("Np", 1.36), ("Pu", 1.28), ("Am", 1.13),
    ("Cm", 1.28), ("Bk", 1.30), ("Cf", 1.30), ("Es", 1.30), ("Fm", 1.30),
    ("Md", 1.30), ("No", 1.30), ("Lr", 1.30),
];

/// Reduced formulas that are conventionally written as molecules
const SPECIAL_FORMULAS: &[(&str, &str)] = &[
    ("LiO", "Li2O2"),
    ("NaO", "Na2O2"),
    ("KO", "K2O2"),
    ("HO", "H2O2"),
    ("CsO", "Cs2O2"),
    ("RbO", "Rb2O2"),
    ("O", "O2"),
    ("N", "N2"),
    ("F", "F2"),
    ("Cl", "Cl2"),
    ("H", "H2"),
];

/// Polyanion grouping applies when the two most electronegative elements differ by less
const POLYANION_ELECTRONEGATIVITY_GAP: f64 = 1.65;

/// A chemical element, ordered by atomic number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Element(u8);

impl Element {
    pub fn from_z(z: u8) -> Option<Self> {
        (1..=ELEMENTS.len() as u8).contains(&z).then_some(Element(z))
    }

    pub fn from_symbol(symbol: &str) -> Result<Self, CompositionError> {
        ELEMENTS
            .iter()
            .position(|(s, _)| *s == symbol)
            .map(|i| Element(i as u8 + 1))
            .ok_or_else(|| CompositionError::UnknownElement(symbol.to_string()))
    }

    pub fn z(self) -> u8 {
        self.0
    }

    pub fn symbol(self) -> &'static str {
        ELEMENTS[self.0 as usize - 1].0
    }

    /// Pauling electronegativity; infinite for He, Ne and Ar
    pub fn electronegativity(self) -> f64 {
        ELEMENTS[self.0 as usize - 1].1
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Element {
    type Err = CompositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Element::from_symbol(s.trim())
    }
}

/// Amount of each element, in atoms
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Composition {
    amounts: BTreeMap<Element, f64>,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from (symbol, amount) pairs; repeated symbols add up
    pub fn from_amounts<'a, I>(amounts: I) -> Result<Self, CompositionError>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut composition = Self::new();
        for (symbol, amount) in amounts {
            composition.add(Element::from_symbol(symbol)?, amount)?;
        }
        Ok(composition)
    }

    /// Build from a stored value: a formula string or a `{symbol: amount}` object
    pub fn from_value(value: &Value) -> Result<Self, CompositionError> {
        match value {
            Value::String(formula) => formula.parse(),
            Value::Object(map) => {
                let mut composition = Self::new();
                for (symbol, amount) in map {
                    let amount = amount.as_f64().ok_or_else(|| CompositionError::InvalidAmount {
                        element: symbol.clone(),
                        amount: amount.to_string(),
                    })?;
                    composition.add(Element::from_symbol(symbol)?, amount)?;
                }
                Ok(composition)
            }
            other => Err(CompositionError::InvalidFormula {
                formula: other.to_string(),
                message: "expected a formula string or an element amount object".to_string(),
            }),
        }
    }

    /// Add atoms of an element
    pub fn add(&mut self, element: Element, amount: f64) -> Result<(), CompositionError> {
        if !amount.is_finite() || amount < -AMOUNT_TOLERANCE {
            return Err(CompositionError::InvalidAmount {
                element: element.symbol().to_string(),
                amount: amount.to_string(),
            });
        }
        let total = self.amounts.entry(element).or_insert(0.0);
        *total += amount;
        if total.abs() < AMOUNT_TOLERANCE {
            self.amounts.remove(&element);
        }
        Ok(())
    }

    /// Amount of `element`, 0 when absent
    pub fn get(&self, element: Element) -> f64 {
        self.amounts.get(&element).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    /// Total number of atoms
    pub fn num_atoms(&self) -> f64 {
        self.amounts.values().sum()
    }

    /// Elements ordered by atomic number
    pub fn elements(&self) -> Vec<Element> {
        self.amounts.keys().copied().collect()
    }

    /// (element, amount) pairs ordered by atomic number
    pub fn iter(&self) -> impl Iterator<Item = (Element, f64)> + '_ {
        self.amounts.iter().map(|(e, a)| (*e, *a))
    }

    /// Elements ordered by electronegativity, ties by symbol
    fn electronegativity_order(&self) -> Vec<Element> {
        let mut elements = self.elements();
        sort_by_electronegativity(&mut elements);
        elements
    }

    /// Full formula with explicit amounts, e.g. `Li2 O1`
    pub fn formula(&self) -> String {
        self.electronegativity_order()
            .into_iter()
            .map(|e| format!("{}{}", e.symbol(), format_amount(self.get(e), false)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Reduced formula and the factor it was reduced by
    pub fn reduced_formula_and_factor(&self) -> (String, f64) {
        let all_integral = self.amounts.values().all(|a| is_integral(*a));
        if !all_integral {
            return (self.formula().replace(' ', ""), 1.0);
        }

        let amounts: Vec<(Element, f64)> = self.iter().map(|(e, a)| (e, a.round())).collect();
        let (formula, factor) = reduce_formula(&amounts);
        match SPECIAL_FORMULAS.iter().find(|(plain, _)| *plain == formula) {
            Some((_, special)) => (special.to_string(), factor / 2.0),
            None => (formula, factor),
        }
    }

    /// Reduced formula, e.g. `Fe2O3` or `Li2O2`
    pub fn reduced_formula(&self) -> String {
        self.reduced_formula_and_factor().0
    }

    /// Composition divided by the reduction factor
    pub fn reduced_composition(&self) -> Composition {
        let (_, factor) = self.reduced_formula_and_factor();
        Composition {
            amounts: self.amounts.iter().map(|(e, a)| (*e, a / factor)).collect(),
        }
    }

    /// Symbols sorted alphabetically and joined with `-`, e.g. `Fe-O`
    pub fn chemical_system(&self) -> String {
        let mut symbols: Vec<&str> = self.amounts.keys().map(|e| e.symbol()).collect();
        symbols.sort_unstable();
        symbols.join("-")
    }

    /// `{symbol: amount}` as stored in task documents
    pub fn to_json_map(&self) -> JsonMap<String, JsonValue> {
        self.amounts
            .iter()
            .map(|(e, a)| (e.symbol().to_string(), JsonValue::from(*a)))
            .collect()
    }
}

impl fmt::Display for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.formula())
    }
}

impl FromStr for Composition {
    type Err = CompositionError;

    fn from_str(formula: &str) -> Result<Self, Self::Err> {
        let chars: Vec<char> = formula.chars().collect();
        let mut parser = FormulaParser {
            formula,
            chars: &chars,
            pos: 0,
        };
        let composition = parser.parse_group(None)?;
        if composition.is_empty() {
            return Err(parser.error("formula contains no elements"));
        }
        Ok(composition)
    }
}

struct FormulaParser<'a> {
    formula: &'a str,
    chars: &'a [char],
    pos: usize,
}

impl FormulaParser<'_> {
    fn error(&self, message: impl Into<String>) -> CompositionError {
        CompositionError::InvalidFormula {
            formula: self.formula.to_string(),
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    /// Parse a sequence of elements and bracketed groups up to `closing` (or the end)
    fn parse_group(&mut self, closing: Option<char>) -> Result<Composition, CompositionError> {
        let mut composition = Composition::new();
        loop {
            self.skip_whitespace();
            let Some(c) = self.peek() else {
                return match closing {
                    Some(close) => Err(self.error(format!("missing closing {:?}", close))),
                    None => Ok(composition),
                };
            };

            match c {
                '(' | '[' => {
                    self.pos += 1;
                    let close = if c == '(' { ')' } else { ']' };
                    let inner = self.parse_group(Some(close))?;
                    let factor = self.parse_amount()?;
                    for (element, amount) in inner.iter() {
                        composition.add(element, amount * factor)?;
                    }
                }
                ')' | ']' => {
                    if closing == Some(c) {
                        self.pos += 1;
                        return Ok(composition);
                    }
                    return Err(self.error(format!("unexpected {:?}", c)));
                }
                c if c.is_ascii_uppercase() => {
                    let start = self.pos;
                    self.pos += 1;
                    while self.peek().is_some_and(|c| c.is_ascii_lowercase()) {
                        self.pos += 1;
                    }
                    let symbol: String = self.chars[start..self.pos].iter().collect();
                    let element = Element::from_symbol(&symbol)?;
                    let amount = self.parse_amount()?;
                    composition.add(element, amount)?;
                }
                other => return Err(self.error(format!("unexpected {:?}", other))),
            }
        }
    }

    /// Optional amount after an element or group; 1 when absent
    fn parse_amount(&mut self) -> Result<f64, CompositionError> {
        self.skip_whitespace();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        if start == self.pos {
            return Ok(1.0);
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map_err(|_| self.error(format!("invalid amount {:?}", text)))
    }
}

fn sort_by_electronegativity(elements: &mut [Element]) {
    elements.sort_by(|a, b| {
        a.electronegativity()
            .total_cmp(&b.electronegativity())
            .then_with(|| a.symbol().cmp(b.symbol()))
    });
}

fn is_integral(amount: f64) -> bool {
    (amount - amount.round()).abs() < AMOUNT_TOLERANCE
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Render an amount: integers without a fraction, others rounded to 8 places.
/// With `ignore_ones` an amount of 1 renders as nothing.
fn format_amount(amount: f64, ignore_ones: bool) -> String {
    if ignore_ones && amount == 1.0 {
        String::new()
    } else if is_integral(amount) {
        format!("{}", amount.round() as i64)
    } else {
        format!("{}", (amount * 1e8).round() / 1e8)
    }
}

/// Reduce integral amounts by their gcd, grouping a trailing polyanion
fn reduce_formula(amounts: &[(Element, f64)]) -> (String, f64) {
    let mut symbols: Vec<Element> = amounts
        .iter()
        .filter(|(_, a)| a.abs() > AMOUNT_TOLERANCE)
        .map(|(e, _)| *e)
        .collect();
    sort_by_electronegativity(&mut symbols);
    let amount_of = |e: Element| {
        amounts
            .iter()
            .find(|(x, _)| *x == e)
            .map(|(_, a)| *a)
            .unwrap_or(0.0)
    };

    let factor = if amounts.iter().all(|(_, a)| a.fract() == 0.0) {
        let g = amounts.iter().fold(0u64, |g, (_, a)| gcd(g, a.abs() as u64));
        if g == 0 {
            1.0
        } else {
            g as f64
        }
    } else {
        1.0
    };

    let mut polyanion = String::new();
    let n = symbols.len();
    if n >= 3 && symbols[n - 1].electronegativity() - symbols[n - 2].electronegativity()
        < POLYANION_ELECTRONEGATIVITY_GAP
    {
        let tail: Vec<(Element, f64)> = symbols[n - 2..]
            .iter()
            .map(|e| (*e, amount_of(*e) / factor))
            .collect();
        let (poly_formula, poly_factor) = reduce_formula(&tail);
        if poly_factor != 1.0 {
            polyanion = format!("({}){}", poly_formula, format_amount(poly_factor, false));
            symbols.truncate(n - 2);
        }
    }

    let mut formula: String = symbols
        .iter()
        .map(|e| format!("{}{}", e.symbol(), format_amount(amount_of(*e) / factor, true)))
        .collect();
    formula.push_str(&polyanion);
    (formula, factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comp(formula: &str) -> Composition {
        formula.parse().unwrap()
    }

    #[test]
    fn test_element_lookup() {
        let fe = Element::from_symbol("Fe").unwrap();
        assert_eq!(fe.z(), 26);
        assert_eq!(fe.symbol(), "Fe");
        assert_eq!(Element::from_z(103).unwrap().symbol(), "Lr");
        assert!(Element::from_z(0).is_none());
        assert!(Element::from_z(104).is_none());
        assert!(matches!(Element::from_symbol("Xx"), Err(CompositionError::UnknownElement(_))));
    }

    #[test]
    fn test_parse_formulas() {
        let c = comp("Fe2(SO4)3");
        assert_eq!(c.get(Element::from_symbol("Fe").unwrap()), 2.0);
        assert_eq!(c.get(Element::from_symbol("S").unwrap()), 3.0);
        assert_eq!(c.get(Element::from_symbol("O").unwrap()), 12.0);
        assert_eq!(c.num_atoms(), 17.0);

        let c = comp("Li0.5CoO2");
        assert_eq!(c.get(Element::from_symbol("Li").unwrap()), 0.5);
        assert_eq!(comp("Li2 O").num_atoms(), 3.0);
        assert_eq!(comp("Ca[OH]2").num_atoms(), 5.0);
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<Composition>().is_err());
        assert!("Fe2(SO4".parse::<Composition>().is_err());
        assert!("Fe2)".parse::<Composition>().is_err());
        assert!("fe2".parse::<Composition>().is_err());
        assert!("Fe1.2.3".parse::<Composition>().is_err());
        assert!(matches!("Qz2".parse::<Composition>(), Err(CompositionError::UnknownElement(_))));
    }

    #[test]
    fn test_reduced_formula() {
        assert_eq!(comp("Li4O2").reduced_formula(), "Li2O");
        assert_eq!(comp("O2Fe2O1").reduced_formula(), "Fe2O3");
        assert_eq!(comp("Fe2(SO4)3").reduced_formula(), "Fe2(SO4)3");
        assert_eq!(comp("Li2Fe2P2O8").reduced_formula(), "LiFePO4");
        assert_eq!(comp("NaCl").reduced_formula(), "NaCl");
    }

    #[test]
    fn test_special_formulas() {
        assert_eq!(comp("O4").reduced_formula_and_factor(), ("O2".to_string(), 2.0));
        assert_eq!(comp("Li2O2").reduced_formula(), "Li2O2");
        assert_eq!(comp("H2O2").reduced_formula(), "H2O2");
        assert_eq!(comp("H2O").reduced_formula(), "H2O");
        assert_eq!(comp("Cl").reduced_formula(), "Cl2");
        assert_eq!(comp("Li4O4").reduced_composition(), comp("Li2O2"));
        assert_eq!(comp("Fe4O6").reduced_composition(), comp("Fe2O3"));
    }

    #[test]
    fn test_non_integral_formula() {
        let c = comp("Li0.5CoO2");
        assert_eq!(c.formula(), "Li0.5 Co1 O2");
        assert_eq!(c.reduced_formula_and_factor(), ("Li0.5Co1O2".to_string(), 1.0));
    }

    #[test]
    fn test_chemical_system_and_dict() {
        let c = comp("Fe2O3");
        assert_eq!(c.chemical_system(), "Fe-O");
        let map = c.to_json_map();
        assert_eq!(map.get("Fe").and_then(JsonValue::as_f64), Some(2.0));

        let from_dict = Composition::from_value(&Value::from(serde_json::json!({"Fe": 2, "O": 3.0})))
            .unwrap();
        assert_eq!(from_dict, c);
        assert!(Composition::from_value(&Value::from(3)).is_err());
    }

    #[test]
    fn test_amount_validation() {
        let mut c = Composition::new();
        let li = Element::from_symbol("Li").unwrap();
        assert!(c.add(li, -1.0).is_err());
        assert!(c.add(li, f64::NAN).is_err());
        c.add(li, 1e-10).unwrap();
        assert!(c.is_empty());
    }
}
