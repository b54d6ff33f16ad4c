//! Parameter value representations.
//!
//! Test cases are parameterized over tuples of scalar values. This module
//! defines the scalar sum type and the ordered name→value map every case
//! carries. Order matters: canonical case names and multi-case aggregation
//! both follow the declaration order of the owning generator, so the map is
//! backed by a vector rather than a hash table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single scalar parameter value.
///
/// Directive files carry heterogenous tuples (`values = [1, "1e6", true]`);
/// values that arrive as strings stay strings unless the owning axis is
/// marked `autotype`, in which case numeric- and boolean-looking strings are
/// converted on expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Boolean value
    Bool(bool),

    /// 64-bit signed integer
    Int(i64),

    /// 64-bit floating point
    Float(f64),

    /// String value
    Str(String),
}

impl ParamValue {
    /// Convert a string into the most specific scalar it parses as.
    ///
    /// Used when an axis is declared with `autotype`. Integers win over
    /// floats, floats over booleans, and anything unparseable stays a
    /// string.
    pub fn autotype(s: &str) -> Self {
        if let Ok(i) = s.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return Self::Float(f);
        }
        match s {
            "true" | "True" => Self::Bool(true),
            "false" | "False" => Self::Bool(false),
            _ => Self::Str(s.to_string()),
        }
    }

    /// Try to get this value as an i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get this value as an f64. Integers widen.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get this value as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => {
                // Keep integral floats readable in case names: 100000.0 -> 100000
                if x.fract() == 0.0 && x.abs() < 1e15 {
                    write!(f, "{}", *x as i64)
                } else {
                    write!(f, "{x}")
                }
            }
            Self::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

/// Ordered map of parameter name → value.
///
/// Iteration order is declaration order, which fixes both the canonical
/// case name (`family.a=1.b=2`) and the aggregation order seen by
/// multi-instance base cases.
///
/// A multi-case additionally stores, under each name, the *tuple* of that
/// name's values over its dependencies; see [`ParamMap::insert_tuple`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamMap {
    entries: Vec<(String, ParamSlot)>,
}

/// A slot in a [`ParamMap`]: either one scalar (ordinary case) or the
/// tuple of sibling values (multi-instance base case).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamSlot {
    /// Single scalar value
    Scalar(ParamValue),
    /// Tuple of values aggregated over sibling cases
    Tuple(Vec<ParamValue>),
}

impl ParamMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a scalar value, replacing any prior entry of the same name
    /// in place (order is preserved).
    pub fn insert(&mut self, name: impl Into<String>, value: ParamValue) {
        let name = name.into();
        if let Some(slot) = self.slot_mut(&name) {
            *slot = ParamSlot::Scalar(value);
        } else {
            self.entries.push((name, ParamSlot::Scalar(value)));
        }
    }

    /// Insert an aggregated tuple under a single name.
    pub fn insert_tuple(&mut self, name: impl Into<String>, values: Vec<ParamValue>) {
        let name = name.into();
        if let Some(slot) = self.slot_mut(&name) {
            *slot = ParamSlot::Tuple(values);
        } else {
            self.entries.push((name, ParamSlot::Tuple(values)));
        }
    }

    fn slot_mut(&mut self, name: &str) -> Option<&mut ParamSlot> {
        self.entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s)
    }

    /// Single-name accessor: the scalar bound to `name`, if any.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries.iter().find(|(n, _)| n == name).and_then(
            |(_, slot)| match slot {
                ParamSlot::Scalar(v) => Some(v),
                ParamSlot::Tuple(_) => None,
            },
        )
    }

    /// Tuple accessor: the aggregated values bound to `name`, if any.
    pub fn get_tuple(&self, name: &str) -> Option<&[ParamValue]> {
        self.entries.iter().find(|(n, _)| n == name).and_then(
            |(_, slot)| match slot {
                ParamSlot::Tuple(vs) => Some(vs.as_slice()),
                ParamSlot::Scalar(_) => None,
            },
        )
    }

    /// Name-tuple accessor: values for several names at once, in the order
    /// given. Returns `None` if any name is missing or non-scalar.
    pub fn get_many<'a>(&'a self, names: &[&str]) -> Option<Vec<&'a ParamValue>> {
        names.iter().map(|n| self.get(n)).collect()
    }

    /// Iterate entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamSlot)> {
        self.entries.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// Iterate scalar entries in declaration order, skipping tuples.
    pub fn iter_scalars(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.entries.iter().filter_map(|(n, s)| match s {
            ParamSlot::Scalar(v) => Some((n.as_str(), v)),
            ParamSlot::Tuple(_) => None,
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, ParamValue)> for ParamMap {
    fn from_iter<T: IntoIterator<Item = (String, ParamValue)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (n, v) in iter {
            map.insert(n, v);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autotype_conversions() {
        assert_eq!(ParamValue::autotype("4"), ParamValue::Int(4));
        assert_eq!(ParamValue::autotype("1e6"), ParamValue::Float(1e6));
        assert_eq!(ParamValue::autotype("true"), ParamValue::Bool(true));
        assert_eq!(
            ParamValue::autotype("mesh.exo"),
            ParamValue::Str("mesh.exo".to_string())
        );
    }

    #[test]
    fn display_keeps_integral_floats_short() {
        assert_eq!(ParamValue::Float(1e5).to_string(), "100000");
        assert_eq!(ParamValue::Float(0.25).to_string(), "0.25");
        assert_eq!(ParamValue::Int(-3).to_string(), "-3");
    }

    #[test]
    fn map_preserves_declaration_order() {
        let mut m = ParamMap::new();
        m.insert("np", ParamValue::Int(4));
        m.insert("mesh", ParamValue::from("coarse"));
        m.insert("np", ParamValue::Int(8)); // replace in place
        let names: Vec<&str> = m.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["np", "mesh"]);
        assert_eq!(m.get("np"), Some(&ParamValue::Int(8)));
    }

    #[test]
    fn tuple_slots_are_distinct_from_scalars() {
        let mut m = ParamMap::new();
        m.insert_tuple("np", vec![ParamValue::Int(1), ParamValue::Int(4)]);
        assert!(m.get("np").is_none());
        assert_eq!(
            m.get_tuple("np"),
            Some(&[ParamValue::Int(1), ParamValue::Int(4)][..])
        );
    }

    #[test]
    fn get_many_follows_requested_order() {
        let mut m = ParamMap::new();
        m.insert("a", ParamValue::Int(1));
        m.insert("b", ParamValue::Int(2));
        let vs = m.get_many(&["b", "a"]).unwrap();
        assert_eq!(vs, vec![&ParamValue::Int(2), &ParamValue::Int(1)]);
        assert!(m.get_many(&["a", "missing"]).is_none());
    }
}
