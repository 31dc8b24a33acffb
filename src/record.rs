//! The output record assembled by a scan.
//!
//! A [`Record`] maps field names to heterogeneous [`Value`]s. Extractors never
//! touch the record directly: they hand back a [`Fragment`], a list of field
//! updates each tagged with a [`MergePolicy`], and the engine folds it in.
//!
//! # Merge policies
//!
//! - [`MergePolicy::Replace`]: the latest observed value wins. Most fields.
//! - [`MergePolicy::Accumulate`]: numbers are summed, sequences appended,
//!   nested records merged key by key. Used for the atom count, which the
//!   source codes print once per atomic kind or sub-calculation.
//!
//! The policy travels with each update, so an extension author declares it
//! for the fields they write rather than relying on a global table.

use crate::lattice::Lattice;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Raised when an accumulating update cannot be combined with the value
/// already stored under the same key.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot accumulate {incoming} onto {existing} for field '{key}'")]
pub struct MergeError {
    /// Field name
    pub key: String,
    /// Kind of the stored value
    pub existing: &'static str,
    /// Kind of the incoming value
    pub incoming: &'static str,
}

/// How an update combines with an existing field of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// Overwrite whatever is stored.
    #[default]
    Replace,
    /// Sum numbers, append sequences, merge nested records.
    Accumulate,
}

/// An atomic site: a position plus a species label.
///
/// Serialises as `[x, y, z, label]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    /// Position (fractional or Cartesian, depending on the producer)
    pub position: [f64; 3],
    /// Species label, e.g. `"Mg"`
    pub label: String,
}

impl Site {
    /// Creates a site.
    pub fn new(position: [f64; 3], label: impl Into<String>) -> Self {
        Self {
            position,
            label: label.into(),
        }
    }
}

impl Serialize for Site {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeTuple;
        let mut tup = serializer.serialize_tuple(4)?;
        for x in &self.position {
            tup.serialize_element(x)?;
        }
        tup.serialize_element(&self.label)?;
        tup.end()
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Flag such as "run completed"
    Bool(bool),
    /// Integer count
    Int(i64),
    /// Scalar such as an energy
    Float(f64),
    /// Free text
    Text(String),
    /// Integer sequence, e.g. a k-point grid
    Ints(Vec<i64>),
    /// Float sequence, e.g. eigenvalues
    Floats(Vec<f64>),
    /// Unit cell
    Lattice(Lattice),
    /// Atomic positions with labels
    Sites(Vec<Site>),
    /// Nested record, e.g. a timing table
    Record(Record),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Ints(_) => "int list",
            Value::Floats(_) => "float list",
            Value::Lattice(_) => "lattice",
            Value::Sites(_) => "site list",
            Value::Record(_) => "record",
        }
    }

    /// The value as a float; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// The value as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The value as a flag.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Combines `incoming` into `self` under [`MergePolicy::Accumulate`].
    fn accumulate(&mut self, key: &str, incoming: Value) -> Result<(), MergeError> {
        if let (Value::Int(a), Value::Float(b)) = (&*self, &incoming) {
            let widened = *a as f64 + *b;
            *self = Value::Float(widened);
            return Ok(());
        }
        match (&mut *self, incoming) {
            (Value::Int(a), Value::Int(b)) => *a += b,
            (Value::Float(a), Value::Float(b)) => *a += b,
            (Value::Float(a), Value::Int(b)) => *a += b as f64,
            (Value::Ints(a), Value::Ints(b)) => a.extend(b),
            (Value::Floats(a), Value::Floats(b)) => a.extend(b),
            (Value::Sites(a), Value::Sites(b)) => a.extend(b),
            (Value::Record(a), Value::Record(b)) => {
                for (k, v) in b.fields {
                    a.fields.insert(k, v);
                }
            }
            (existing, incoming) => {
                return Err(MergeError {
                    key: key.to_string(),
                    existing: existing.kind(),
                    incoming: incoming.kind(),
                })
            }
        }
        Ok(())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<i64>> for Value {
    fn from(v: Vec<i64>) -> Self {
        Value::Ints(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::Floats(v)
    }
}

impl From<Lattice> for Value {
    fn from(l: Lattice) -> Self {
        Value::Lattice(l)
    }
}

impl From<Vec<Site>> for Value {
    fn from(v: Vec<Site>) -> Self {
        Value::Sites(v)
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::Record(r)
    }
}

/// One pending write into a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    /// Field name
    pub key: String,
    /// New value
    pub value: Value,
    /// How `value` combines with an existing field
    pub policy: MergePolicy,
}

/// The partial result produced by one section extractor.
///
/// # Examples
///
/// ```
/// use chemlog::record::{Fragment, Record};
///
/// let mut record = Record::new();
/// let fragment = Fragment::new().set("energy", -3.5).accumulate("numbAtoms", 2_i64);
/// record.apply(fragment.clone()).unwrap();
/// record.apply(fragment).unwrap();
/// assert_eq!(record.get_f64("energy"), Some(-3.5));
/// assert_eq!(record.get_i64("numbAtoms"), Some(4));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    updates: Vec<FieldUpdate>,
}

impl Fragment {
    /// An empty fragment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a replacing update.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(key, value, MergePolicy::Replace);
        self
    }

    /// Adds an accumulating update.
    pub fn accumulate(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(key, value, MergePolicy::Accumulate);
        self
    }

    /// Adds an update with an explicit policy.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Value>, policy: MergePolicy) {
        self.updates.push(FieldUpdate {
            key: key.into(),
            value: value.into(),
            policy,
        });
    }

    /// True if the fragment carries no updates.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// The pending updates in insertion order.
    pub fn updates(&self) -> &[FieldUpdate] {
        &self.updates
    }
}

impl IntoIterator for Fragment {
    type Item = FieldUpdate;
    type IntoIter = std::vec::IntoIter<FieldUpdate>;

    fn into_iter(self) -> Self::IntoIter {
        self.updates.into_iter()
    }
}

/// Field name to value map with deterministic (sorted) key order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, Value>,
}

impl Record {
    /// An empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Folds a fragment into the record, update by update.
    ///
    /// Updates before a failing one remain applied; the engine discards the
    /// whole record on error, so no caller ever sees the half-merged state.
    pub fn apply(&mut self, fragment: Fragment) -> Result<(), MergeError> {
        for update in fragment {
            self.merge(update)?;
        }
        Ok(())
    }

    /// Folds a single update into the record.
    pub fn merge(&mut self, update: FieldUpdate) -> Result<(), MergeError> {
        let FieldUpdate { key, value, policy } = update;
        match (policy, self.fields.get_mut(&key)) {
            (MergePolicy::Accumulate, Some(existing)) => existing.accumulate(&key, value)?,
            _ => {
                self.fields.insert(key, value);
            }
        }
        Ok(())
    }

    /// The value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Convenience accessor for float (or integer) fields.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    /// Convenience accessor for integer fields.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    /// Convenience accessor for flags.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Convenience accessor for the unit cell.
    pub fn get_lattice(&self, key: &str) -> Option<&Lattice> {
        match self.get(key) {
            Some(Value::Lattice(l)) => Some(l),
            _ => None,
        }
    }

    /// True if `key` is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Fields in sorted key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// JSON rendering of the record.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string_pretty(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => Err(fmt::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_keeps_latest() {
        let mut record = Record::new();
        record.apply(Fragment::new().set("energy", -1.0)).unwrap();
        record.apply(Fragment::new().set("energy", -2.0)).unwrap();
        assert_eq!(record.get_f64("energy"), Some(-2.0));
    }

    #[test]
    fn test_accumulate_on_absent_inserts() {
        let mut record = Record::new();
        record.apply(Fragment::new().accumulate("eigenvalues", vec![1.0, 2.0])).unwrap();
        record.apply(Fragment::new().accumulate("eigenvalues", vec![3.0])).unwrap();
        assert_eq!(record.get("eigenvalues"), Some(&Value::Floats(vec![1.0, 2.0, 3.0])));
    }

    #[test]
    fn test_accumulate_mixed_numbers_widens() {
        let mut record = Record::new();
        record.insert("x", 2_i64);
        record.apply(Fragment::new().accumulate("x", 0.5)).unwrap();
        assert_eq!(record.get("x"), Some(&Value::Float(2.5)));
    }

    #[test]
    fn test_accumulate_type_mismatch() {
        let mut record = Record::new();
        record.insert("flag", true);
        let err = record
            .apply(Fragment::new().accumulate("flag", 1_i64))
            .unwrap_err();
        assert_eq!(err.key, "flag");
        assert_eq!(err.existing, "bool");
        assert_eq!(err.incoming, "int");
    }

    #[test]
    fn test_accumulate_text_is_rejected() {
        let mut record = Record::new();
        record.insert("title", "MgO");
        let err = record
            .apply(Fragment::new().accumulate("title", " bulk"))
            .unwrap_err();
        assert_eq!(err.existing, "text");
        assert_eq!(err.incoming, "text");
        assert_eq!(record.get("title"), Some(&Value::Text("MgO".to_string())));
    }

    #[test]
    fn test_nested_records_merge() {
        let mut inner_a = Record::new();
        inner_a.insert("cp2k", 10.0);
        let mut inner_b = Record::new();
        inner_b.insert("qs_energies", 4.0);

        let mut record = Record::new();
        record.apply(Fragment::new().accumulate("timings", inner_a)).unwrap();
        record.apply(Fragment::new().accumulate("timings", inner_b)).unwrap();

        match record.get("timings") {
            Some(Value::Record(r)) => assert_eq!(r.len(), 2),
            other => panic!("Expected nested record, got {:?}", other),
        }
    }

    #[test]
    fn test_json_is_sorted() {
        let mut record = Record::new();
        record.insert("zeta", 1_i64);
        record.insert("alpha", true);
        record.insert("site", vec![Site::new([0.0, 0.5, 0.5], "Mg")]);
        assert_eq!(
            record.to_json().unwrap(),
            r#"{"alpha":true,"site":[[0.0,0.5,0.5,"Mg"]],"zeta":1}"#
        );
    }
}
