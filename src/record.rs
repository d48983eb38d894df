//! The structured result of one decode pass

use std::collections::BTreeMap;

/// Mapping from field name to decoded value.
///
/// Three states are distinguishable for a name:
/// * absent - the value is not available for this model or this poll (skipped optional command)
/// * present with `None` - the field exists but could not be computed (missing input, undefined arithmetic)
/// * present with a number
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DecodedRecord {
    values: BTreeMap<String, Option<f64>>,
}

impl DecodedRecord {
    /// Creates an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a value
    pub fn insert<T: Into<String>>(&mut self, name: T, value: Option<f64>) {
        self.values.insert(name.into(), value);
    }

    /// Numeric value of `name`. Absent and null both give `None`, see [Self::entry]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied().flatten()
    }

    /// Raw entry: `None` if absent, `Some(None)` if present but null
    pub fn entry(&self, name: &str) -> Option<Option<f64>> {
        self.values.get(name).copied()
    }

    /// True if `name` is present (even with a null value)
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if nothing was decoded
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates entries in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<f64>)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Moves all entries of `other` into this record
    pub fn extend(&mut self, other: DecodedRecord) {
        self.values.extend(other.values);
    }

    /// Consumes the record
    pub fn into_inner(self) -> BTreeMap<String, Option<f64>> {
        self.values
    }
}

impl FromIterator<(String, Option<f64>)> for DecodedRecord {
    fn from_iter<I: IntoIterator<Item = (String, Option<f64>)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
