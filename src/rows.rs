//! The projected row shared by every stage after the mapper.
//!
//! Fields are kept in a [`BTreeMap`] so equality, hashing and serialization are
//! independent of the order in which fields were inserted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectedRow(BTreeMap<String, String>);

impl ProjectedRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a row by zipping `headers` with `values`; missing values become `""`.
    pub fn from_pairs(headers: &[String], values: &[String]) -> Self {
        headers
            .iter()
            .enumerate()
            .map(|(idx, header)| {
                (
                    header.clone(),
                    values.get(idx).cloned().unwrap_or_default(),
                )
            })
            .collect()
    }

    /// Returns the value for `field`, or `""` when the field is absent.
    pub fn get(&self, field: &str) -> &str {
        self.0.get(field).map(String::as_str).unwrap_or("")
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Lays the row out positionally in `headers` order, for writing.
    pub fn values_for(&self, headers: &[String]) -> Vec<String> {
        headers.iter().map(|h| self.get(h).to_string()).collect()
    }
}

impl<K, V> FromIterator<(K, V)> for ProjectedRow
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
