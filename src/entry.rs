//! Normalized directory entries.
//!
//! Every entry leaving the crate, whether it came from a search or is the echo
//! of a write, goes through [`AttributeValue::from_values`]: exactly one value
//! becomes a scalar, anything else stays a list.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::{DirectoryError, Result};

/// Attribute name to value, ordered by name.
pub type AttributeMap = BTreeMap<String, AttributeValue>;

/// A single-valued or multi-valued attribute.
///
/// Serializes untagged, so a single value is a JSON string and a
/// multi-valued attribute is a JSON array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Single(String),
    Multi(Vec<String>),
}

impl AttributeValue {
    /// Applies the collapse rule to a raw value list.
    pub fn from_values(mut values: Vec<String>) -> Self {
        if values.len() == 1 {
            if let Some(value) = values.pop() {
                return AttributeValue::Single(value);
            }
        }
        AttributeValue::Multi(values)
    }

    /// Re-applies the collapse rule, e.g. to a one-element list supplied by a caller.
    pub fn normalized(self) -> Self {
        Self::from_values(self.into_values())
    }

    pub fn into_values(self) -> Vec<String> {
        match self {
            AttributeValue::Single(value) => vec![value],
            AttributeValue::Multi(values) => values,
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            AttributeValue::Single(value) => vec![value.as_str()],
            AttributeValue::Multi(values) => values.iter().map(String::as_str).collect(),
        }
    }

    pub fn first(&self) -> Option<&str> {
        match self {
            AttributeValue::Single(value) => Some(value.as_str()),
            AttributeValue::Multi(values) => values.first().map(String::as_str),
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, AttributeValue::Multi(_))
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Single(value.to_string())
    }
}

impl From<Vec<&str>> for AttributeValue {
    fn from(values: Vec<&str>) -> Self {
        AttributeValue::from_values(values.into_iter().map(str::to_string).collect())
    }
}

/// A directory entry: its DN plus normalized attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attributes: AttributeMap,
}

impl DirectoryEntry {
    /// Builds an entry from already-tagged values, normalizing each one.
    pub fn new<I>(dn: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = (String, AttributeValue)>,
    {
        Self {
            dn: dn.into(),
            attributes: attributes
                .into_iter()
                .map(|(name, value)| (name, value.normalized()))
                .collect(),
        }
    }

    /// Builds an entry from raw value lists as returned by the protocol.
    pub fn from_raw<I>(dn: impl Into<String>, attributes: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        Self {
            dn: dn.into(),
            attributes: attributes
                .into_iter()
                .map(|(name, values)| (name, AttributeValue::from_values(values)))
                .collect(),
        }
    }

    /// Looks up an attribute by name; falls back to a case-insensitive match
    /// since servers are free to return a different casing than requested.
    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name).or_else(|| {
            self.attributes
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
    }

    pub fn first_value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(AttributeValue::first)
    }
}

/// Parses `name=value` pairs into an attribute map. Repeated names
/// accumulate values in the order given.
pub fn attributes_from_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<AttributeMap> {
    let mut raw: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for pair in pairs {
        let pair = pair.as_ref();
        let (name, value) = pair.split_once('=').ok_or_else(|| {
            DirectoryError::ValidationError(format!(
                "attribute '{}' must be written as name=value",
                pair
            ))
        })?;
        let name = name.trim();
        if name.is_empty() {
            return Err(DirectoryError::ValidationError(format!(
                "attribute '{}' has an empty name",
                pair
            )));
        }
        raw.entry(name.to_string()).or_default().push(value.to_string());
    }

    Ok(raw
        .into_iter()
        .map(|(name, values)| (name, AttributeValue::from_values(values)))
        .collect())
}
