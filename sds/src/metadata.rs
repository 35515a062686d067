//! Ordered attribute dictionaries with a committed view and a proposed overlay.
//!
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    data::Scalar,
    errors::{Error, Result},
    schema::SchemaVersion,
};

/// Reserved key holding a variable's name.
pub const KEY_NAME: &str = "Name";

/// Reserved key holding the value used to fill cells that have never been written.
pub const KEY_MISSING_VALUE: &str = "MissingValue";

/// The values an attribute may take.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    DateTime(DateTime<Utc>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    StrArray(Vec<String>),
    BoolArray(Vec<bool>),
    DateTimeArray(Vec<DateTime<Utc>>),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Str(value) => Some(value),
            _ => None,
        }
    }

    /// Scalar attributes as a `Scalar`, `None` for arrays.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            AttributeValue::Int(value) => Some(Scalar::I64(*value)),
            AttributeValue::Float(value) => Some(Scalar::F64(*value)),
            AttributeValue::Str(value) => Some(Scalar::Str(value.clone())),
            AttributeValue::Bool(value) => Some(Scalar::Bool(*value)),
            AttributeValue::DateTime(value) => Some(Scalar::DateTime(*value)),
            _ => None,
        }
    }
}

macro_rules! attribute_from {
    ($type:ty, $variant:ident) => {
        impl From<$type> for AttributeValue {
            fn from(value: $type) -> Self {
                AttributeValue::$variant(value.into())
            }
        }
    };
}

attribute_from!(i64, Int);
attribute_from!(i32, Int);
attribute_from!(f64, Float);
attribute_from!(f32, Float);
attribute_from!(bool, Bool);
attribute_from!(String, Str);
attribute_from!(&str, Str);
attribute_from!(DateTime<Utc>, DateTime);
attribute_from!(Vec<i64>, IntArray);
attribute_from!(Vec<f64>, FloatArray);
attribute_from!(Vec<String>, StrArray);
attribute_from!(Vec<bool>, BoolArray);
attribute_from!(Vec<DateTime<Utc>>, DateTimeArray);

impl From<Scalar> for AttributeValue {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::F64(value) => AttributeValue::Float(value),
            Scalar::F32(value) => AttributeValue::Float(value as f64),
            Scalar::I64(value) => AttributeValue::Int(value),
            Scalar::I32(value) => AttributeValue::Int(value as i64),
            Scalar::I16(value) => AttributeValue::Int(value as i64),
            Scalar::U8(value) => AttributeValue::Int(value as i64),
            Scalar::Bool(value) => AttributeValue::Bool(value),
            Scalar::Str(value) => AttributeValue::Str(value),
            Scalar::DateTime(value) => AttributeValue::DateTime(value),
        }
    }
}

/// The writable overlay of a `MetadataDictionary`: entries added, changed or removed (`None`)
/// in the current transaction.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetadataChanges {
    entries: IndexMap<String, Option<AttributeValue>>,
}

impl MetadataChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `Some(None)` means the key is being removed.
    pub fn get(&self, key: &str) -> Option<Option<&AttributeValue>> {
        self.entries.get(key).map(Option::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&AttributeValue>)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_ref()))
    }

    pub fn set<S: Into<String>>(&mut self, key: S, value: AttributeValue) -> Result<()> {
        let key = key.into();
        if key == KEY_NAME {
            match value.as_str() {
                Some(name) if !name.is_empty() => {}
                _ => {
                    return Err(Error::InvalidArgument(String::from(
                        "variable name must be a non-empty string",
                    )));
                }
            }
        }
        self.entries.insert(key, Some(value));

        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        if key == KEY_NAME {
            return Err(Error::InvalidArgument(String::from(
                "variable name cannot be removed",
            )));
        }
        self.entries.insert(key.to_string(), None);

        Ok(())
    }

    /// Copy the entries of `source` into `self`, skipping the name and any key in `hidden`.
    ///
    /// Used by derived variables to pick up their source's metadata changes.
    ///
    pub fn filter_changes(&mut self, source: &MetadataChanges, hidden: &[&str]) {
        for (key, value) in &source.entries {
            if key == KEY_NAME || hidden.contains(&key.as_str()) {
                continue;
            }
            self.entries.insert(key.clone(), value.clone());
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

/// An ordered string keyed attribute map.
///
/// Writes never touch the committed entries directly; they land in a `MetadataChanges` overlay
/// which is folded into the committed entries when the owning variable commits.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetadataDictionary {
    committed: IndexMap<String, AttributeValue>,
    changes: MetadataChanges,
}

impl MetadataDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a key in the given view.
    ///
    /// `Proposed` only sees entries changed in the current transaction, `Recent` sees those
    /// changes layered over the committed entries.
    ///
    pub fn get(&self, key: &str, version: SchemaVersion) -> Option<&AttributeValue> {
        match version {
            SchemaVersion::Committed => self.committed.get(key),
            SchemaVersion::Proposed => self.changes.get(key).flatten(),
            SchemaVersion::Recent => match self.changes.get(key) {
                Some(value) => value,
                None => self.committed.get(key),
            },
        }
    }

    pub fn name(&self, version: SchemaVersion) -> Option<&str> {
        self.get(KEY_NAME, version).and_then(AttributeValue::as_str)
    }

    /// All entries visible in the given view, in insertion order.
    pub fn entries(&self, version: SchemaVersion) -> IndexMap<String, AttributeValue> {
        match version {
            SchemaVersion::Committed => self.committed.clone(),
            SchemaVersion::Proposed => self
                .changes
                .iter()
                .filter_map(|(key, value)| value.map(|value| (key.to_string(), value.clone())))
                .collect(),
            SchemaVersion::Recent => {
                let mut entries = self.committed.clone();
                apply(&mut entries, &self.changes);
                entries
            }
        }
    }

    /// Stage a write. Assigning `None` removes the key; removing a key that doesn't exist in
    /// either view does nothing.
    ///
    pub fn set<S: Into<String>>(&mut self, key: S, value: Option<AttributeValue>) -> Result<()> {
        let key = key.into();
        match value {
            Some(value) => self.changes.set(key, value),
            None => {
                if self.committed.contains_key(&key) {
                    self.changes.remove(&key)
                } else if self.changes.get(&key).is_some() {
                    if key == KEY_NAME {
                        return self.changes.remove(&key);
                    }
                    self.changes.entries.shift_remove(&key);
                    Ok(())
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn changes(&self) -> &MetadataChanges {
        &self.changes
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Fold `changes` into the committed entries and clear the overlay.
    pub(crate) fn commit_with(&mut self, changes: &MetadataChanges) {
        apply(&mut self.committed, changes);
        self.changes.clear();
    }

    pub(crate) fn rollback(&mut self) {
        self.changes.clear();
    }
}

fn apply(entries: &mut IndexMap<String, AttributeValue>, changes: &MetadataChanges) {
    for (key, value) in changes.iter() {
        match value {
            Some(value) => {
                entries.insert(key.to_string(), value.clone());
            }
            None => {
                entries.shift_remove(key);
            }
        }
    }
}
