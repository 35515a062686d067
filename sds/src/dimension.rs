use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// A named axis.
///
/// `length` is `None` when variables sharing this dimension name disagree about its length.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub length: Option<usize>,
}

impl Dimension {
    pub fn new<S: Into<String>>(name: S, length: usize) -> Self {
        Self {
            name: name.into(),
            length: Some(length),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.length.is_some()
    }
}

/// Pair up dimension names with the lengths of a shape.
pub(crate) fn zip_shape(names: &[String], shape: &[usize]) -> Vec<Dimension> {
    names
        .iter()
        .zip(shape)
        .map(|(name, length)| Dimension::new(name.clone(), *length))
        .collect()
}

/// Check the dimension names given for a new variable: non-empty and distinct.
pub(crate) fn validate_names<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>> {
    let mut validated: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(Error::InvalidArgument(String::from(
                "dimension names must not be empty",
            )));
        }
        if validated.iter().any(|other| other == name) {
            return Err(Error::InvalidArgument(format!(
                "dimension {name} appears more than once"
            )));
        }
        validated.push(name.to_string());
    }

    Ok(validated)
}

/// Aggregate the dimensions of many variables by name, in order of first appearance.
///
/// Dimensions whose lengths disagree come back with a `None` length.
///
pub fn aggregate<'a, I>(dimensions: I) -> Vec<Dimension>
where
    I: IntoIterator<Item = &'a Dimension>,
{
    let mut merged: IndexMap<&str, Option<usize>> = IndexMap::new();
    for dimension in dimensions {
        merged
            .entry(dimension.name.as_str())
            .and_modify(|length| {
                if *length != dimension.length {
                    *length = None;
                }
            })
            .or_insert(dimension.length);
    }

    merged
        .into_iter()
        .map(|(name, length)| Dimension {
            name: name.to_string(),
            length,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate() {
        let dims = vec![
            Dimension::new("x", 4),
            Dimension::new("t", 2),
            Dimension::new("x", 4),
            Dimension::new("t", 3),
            Dimension::new("y", 1),
        ];
        let merged = aggregate(&dims);
        assert_eq!(
            merged,
            vec![
                Dimension::new("x", 4),
                Dimension {
                    name: String::from("t"),
                    length: None
                },
                Dimension::new("y", 1),
            ]
        );
        assert!(!merged[1].is_resolved());
    }

    #[test]
    fn test_validate_names() -> Result<()> {
        assert_eq!(validate_names(&["t", "x"])?, vec!["t", "x"]);
        assert!(validate_names::<&str>(&[])?.is_empty());
        assert!(validate_names(&["x", "x"]).is_err());
        assert!(validate_names(&["x", ""]).is_err());

        Ok(())
    }

    #[test]
    fn test_disagreement_is_sticky() {
        let dims = vec![
            Dimension::new("x", 4),
            Dimension::new("x", 5),
            Dimension::new("x", 4),
        ];
        assert_eq!(aggregate(&dims)[0].length, None);
    }
}
