use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    data::DataType,
    dataset::DataSetId,
    dimension::{self, Dimension},
    metadata::AttributeValue,
    variable::VariableId,
};

/// Which state of a DataSet or variable to look at.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaVersion {
    /// The state as of the last successful commit.
    Committed,

    /// Only what the current transaction changes.
    Proposed,

    /// The current transaction's changes layered over the committed state.
    Recent,
}

/// How a variable gets its data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableClass {
    Stored,
    Transform,
    Computational,
    Reference,
}

/// A snapshot of a variable's structure.
///
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VariableSchema {
    pub id: VariableId,
    pub name: String,
    pub class: VariableClass,
    pub data_type: DataType,
    pub dimensions: Vec<Dimension>,
    pub coordinate_systems: Vec<String>,
    pub metadata: IndexMap<String, AttributeValue>,
    pub version: u32,
}

impl VariableSchema {
    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.dimensions
            .iter()
            .map(|dimension| dimension.length.unwrap_or(0))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CoordinateSystemSchema {
    pub name: String,
    pub axes: Vec<VariableId>,
    pub committed: bool,
}

/// A snapshot of a whole DataSet.
///
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DataSetSchema {
    pub id: DataSetId,
    pub name: Option<String>,
    pub provider: String,
    pub version: u32,
    pub variables: Vec<VariableSchema>,
    pub coordinate_systems: Vec<CoordinateSystemSchema>,
}

impl DataSetSchema {
    /// Every dimension used by any variable. Dimensions whose length isn't agreed upon by all
    /// the variables using them have a `None` length.
    ///
    pub fn dimensions(&self) -> Vec<Dimension> {
        dimension::aggregate(
            self.variables
                .iter()
                .flat_map(|variable| variable.dimensions.iter()),
        )
    }

    pub fn variable(&self, id: VariableId) -> Option<&VariableSchema> {
        self.variables.iter().find(|variable| variable.id == id)
    }

    pub fn find(&self, name: &str) -> Option<&VariableSchema> {
        self.variables.iter().find(|variable| variable.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::{dataset::DataSet, errors::Result, options::DataSetOptions};

    #[test]
    fn test_dataset_dimensions() -> Result<()> {
        let dataset = DataSet::new();
        dataset.set_autocommit(false)?;
        dataset.add_variable::<f64>("a", &["t", "x"])?;
        dataset.add_variable::<f64>("b", &["x", "y"])?;

        let schema = dataset.get_schema(SchemaVersion::Recent)?;
        assert_eq!(
            schema.dimensions(),
            vec![
                Dimension::new("t", 0),
                Dimension::new("x", 0),
                Dimension::new("y", 0)
            ]
        );
        assert_eq!(schema.find("b").map(VariableSchema::rank), Some(2));
        assert!(schema.variable(VariableId::Source(7)).is_none());

        Ok(())
    }

    #[test]
    fn test_serialize() -> Result<()> {
        let dataset = DataSet::with_options(DataSetOptions {
            name: Some(String::from("observations")),
            ..DataSetOptions::default()
        });
        let id = dataset.add_variable::<f32>("t", &["time"])?;
        dataset.set_metadata(id, "units", "K")?;

        let schema = dataset.get_schema(SchemaVersion::Committed)?;
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(value["name"], json!("observations"));
        assert_eq!(value["provider"], json!("memory"));
        assert_eq!(value["version"], json!(2));

        let variable = &value["variables"][0];
        assert_eq!(variable["id"], json!({"Source": 0}));
        assert_eq!(variable["class"], json!("Stored"));
        assert_eq!(variable["data_type"], json!("F32"));
        assert_eq!(variable["dimensions"], json!([{"name": "time", "length": 0}]));
        assert_eq!(
            variable["metadata"],
            json!({"Name": {"Str": "t"}, "units": {"Str": "K"}})
        );
        assert_eq!(variable["version"], json!(2));

        Ok(())
    }
}
