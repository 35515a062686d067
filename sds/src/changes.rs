//! Pending transaction records, per variable (`Changes`) and DataSet wide (`Changeset`).
//!
use std::cmp;

use crate::{
    dataset::DataSetId, geom::Rectangle, metadata::MetadataChanges, schema::DataSetSchema,
    schema::VariableSchema, variable::VariableId,
};

/// The delta one variable proposes in the current transaction.
///
#[derive(Clone, Debug, PartialEq)]
pub struct Changes {
    pub variable: VariableId,

    /// The version the variable will have once these changes are committed
    pub version: u32,

    /// The variable's committed schema when the transaction started
    pub initial_schema: VariableSchema,

    pub metadata: MetadataChanges,

    /// Whether any data has been written
    pub has_data: bool,

    /// The proposed shape. Never smaller than the committed shape along any axis.
    pub shape: Vec<usize>,

    /// Bounding box of every region written in this transaction. A superset of the cells that
    /// actually changed.
    pub affected: Option<Rectangle>,
}

impl Changes {
    pub fn new(initial_schema: VariableSchema) -> Self {
        Self {
            variable: initial_schema.id,
            version: initial_schema.version + 1,
            shape: initial_schema.shape(),
            initial_schema,
            metadata: MetadataChanges::new(),
            has_data: false,
            affected: None,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// The affected region, or an empty rectangle if no data was written.
    pub fn affected_rectangle(&self) -> Rectangle {
        match &self.affected {
            Some(rectangle) => rectangle.clone(),
            None => Rectangle::new(vec![0; self.rank()], vec![0; self.rank()]),
        }
    }

    /// Whether the proposed shape differs from the committed one.
    pub fn shape_changed(&self) -> bool {
        self.shape != self.initial_schema.shape()
    }

    /// Record a write to `region`, growing the proposed shape so it contains the region.
    pub(crate) fn stage_write(&mut self, region: &Rectangle) {
        for (len, end) in self.shape.iter_mut().zip(region.end()) {
            *len = cmp::max(*len, end);
        }
        self.affected = Some(match &self.affected {
            Some(affected) => affected.bounding_box(region),
            None => region.clone(),
        });
        self.has_data = true;
    }

    /// Grow the proposed shape to at least `shape` along every axis without marking any region
    /// as written.
    pub(crate) fn stage_extent(&mut self, shape: &[usize]) {
        for (len, other) in self.shape.iter_mut().zip(shape) {
            *len = cmp::max(*len, *other);
        }
    }
}

/// Every variable's pending `Changes` for one commit attempt, indexed by variable.
///
/// Built fresh when a commit starts. Dependent variables read their source's entry and add
/// their own with `update_changes`.
///
#[derive(Clone, Debug)]
pub struct Changeset {
    schema: DataSetSchema,
    entries: Vec<Option<Changes>>,
}

impl Changeset {
    pub(crate) fn new(schema: DataSetSchema) -> Self {
        Self {
            schema,
            entries: vec![],
        }
    }

    pub fn dataset(&self) -> DataSetId {
        self.schema.id
    }

    /// The DataSet's recent schema as of when the changeset was built.
    pub fn schema(&self) -> &DataSetSchema {
        &self.schema
    }

    pub fn get_variable_changes(&self, id: VariableId) -> Option<&Changes> {
        self.entries.get(id.index()).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: VariableId) -> bool {
        self.get_variable_changes(id).is_some()
    }

    /// Insert or replace a variable's entry.
    pub fn update_changes(&mut self, changes: Changes) {
        let index = changes.variable.index();
        if index >= self.entries.len() {
            self.entries.resize(index + 1, None);
        }
        self.entries[index] = Some(changes);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Changes> {
        self.entries.iter().flatten()
    }

    pub fn variables(&self) -> Vec<VariableId> {
        self.iter().map(|changes| changes.variable).collect()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A variable's proposed shape: from its entry if it has one, otherwise from the schema.
    pub fn proposed_shape(&self, id: VariableId) -> Option<Vec<usize>> {
        match self.get_variable_changes(id) {
            Some(changes) => Some(changes.shape.clone()),
            None => self.schema.variable(id).map(VariableSchema::shape),
        }
    }

    pub(crate) fn into_changes(self) -> impl Iterator<Item = Changes> {
        self.entries.into_iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{data::DataType, dimension::Dimension, schema::VariableClass};

    fn schema(shape: &[usize]) -> VariableSchema {
        VariableSchema {
            id: VariableId::Source(3),
            name: String::from("v"),
            class: VariableClass::Stored,
            data_type: DataType::F64,
            dimensions: shape
                .iter()
                .enumerate()
                .map(|(i, len)| Dimension::new(format!("d{i}"), *len))
                .collect(),
            coordinate_systems: vec![],
            metadata: Default::default(),
            version: 4,
        }
    }

    #[test]
    fn test_new() {
        let changes = Changes::new(schema(&[2, 3]));
        assert_eq!(changes.version, 5);
        assert_eq!(changes.shape, vec![2, 3]);
        assert!(!changes.has_data);
        assert!(changes.affected_rectangle().is_empty());
        assert!(!changes.shape_changed());
    }

    #[test]
    fn test_stage_write_grows_and_bounds() {
        let mut changes = Changes::new(schema(&[2, 3]));
        changes.stage_write(&Rectangle::new(vec![1, 0], vec![1, 1]));
        assert_eq!(changes.shape, vec![2, 3]);
        changes.stage_write(&Rectangle::new(vec![4, 2], vec![1, 3]));
        assert_eq!(changes.shape, vec![5, 5]);
        assert_eq!(
            changes.affected,
            Some(Rectangle::new(vec![1, 0], vec![4, 5]))
        );
        assert!(Rectangle::from_shape(&changes.shape).contains(&changes.affected_rectangle()));
        assert!(changes.shape_changed());

        changes.stage_extent(&[3, 7]);
        assert_eq!(changes.shape, vec![5, 7]);
        assert_eq!(changes.affected_rectangle().end(), vec![5, 5]);
    }

    #[test]
    fn test_changeset_entries() {
        let mut changeset = Changeset::new(DataSetSchema {
            id: DataSetId::from_raw(1),
            name: None,
            provider: String::from("memory"),
            version: 0,
            variables: vec![schema(&[2])],
            coordinate_systems: vec![],
        });
        assert!(changeset.is_empty());
        assert_eq!(changeset.proposed_shape(VariableId::Source(3)), Some(vec![2]));
        assert_eq!(changeset.proposed_shape(VariableId::Source(9)), None);

        let mut changes = Changes::new(schema(&[2]));
        changes.stage_write(&Rectangle::new(vec![2], vec![2]));
        changeset.update_changes(changes);

        assert_eq!(changeset.len(), 1);
        assert!(changeset.contains(VariableId::Source(3)));
        assert_eq!(changeset.variables(), vec![VariableId::Source(3)]);
        assert_eq!(changeset.proposed_shape(VariableId::Source(3)), Some(vec![4]));
    }
}
