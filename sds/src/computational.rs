use std::cmp;

use crate::{
    changes::{Changes, Changeset},
    data::{DataArray, DataType},
    errors::Result,
    geom::Rectangle,
    schema::SchemaVersion,
    transform::DependentVariable,
    variable::VariableCore,
};

/// Values computed from indices alone.
///
/// A computational variable has no source. Its extent along each dimension is the largest
/// extent any stored or reference variable in the same DataSet has along a dimension of the same
/// name.
///
pub trait Computation: Send + Sync {
    fn data_type(&self) -> DataType;

    /// The only rank this computation supports, if it is restricted to one.
    fn rank(&self) -> Option<usize> {
        None
    }

    fn compute(&self, origin: &[usize], shape: &[usize]) -> Result<DataArray>;
}

pub(crate) struct Computed {
    pub computation: Box<dyn Computation>,
}

impl Computed {
    /// The shape this variable should have given the proposed shapes in `changeset`.
    fn sized_shape(&self, core: &VariableCore, changeset: &Changeset) -> Vec<usize> {
        let mut shape = changeset
            .proposed_shape(core.id)
            .unwrap_or_else(|| core.proposed_shape());
        let siblings = changeset
            .schema()
            .variables
            .iter()
            .filter(|sibling| !sibling.id.is_derived());
        for sibling in siblings {
            let Some(sibling_shape) = changeset.proposed_shape(sibling.id) else {
                continue;
            };
            for (dimension, extent) in sibling.dimensions.iter().zip(sibling_shape) {
                let axis = core
                    .dimensions
                    .iter()
                    .position(|name| *name == dimension.name);
                if let Some(axis) = axis {
                    shape[axis] = cmp::max(shape[axis], extent);
                }
            }
        }

        shape
    }
}

impl DependentVariable for Computed {
    fn update_changes(&self, core: &VariableCore, changeset: &mut Changeset) -> Result<()> {
        let current = changeset
            .proposed_shape(core.id)
            .unwrap_or_else(|| core.proposed_shape());
        let shape = self.sized_shape(core, changeset);
        if shape != current {
            let mut changes = changeset
                .get_variable_changes(core.id)
                .cloned()
                .unwrap_or_else(|| Changes::new(core.schema(SchemaVersion::Committed)));
            changes.stage_write(&Rectangle::from_shape(&shape));
            changeset.update_changes(changes);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{range::IntRange, testing};

    #[test]
    fn test_sized_from_siblings() -> Result<()> {
        let (mut changeset, core) = testing::computational_changeset()?;
        let computed = Computed {
            computation: Box::new(IntRange::new(0_i32, 1)),
        };
        computed.update_changes(&core, &mut changeset)?;

        let changes = changeset.get_variable_changes(core.id).unwrap();
        assert_eq!(changes.shape, vec![5]);
        assert_eq!(changes.affected, Some(Rectangle::new(vec![0], vec![5])));

        // Already the right size, nothing more to do
        let before = changeset.get_variable_changes(core.id).cloned();
        computed.update_changes(&core, &mut changeset)?;
        assert_eq!(changeset.get_variable_changes(core.id).cloned(), before);

        Ok(())
    }
}
