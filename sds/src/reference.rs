//! Reference variables: a variable of one DataSet standing in for a variable of another.
//!
//! Reads and writes go to the referenced variable. Committing a DataSet with a changed reference
//! variable commits the referenced DataSet too, in the same distributed transaction.
//!
use tracing::debug;

use crate::{
    changes::{Changes, Changeset},
    commit::CommitContext,
    dataset::DataSet,
    errors::{Error, Result},
    geom::Rectangle,
    metadata::KEY_NAME,
    schema::{SchemaVersion, VariableClass, VariableSchema},
    variable::{VariableCore, VariableId, VariableKind},
};

#[derive(Clone)]
pub(crate) struct RemoteVariable {
    pub dataset: DataSet,
    pub id: VariableId,
}

impl DataSet {
    /// Add a variable that refers to variable `id` of `target`, which may be this DataSet.
    ///
    /// The reference takes the target's type, dimension names and committed metadata, and
    /// starts out with its committed extent.
    ///
    pub fn add_reference(
        &self,
        name: &str,
        target: &DataSet,
        id: VariableId,
    ) -> Result<VariableId> {
        let _op = self.operation();
        let (data_type, dimensions, shape, metadata) = target.with(|inner| {
            let core = &inner.entry(id)?.core;
            Ok((
                core.data_type,
                core.dimensions.clone(),
                core.shape.clone(),
                core.metadata.entries(SchemaVersion::Committed),
            ))
        })?;
        let reference = self.with_mut(|inner| {
            inner.check_writable()?;
            inner.check_name(name)?;
            let mut core = VariableCore::new(
                VariableId::Source(inner.next_slot()),
                VariableClass::Reference,
                data_type,
                dimensions,
            );
            for (key, value) in metadata {
                if key != KEY_NAME {
                    core.metadata.set(key, Some(value))?;
                }
            }
            core.metadata.set(KEY_NAME, Some(name.into()))?;
            core.stage_write(&Rectangle::from_shape(&shape));
            let remote = RemoteVariable {
                dataset: target.clone(),
                id,
            };

            Ok(inner.insert(core, VariableKind::Reference(remote), None))
        })?;
        debug!(
            dataset = %self.id,
            variable = %reference,
            target = %target.id,
            target_variable = %id,
            "added reference variable"
        );
        self.autocommit()?;

        Ok(reference)
    }

    /// The DataSet and variable a reference variable points at.
    pub fn reference_target(&self, id: VariableId) -> Result<(DataSet, VariableId)> {
        self.with(|inner| match &inner.entry(id)?.kind {
            VariableKind::Reference(remote) => Ok((remote.dataset.clone(), remote.id)),
            _ => Err(Error::InvalidArgument(format!(
                "variable {id} is not a reference variable"
            ))),
        })
    }

    /// Current extent of reference variable `id`, which is always that of the variable it
    /// refers to. `None` for other variables.
    ///
    pub(crate) fn reference_extent(
        &self,
        id: VariableId,
        version: SchemaVersion,
    ) -> Result<Option<Vec<usize>>> {
        let remote = self.with(|inner| match &inner.entry(id)?.kind {
            VariableKind::Reference(remote) => Ok(Some(remote.clone())),
            _ => Ok(None),
        })?;

        match remote {
            Some(remote) => Ok(Some(remote.dataset.shape(remote.id, version)?)),
            None => Ok(None),
        }
    }

    /// Give a reference variable's schema the extent of the variable it refers to.
    pub(crate) fn mirror_extent(
        &self,
        schema: &mut VariableSchema,
        version: SchemaVersion,
    ) -> Result<()> {
        if let Some(shape) = self.reference_extent(schema.id, version)? {
            for (dimension, length) in schema.dimensions.iter_mut().zip(shape) {
                dimension.length = Some(length);
            }
        }

        Ok(())
    }

    /// Bring a followed DataSet into the commit and pick up the referenced variable's proposed
    /// extent.
    pub(crate) fn follow(
        &self,
        id: VariableId,
        remote: &RemoteVariable,
        changeset: &mut Changeset,
        context: &mut CommitContext,
    ) -> Result<()> {
        let target = &remote.dataset;
        let visited = context.visited.contains(&target.id);
        if !visited && (changeset.contains(id) || target.has_changes()?) {
            target
                .prepare(context)
                .map_err(|err| Error::distributed(target.id, err))?;
        }

        let target_shape = target.shape(remote.id, SchemaVersion::Recent)?;
        self.with(|inner| {
            let core = &inner.entry(id)?.core;
            let current = changeset
                .proposed_shape(id)
                .unwrap_or_else(|| core.proposed_shape());
            let grown = target_shape.iter().zip(&current).any(|(target, len)| target > len);
            if grown {
                let mut changes = changeset
                    .get_variable_changes(id)
                    .cloned()
                    .unwrap_or_else(|| Changes::new(core.schema(SchemaVersion::Committed)));
                changes.stage_write(&Rectangle::from_shape(&target_shape));
                changeset.update_changes(changes);
            }

            Ok(())
        })
    }
}
