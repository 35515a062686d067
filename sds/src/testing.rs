use crate::{
    changes::{Changes, Changeset},
    data::DataType,
    dataset::DataSetId,
    errors::Result,
    geom::Rectangle,
    metadata::{AttributeValue, KEY_MISSING_VALUE},
    schema::{DataSetSchema, SchemaVersion, VariableClass, VariableSchema},
    variable::{VariableCore, VariableId},
};

/// A committed variable on dimension "x" with shape `shape`.
fn committed_core(
    id: VariableId,
    class: VariableClass,
    data_type: DataType,
    shape: usize,
) -> VariableCore {
    let mut core = VariableCore::new(id, class, data_type, vec![String::from("x")]);
    core.shape = vec![shape];
    core.version = 1;

    core
}

fn changeset_over(variables: Vec<VariableSchema>) -> Changeset {
    Changeset::new(DataSetSchema {
        id: DataSetId::from_raw(1),
        name: None,
        provider: String::from("memory"),
        version: 1,
        variables,
        coordinate_systems: vec![],
    })
}

/// A changeset where a stored variable of length 2 has two cells appended and gains "units"
/// and missing value metadata, along with an uncommitted derived variable over it.
///
/// Returns the changeset, the stored variable's id and the derived variable's core.
///
pub(crate) fn scaled_changeset() -> Result<(Changeset, VariableId, VariableCore)> {
    let source = committed_core(VariableId::Source(0), VariableClass::Stored, DataType::I32, 2);
    let derived = committed_core(
        VariableId::Derived(1),
        VariableClass::Transform,
        DataType::F64,
        2,
    );

    let mut changes = Changes::new(source.schema(SchemaVersion::Committed));
    changes.stage_write(&Rectangle::new(vec![2], vec![2]));
    changes.metadata.set("units", "m".into())?;
    changes.metadata.set(KEY_MISSING_VALUE, AttributeValue::Int(-1))?;

    let mut changeset = changeset_over(vec![
        source.schema(SchemaVersion::Committed),
        derived.schema(SchemaVersion::Committed),
    ]);
    changeset.update_changes(changes);

    Ok((changeset, source.id, derived))
}

/// A changeset where a stored variable on "x" grows from 3 to 5, along with the core of a
/// computational variable on "x" that is still of length 3.
///
pub(crate) fn computational_changeset() -> Result<(Changeset, VariableCore)> {
    let sibling = committed_core(VariableId::Source(0), VariableClass::Stored, DataType::F64, 3);
    let computed = committed_core(
        VariableId::Derived(1),
        VariableClass::Computational,
        DataType::I32,
        3,
    );

    let mut changes = Changes::new(sibling.schema(SchemaVersion::Committed));
    changes.stage_write(&Rectangle::new(vec![3], vec![2]));

    let mut changeset = changeset_over(vec![
        sibling.schema(SchemaVersion::Committed),
        computed.schema(SchemaVersion::Committed),
    ]);
    changeset.update_changes(changes);

    Ok((changeset, computed))
}
