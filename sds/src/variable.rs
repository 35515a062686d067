use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    changes::Changes,
    computational::Computed,
    data::{DataType, Scalar},
    dimension,
    events::Handlers,
    geom::Rectangle,
    metadata::{MetadataDictionary, KEY_MISSING_VALUE},
    provider::VariableStore,
    reference::RemoteVariable,
    schema::{SchemaVersion, VariableClass, VariableSchema},
    transform::Transformation,
};

/// Identifies a variable within its DataSet.
///
/// Stored and reference variables are `Source`, transformation and computational variables are
/// `Derived`. The number is the variable's slot in its DataSet and is never reused, even when
/// the variable is discarded by a rollback.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VariableId {
    Source(usize),
    Derived(usize),
}

impl VariableId {
    pub fn index(self) -> usize {
        match self {
            VariableId::Source(index) | VariableId::Derived(index) => index,
        }
    }

    pub fn is_derived(self) -> bool {
        matches!(self, VariableId::Derived(_))
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableId::Source(index) => write!(f, "{index}"),
            VariableId::Derived(index) => write!(f, "~{index}"),
        }
    }
}

/// State shared by every kind of variable.
pub(crate) struct VariableCore {
    pub id: VariableId,
    pub class: VariableClass,
    pub data_type: DataType,
    pub dimensions: Vec<String>,
    pub metadata: MetadataDictionary,

    /// Shape as of the last commit
    pub shape: Vec<usize>,

    /// Number of successful commits that touched this variable. Zero until first committed.
    pub version: u32,

    pub changes: Option<Changes>,

    pub coordinate_systems: Vec<String>,
    pub proposed_coordinate_systems: Vec<String>,
}

impl VariableCore {
    pub fn new(
        id: VariableId,
        class: VariableClass,
        data_type: DataType,
        dimensions: Vec<String>,
    ) -> Self {
        Self {
            id,
            class,
            data_type,
            shape: vec![0; dimensions.len()],
            dimensions,
            metadata: MetadataDictionary::new(),
            version: 0,
            changes: None,
            coordinate_systems: vec![],
            proposed_coordinate_systems: vec![],
        }
    }

    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    pub fn name(&self) -> &str {
        self.metadata.name(SchemaVersion::Recent).unwrap_or_default()
    }

    pub fn is_committed(&self) -> bool {
        self.version > 0
    }

    pub fn has_changes(&self) -> bool {
        self.changes.is_some()
    }

    pub fn proposed_shape(&self) -> Vec<usize> {
        match &self.changes {
            Some(changes) => changes.shape.clone(),
            None => self.shape.clone(),
        }
    }

    pub fn shape(&self, version: SchemaVersion) -> Vec<usize> {
        match version {
            SchemaVersion::Committed => self.shape.clone(),
            SchemaVersion::Proposed | SchemaVersion::Recent => self.proposed_shape(),
        }
    }

    pub fn missing_value(&self) -> Option<Scalar> {
        self.metadata
            .get(KEY_MISSING_VALUE, SchemaVersion::Recent)
            .and_then(|value| value.as_scalar())
    }

    pub fn schema(&self, version: SchemaVersion) -> VariableSchema {
        let shape = self.shape(version);
        let name = self
            .metadata
            .name(version)
            .unwrap_or_else(|| self.name())
            .to_string();
        let coordinate_systems = match version {
            SchemaVersion::Committed => self.coordinate_systems.clone(),
            SchemaVersion::Proposed => self.proposed_coordinate_systems.clone(),
            SchemaVersion::Recent => self
                .coordinate_systems
                .iter()
                .chain(&self.proposed_coordinate_systems)
                .cloned()
                .collect(),
        };
        let version_number = match (&self.changes, version) {
            (Some(changes), SchemaVersion::Proposed | SchemaVersion::Recent) => changes.version,
            _ => self.version,
        };

        VariableSchema {
            id: self.id,
            name,
            class: self.class,
            data_type: self.data_type,
            dimensions: dimension::zip_shape(&self.dimensions, &shape),
            coordinate_systems,
            metadata: self.metadata.entries(version),
            version: version_number,
        }
    }

    /// This variable's pending changes, started from the committed state if there are none yet.
    pub fn changes_mut(&mut self) -> &mut Changes {
        let changes = self
            .changes
            .take()
            .unwrap_or_else(|| Changes::new(self.schema(SchemaVersion::Committed)));

        self.changes.insert(changes)
    }

    pub fn stage_write(&mut self, region: &Rectangle) {
        self.changes_mut().stage_write(region);
    }

    /// Pending changes as they should enter a changeset, with the metadata overlay folded in.
    pub fn pending_changes(&self) -> Option<Changes> {
        self.changes.as_ref().map(|changes| {
            let mut changes = changes.clone();
            changes.metadata = self.metadata.changes().clone();
            changes
        })
    }

    /// Make `changes` the committed state.
    pub fn finalize(&mut self, changes: &Changes) {
        self.shape = changes.shape.clone();
        self.metadata.commit_with(&changes.metadata);
        self.version = changes.version;
        self.coordinate_systems
            .append(&mut self.proposed_coordinate_systems);
        self.changes = None;
    }

    pub fn rollback(&mut self) {
        self.changes = None;
        self.metadata.rollback();
        self.proposed_coordinate_systems.clear();
    }
}

/// Where a variable's data comes from.
pub(crate) enum VariableKind {
    Stored(Box<dyn VariableStore>),
    Transform(Transformation),
    Computational(Computed),
    Reference(RemoteVariable),
}

impl VariableKind {
    pub fn class(&self) -> VariableClass {
        match self {
            VariableKind::Stored(_) => VariableClass::Stored,
            VariableKind::Transform(_) => VariableClass::Transform,
            VariableKind::Computational(_) => VariableClass::Computational,
            VariableKind::Reference(_) => VariableClass::Reference,
        }
    }
}

/// One slot of a DataSet's variable arena.
pub(crate) struct VariableEntry {
    pub core: VariableCore,
    pub kind: VariableKind,
    pub handlers: Handlers,
}

impl VariableEntry {
    pub fn new(core: VariableCore, kind: VariableKind) -> Self {
        Self {
            core,
            kind,
            handlers: Handlers::default(),
        }
    }
}
