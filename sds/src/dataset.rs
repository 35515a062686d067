//! DataSets: named collections of variables sharing dimensions, changed in transactions.
//!
//! A `DataSet` is a cheap handle. Clones share the same state, which lives behind a reentrant
//! lock so that an operation can call back into its own DataSet (through a reference variable
//! cycle or from an event handler) on the same thread. No borrow of the state is ever held
//! while handlers run or while another DataSet is called. A call that finds the state already
//! borrowed fails with `Error::Busy` rather than deadlocking.
//!
use std::{
    cell::RefCell,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    changes::Changeset,
    computational::{Computation, Computed},
    coordinates::CoordinateSystem,
    data::{DataType, Element, Scalar},
    dimension::{self, Dimension},
    errors::{Error, Result},
    geom::Rectangle,
    graph::DependencyGraph,
    memory::MemoryProvider,
    metadata::{AttributeValue, KEY_NAME},
    options::{DataSetOptions, DataSetUri},
    provider::{Provider, ProviderRegistry},
    schema::{DataSetSchema, SchemaVersion, VariableClass, VariableSchema},
    transform::{Transform, Transformation},
    variable::{VariableCore, VariableEntry, VariableId, VariableKind},
};

static NEXT_DATASET: AtomicU64 = AtomicU64::new(1);

/// Process wide identity of a DataSet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataSetId(u64);

impl DataSetId {
    fn next() -> Self {
        Self(NEXT_DATASET.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DataSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct DataSetInner {
    pub id: DataSetId,
    pub provider: Box<dyn Provider>,
    pub options: DataSetOptions,

    /// Slots indexed by `VariableId::index`. Discarded variables leave a `None` behind.
    pub variables: Vec<Option<VariableEntry>>,
    pub graph: DependencyGraph,
    pub coordinate_systems: Vec<CoordinateSystem>,

    /// Number of commits that changed anything
    pub version: u32,

    /// Bumped whenever a transaction ends, by commit or rollback
    pub epoch: u64,
    pub disposed: bool,
}

impl DataSetInner {
    fn new(id: DataSetId, provider: Box<dyn Provider>, options: DataSetOptions) -> Self {
        Self {
            id,
            provider,
            options,
            variables: vec![],
            graph: DependencyGraph::default(),
            coordinate_systems: vec![],
            version: 0,
            epoch: 0,
            disposed: false,
        }
    }

    pub fn entry(&self, id: VariableId) -> Result<&VariableEntry> {
        self.variables
            .get(id.index())
            .and_then(Option::as_ref)
            .filter(|entry| entry.core.id == id)
            .ok_or_else(|| Error::not_found(id))
    }

    pub fn entry_mut(&mut self, id: VariableId) -> Result<&mut VariableEntry> {
        self.variables
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .filter(|entry| entry.core.id == id)
            .ok_or_else(|| Error::not_found(id))
    }

    pub fn entries(&self) -> impl Iterator<Item = &VariableEntry> {
        self.variables.iter().flatten()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut VariableEntry> {
        self.variables.iter_mut().flatten()
    }

    pub fn check_writable(&self) -> Result<()> {
        if self.options.read_only {
            return Err(Error::ReadOnly(format!("dataset {} is read only", self.id)));
        }

        Ok(())
    }

    /// The variable currently called `name`, pending renames included.
    pub fn find(&self, name: &str) -> Option<VariableId> {
        self.entries()
            .find(|entry| entry.core.name() == name)
            .map(|entry| entry.core.id)
    }

    pub fn check_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument(String::from(
                "variable names must not be empty",
            )));
        }
        if self.find(name).is_some() {
            return Err(Error::InvalidArgument(format!(
                "a variable named {name} already exists in dataset {}",
                self.id
            )));
        }

        Ok(())
    }

    pub fn has_changes(&self) -> bool {
        self.entries()
            .any(|entry| entry.core.has_changes() || entry.core.metadata.has_changes())
            || self.coordinate_systems.iter().any(|system| !system.committed)
    }

    pub fn schema(&self, version: SchemaVersion) -> DataSetSchema {
        let variables = self
            .entries()
            .filter(|entry| match version {
                SchemaVersion::Committed => entry.core.is_committed(),
                SchemaVersion::Proposed => entry.core.has_changes(),
                SchemaVersion::Recent => true,
            })
            .map(|entry| entry.core.schema(version))
            .collect();
        let coordinate_systems = self
            .coordinate_systems
            .iter()
            .filter(|system| match version {
                SchemaVersion::Committed => system.committed,
                SchemaVersion::Proposed => !system.committed,
                SchemaVersion::Recent => true,
            })
            .map(CoordinateSystem::schema)
            .collect();
        let dataset_version = match version {
            SchemaVersion::Committed => self.version,
            _ if self.has_changes() => self.version + 1,
            _ => self.version,
        };

        DataSetSchema {
            id: self.id,
            name: self.options.name.clone(),
            provider: self.provider.name().to_string(),
            version: dataset_version,
            variables,
            coordinate_systems,
        }
    }

    /// A changeset holding every variable's pending changes.
    pub fn changeset(&self) -> Changeset {
        let mut changeset = Changeset::new(self.schema(SchemaVersion::Recent));
        for entry in self.entries() {
            if let Some(changes) = entry.core.pending_changes() {
                changeset.update_changes(changes);
            }
        }

        changeset
    }

    pub fn next_slot(&self) -> usize {
        self.variables.len()
    }

    pub fn insert(
        &mut self,
        core: VariableCore,
        kind: VariableKind,
        source: Option<VariableId>,
    ) -> VariableId {
        let id = core.id;
        let computational = matches!(kind, VariableKind::Computational(_));
        self.graph.add(id, source, computational);
        self.variables.push(Some(VariableEntry::new(core, kind)));

        id
    }

    /// The DataSets this one's reference variables point at, each once.
    pub fn referenced_datasets(&self) -> Vec<DataSet> {
        let mut datasets: Vec<DataSet> = vec![];
        for entry in self.entries() {
            if let VariableKind::Reference(remote) = &entry.kind {
                if !datasets.iter().any(|dataset| dataset.id == remote.dataset.id) {
                    datasets.push(remote.dataset.clone());
                }
            }
        }

        datasets
    }
}

/// A handle to a DataSet.
///
/// All operations take `&self`; clones refer to the same DataSet.
///
#[derive(Clone)]
pub struct DataSet {
    pub(crate) id: DataSetId,
    inner: Arc<ReentrantMutex<RefCell<DataSetInner>>>,
}

impl DataSet {
    /// An empty in memory DataSet with default options.
    pub fn new() -> Self {
        Self::with_options(DataSetOptions::default())
    }

    pub fn with_options(options: DataSetOptions) -> Self {
        Self::with_provider(Box::new(MemoryProvider::new()), options)
    }

    pub fn with_provider(provider: Box<dyn Provider>, options: DataSetOptions) -> Self {
        let id = DataSetId::next();
        debug!(dataset = %id, provider = provider.name(), "created dataset");

        Self {
            id,
            inner: Arc::new(ReentrantMutex::new(RefCell::new(DataSetInner::new(
                id, provider, options,
            )))),
        }
    }

    /// Open a DataSet from a string of the form `msds:<provider>[?key=value&...]`.
    pub fn open(uri: &str, registry: &ProviderRegistry) -> Result<Self> {
        let uri = DataSetUri::parse(uri)?;
        let provider = registry.create(&uri.provider, &uri.parameters)?;

        Ok(Self::with_provider(provider, uri.options))
    }

    pub fn id(&self) -> DataSetId {
        self.id
    }

    /// Hold the DataSet for the length of an operation. Reentrant on the same thread.
    pub(crate) fn operation(&self) -> ReentrantMutexGuard<'_, RefCell<DataSetInner>> {
        self.inner.lock()
    }

    pub(crate) fn with<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&DataSetInner) -> Result<T>,
    {
        let guard = self.inner.lock();
        let inner = guard.try_borrow().map_err(|_| Error::Busy(self.id))?;
        if inner.disposed {
            return Err(Error::Disposed(self.id));
        }

        f(&inner)
    }

    pub(crate) fn with_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut DataSetInner) -> Result<T>,
    {
        let guard = self.inner.lock();
        let mut inner = guard.try_borrow_mut().map_err(|_| Error::Busy(self.id))?;
        if inner.disposed {
            return Err(Error::Disposed(self.id));
        }

        f(&mut inner)
    }

    /// Commit now if this DataSet commits after every change.
    pub(crate) fn autocommit(&self) -> Result<()> {
        if self.with(|inner| Ok(inner.options.autocommit))? {
            self.commit()
        } else {
            Ok(())
        }
    }

    pub fn dataset_name(&self) -> Result<Option<String>> {
        self.with(|inner| Ok(inner.options.name.clone()))
    }

    pub fn provider_name(&self) -> Result<String> {
        self.with(|inner| Ok(inner.provider.name().to_string()))
    }

    /// Number of commits that changed this DataSet.
    pub fn version(&self) -> Result<u32> {
        self.with(|inner| Ok(inner.version))
    }

    pub fn is_autocommit(&self) -> Result<bool> {
        self.with(|inner| Ok(inner.options.autocommit))
    }

    /// Turning autocommit on doesn't commit changes already pending.
    pub fn set_autocommit(&self, autocommit: bool) -> Result<()> {
        self.with_mut(|inner| {
            inner.options.autocommit = autocommit;
            Ok(())
        })
    }

    pub fn is_read_only(&self) -> Result<bool> {
        self.with(|inner| Ok(inner.options.read_only))
    }

    /// Whether the current transaction has anything to commit.
    pub fn has_changes(&self) -> Result<bool> {
        self.with(|inner| Ok(inner.has_changes()))
    }

    pub fn get_schema(&self, version: SchemaVersion) -> Result<DataSetSchema> {
        let mut schema = self.with(|inner| Ok(inner.schema(version)))?;
        for variable in &mut schema.variables {
            self.mirror_extent(variable, version)?;
        }

        Ok(schema)
    }

    pub fn variable_schema(
        &self,
        id: VariableId,
        version: SchemaVersion,
    ) -> Result<VariableSchema> {
        let mut schema = self.with(|inner| Ok(inner.entry(id)?.core.schema(version)))?;
        self.mirror_extent(&mut schema, version)?;

        Ok(schema)
    }

    pub fn find_variable(&self, name: &str) -> Result<VariableId> {
        self.with(|inner| {
            inner
                .find(name)
                .ok_or_else(|| Error::VariableNotFound(String::from(name)))
        })
    }

    pub fn variables(&self) -> Result<Vec<VariableId>> {
        self.with(|inner| Ok(inner.entries().map(|entry| entry.core.id).collect()))
    }

    pub fn name(&self, id: VariableId) -> Result<String> {
        self.with(|inner| Ok(inner.entry(id)?.core.name().to_string()))
    }

    pub fn data_type(&self, id: VariableId) -> Result<DataType> {
        self.with(|inner| Ok(inner.entry(id)?.core.data_type))
    }

    pub fn rank(&self, id: VariableId) -> Result<usize> {
        self.with(|inner| Ok(inner.entry(id)?.core.rank()))
    }

    pub fn class(&self, id: VariableId) -> Result<VariableClass> {
        self.with(|inner| Ok(inner.entry(id)?.kind.class()))
    }

    pub fn shape(&self, id: VariableId, version: SchemaVersion) -> Result<Vec<usize>> {
        match self.reference_extent(id, version)? {
            Some(shape) => Ok(shape),
            None => self.with(|inner| Ok(inner.entry(id)?.core.shape(version))),
        }
    }

    pub fn dimensions(&self, id: VariableId, version: SchemaVersion) -> Result<Vec<Dimension>> {
        let shape = self.shape(id, version)?;
        self.with(|inner| {
            let core = &inner.entry(id)?.core;
            Ok(dimension::zip_shape(&core.dimensions, &shape))
        })
    }

    /// The variable a transformation variable is derived from, `None` for other variables.
    pub fn source(&self, id: VariableId) -> Result<Option<VariableId>> {
        self.with(|inner| {
            inner.entry(id)?;
            Ok(inner.graph.source_of(id))
        })
    }

    /// Number of commits that changed this variable. Zero until it is first committed.
    pub fn variable_version(&self, id: VariableId) -> Result<u32> {
        self.with(|inner| Ok(inner.entry(id)?.core.version))
    }

    pub fn metadata(
        &self,
        id: VariableId,
        key: &str,
        version: SchemaVersion,
    ) -> Result<Option<AttributeValue>> {
        self.with(|inner| Ok(inner.entry(id)?.core.metadata.get(key, version).cloned()))
    }

    /// The value that fills cells grown but never written.
    pub fn missing_value(&self, id: VariableId) -> Result<Option<Scalar>> {
        self.with(|inner| Ok(inner.entry(id)?.core.missing_value()))
    }

    /// Add a stored variable holding elements of type `T`.
    pub fn add_variable<T: Element>(&self, name: &str, dimensions: &[&str]) -> Result<VariableId> {
        self.add_variable_of_type(name, T::DATA_TYPE, dimensions)
    }

    pub fn add_variable_of_type(
        &self,
        name: &str,
        data_type: DataType,
        dimensions: &[&str],
    ) -> Result<VariableId> {
        let _op = self.operation();
        let id = self.with_mut(|inner| {
            inner.check_writable()?;
            inner.check_name(name)?;
            let dimensions = dimension::validate_names(dimensions)?;
            let store = inner
                .provider
                .create_variable(name, data_type, &dimensions)?;
            if store.data_type() != data_type {
                return Err(Error::TypeMismatch {
                    expected: data_type,
                    got: store.data_type(),
                });
            }

            let mut core = VariableCore::new(
                VariableId::Source(inner.next_slot()),
                VariableClass::Stored,
                data_type,
                dimensions,
            );
            core.metadata.set(KEY_NAME, Some(name.into()))?;
            core.changes_mut();

            Ok(inner.insert(core, VariableKind::Stored(store), None))
        })?;
        debug!(dataset = %self.id, variable = %id, name, "added variable");
        self.autocommit()?;

        Ok(id)
    }

    /// Add a variable derived point to point from `source`.
    ///
    /// The new variable starts out with the source's metadata, less its name and whatever the
    /// transform hides.
    ///
    pub fn add_transform<T>(
        &self,
        name: &str,
        source: VariableId,
        transform: T,
    ) -> Result<VariableId>
    where
        T: Transform + 'static,
    {
        let _op = self.operation();
        let id = self.with_mut(|inner| {
            inner.check_writable()?;
            inner.check_name(name)?;
            let source_core = &inner.entry(source)?.core;
            let data_type = transform.data_type(source_core.data_type)?;
            let dimensions = transform.dimensions(&source_core.dimensions)?;
            let shape = transform.transform_shape(&source_core.proposed_shape());
            let hidden = transform.hidden_metadata();
            let inherited: Vec<(String, AttributeValue)> = source_core
                .metadata
                .entries(SchemaVersion::Recent)
                .into_iter()
                .filter(|(key, _)| key != KEY_NAME && !hidden.contains(&key.as_str()))
                .collect();

            let mut core = VariableCore::new(
                VariableId::Derived(inner.next_slot()),
                VariableClass::Transform,
                data_type,
                dimensions,
            );
            for (key, value) in inherited {
                core.metadata.set(key, Some(value))?;
            }
            core.metadata.set(KEY_NAME, Some(name.into()))?;
            core.stage_write(&Rectangle::from_shape(&shape));
            let link = Transformation {
                source,
                transform: Box::new(transform),
            };

            Ok(inner.insert(core, VariableKind::Transform(link), Some(source)))
        })?;
        debug!(dataset = %self.id, variable = %id, %source, name, "added transform variable");
        self.autocommit()?;

        Ok(id)
    }

    /// Add a variable whose values are computed from their indices.
    ///
    /// Its extent follows the stored and reference variables sharing its dimensions, and is
    /// settled at commit.
    ///
    pub fn add_computational<C>(
        &self,
        name: &str,
        dimensions: &[&str],
        computation: C,
    ) -> Result<VariableId>
    where
        C: Computation + 'static,
    {
        let _op = self.operation();
        let id = self.with_mut(|inner| {
            inner.check_writable()?;
            inner.check_name(name)?;
            let dimensions = dimension::validate_names(dimensions)?;
            if let Some(rank) = computation.rank() {
                if rank != dimensions.len() {
                    return Err(Error::RankMismatch {
                        expected: rank,
                        got: dimensions.len(),
                    });
                }
            }

            let mut core = VariableCore::new(
                VariableId::Derived(inner.next_slot()),
                VariableClass::Computational,
                computation.data_type(),
                dimensions,
            );
            core.metadata.set(KEY_NAME, Some(name.into()))?;
            core.changes_mut();
            let computed = Computed {
                computation: Box::new(computation),
            };

            Ok(inner.insert(core, VariableKind::Computational(computed), None))
        })?;
        debug!(dataset = %self.id, variable = %id, name, "added computational variable");
        self.autocommit()?;

        Ok(id)
    }

    /// Set the provider's chunk sizes for variables of rank `sizes.len()` created from now on.
    ///
    /// Returns `false` if the provider has no notion of chunking.
    ///
    pub fn set_chunk_sizes(&self, sizes: &[usize]) -> Result<bool> {
        self.with_mut(|inner| match inner.provider.chunking() {
            Some(chunking) => {
                chunking.set_chunk_sizes(sizes)?;
                Ok(true)
            }
            None => Ok(false),
        })
    }

    /// Release everything this DataSet holds. Every later call on it fails with
    /// `Error::Disposed`. Disposing twice does nothing.
    ///
    pub fn dispose(&self) -> Result<()> {
        let guard = self.inner.lock();
        let mut inner = guard.try_borrow_mut().map_err(|_| Error::Busy(self.id))?;
        if !inner.disposed {
            inner.disposed = true;
            inner.variables.clear();
            inner.coordinate_systems.clear();
            inner.graph = DependencyGraph::default();
            debug!(dataset = %self.id, "disposed dataset");
        }

        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        let guard = self.inner.lock();
        let disposed = guard.try_borrow().map_or(false, |inner| inner.disposed);
        disposed
    }
}

impl Default for DataSet {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DataSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSet").field("id", &self.id).finish()
    }
}
