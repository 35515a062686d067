//! The contract between a DataSet and the storage holding its variables' data.
//!
use std::fmt;

use indexmap::IndexMap;

use crate::{
    data::{DataArray, DataType, Scalar},
    errors::{Error, Result},
    memory::MemoryProvider,
};

/// Backing storage for one stored variable.
///
/// A store keeps two versions of its data: the committed one, and a proposed one that writes
/// go to. The DataSet drives the proposed version through precommit and then either commit or
/// rollback.
///
pub trait VariableStore: Send {
    fn data_type(&self) -> DataType;

    /// Shape of the committed data, or of the proposed data if `proposed` is set.
    fn read_shape(&self, proposed: bool) -> Vec<usize>;

    /// Read the region starting at `origin`, taking every `stride[i]`th cell along axis `i`.
    fn read(
        &self,
        origin: &[usize],
        stride: &[usize],
        shape: &[usize],
        proposed: bool,
    ) -> Result<DataArray>;

    /// Write `data` into the proposed version at `origin`, growing it as needed. Cells added by
    /// growth but not covered by `data` are set to `fill`.
    fn write(&mut self, origin: &[usize], data: &DataArray, fill: Option<&Scalar>) -> Result<()>;

    /// Called before the DataSet validates a commit. An error aborts the commit.
    ///
    /// Anything that can fail, such as flushing the proposed version to disk, belongs here.
    ///
    fn on_precommit(&mut self) -> Result<()> {
        Ok(())
    }

    /// Make the proposed version the committed one. Runs only once every participant has
    /// prepared, so it must not fail.
    ///
    fn on_commit(&mut self);

    /// Discard the proposed version. Must not fail.
    fn on_rollback(&mut self);

    /// Storage layout hint this store was created with, if any.
    fn chunk_sizes(&self) -> Option<&[usize]> {
        None
    }
}

/// Optional capability of a provider to accept storage layout hints.
pub trait ChunkSizes {
    /// Use `sizes` for variables of rank `sizes.len()` added from now on.
    fn set_chunk_sizes(&mut self, sizes: &[usize]) -> Result<()>;

    fn chunk_sizes(&self, rank: usize) -> Option<&[usize]>;
}

/// Creates storage for new variables.
pub trait Provider: Send {
    fn name(&self) -> &str;

    fn create_variable(
        &mut self,
        name: &str,
        data_type: DataType,
        dimensions: &[String],
    ) -> Result<Box<dyn VariableStore>>;

    fn chunking(&mut self) -> Option<&mut dyn ChunkSizes> {
        None
    }
}

/// Builds a provider from the parameters of an open string.
pub type ProviderFactory =
    Box<dyn Fn(&IndexMap<String, String>) -> Result<Box<dyn Provider>> + Send + Sync>;

/// Provider factories by name.
///
/// Passed explicitly to `DataSet::open`. `ProviderRegistry::default()` knows about the
/// in-memory provider under the name `memory`.
///
pub struct ProviderRegistry {
    factories: IndexMap<String, ProviderFactory>,
}

impl ProviderRegistry {
    /// A registry with no providers at all.
    pub fn empty() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    pub fn register<S, F>(&mut self, name: S, factory: F)
    where
        S: Into<String>,
        F: Fn(&IndexMap<String, String>) -> Result<Box<dyn Provider>> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(
        &self,
        name: &str,
        parameters: &IndexMap<String, String>,
    ) -> Result<Box<dyn Provider>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::Uri(format!("unknown provider: {name}")))?;

        factory(parameters)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("memory", |_: &IndexMap<String, String>| {
            Ok(Box::new(MemoryProvider::new()) as Box<dyn Provider>)
        });

        registry
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
