//! Versioned, transactional stores of named multidimensional arrays.
//!
//! A `DataSet` holds variables laid out over named dimensions. Writes are staged and become
//! visible to readers of the committed state when the DataSet commits. Variables can be stored,
//! derived from another variable by a `Transform`, computed from indices by a `Computation`, or
//! refer to a variable of another DataSet, in which case both DataSets commit together.
//!
mod changes;
mod commit;
mod computational;
mod coordinates;
mod data;
mod dataset;
mod dimension;
mod errors;
mod events;
mod geom;
mod graph;
mod lookup;
mod memory;
mod metadata;
mod options;
mod provider;
mod range;
mod read;
mod reference;
mod request;
mod schema;
mod staging;
mod transform;
mod variable;

#[cfg(test)]
mod testing;

pub use changes::Changes;
pub use changes::Changeset;
pub use computational::Computation;
pub use data::DataArray;
pub use data::DataType;
pub use data::Element;
pub use data::Scalar;
pub use dataset::DataSet;
pub use dataset::DataSetId;
pub use dimension::Dimension;
pub use errors::Error;
pub use errors::Result;
pub use events::ChangeAction;
pub use events::ChangedEvent;
pub use events::ChangingEvent;
pub use events::RolledBackEvent;
pub use events::SubscriptionId;
pub use geom::Rectangle;
pub use geom::Region;
pub use lookup::index_of;
pub use lookup::select;
pub use lookup::AxisIndex;
pub use lookup::SelectionMode;
pub use memory::MemoryProvider;
pub use memory::MemoryStore;
pub use metadata::AttributeValue;
pub use metadata::MetadataChanges;
pub use metadata::KEY_MISSING_VALUE;
pub use metadata::KEY_NAME;
pub use options::DataSetOptions;
pub use options::DataSetUri;
pub use provider::ChunkSizes;
pub use provider::Provider;
pub use provider::ProviderFactory;
pub use provider::ProviderRegistry;
pub use provider::VariableStore;
pub use range::FloatRange;
pub use range::IntRange;
pub use schema::CoordinateSystemSchema;
pub use schema::DataSetSchema;
pub use schema::SchemaVersion;
pub use schema::VariableClass;
pub use schema::VariableSchema;
pub use transform::ScaleTransform;
pub use transform::StrideTransform;
pub use transform::Transform;
pub use variable::VariableId;
