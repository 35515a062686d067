//! Point to point transformation variables.
//!
//! A transformation variable has no storage of its own. Reading it reads the matching region of
//! its source and transforms the result; writing to it (when the transform is reversible) writes
//! the reverse transformed data to the source.
//!
use crate::{
    changes::{Changes, Changeset},
    data::{DataArray, DataType},
    errors::{Error, Result},
    geom::Rectangle,
    metadata::KEY_MISSING_VALUE,
    schema::SchemaVersion,
    variable::{VariableCore, VariableId},
};

/// A mapping from a source variable to a derived one.
///
/// Index mappings work per axis and must be monotonic: a larger source region never maps to a
/// smaller derived one.
///
pub trait Transform: Send + Sync {
    /// The type of the derived data given the source's type.
    fn data_type(&self, source: DataType) -> Result<DataType>;

    /// Dimension names of the derived variable given the source's.
    fn dimensions(&self, source: &[String]) -> Result<Vec<String>> {
        Ok(source.to_vec())
    }

    fn transform_shape(&self, source: &[usize]) -> Vec<usize> {
        source.to_vec()
    }

    /// Map a region of the source to the region of the derived variable it affects.
    fn transform_index_rectangle(&self, source: &Rectangle) -> Rectangle {
        source.clone()
    }

    /// Map a region of the derived variable to the region of the source needed to compute it.
    fn reverse_index_rectangle(&self, target: &Rectangle) -> Rectangle {
        target.clone()
    }

    /// Compute the derived data for `target` from the source data read from
    /// `reverse_index_rectangle(target)`.
    fn transform(&self, target: &Rectangle, source: DataArray) -> Result<DataArray>;

    /// Map derived data back to source data of type `source_type`. `None` if the transform isn't
    /// reversible.
    fn reverse_transform(
        &self,
        _data: DataArray,
        _source_type: DataType,
    ) -> Option<Result<DataArray>> {
        None
    }

    fn is_reversible(&self) -> bool {
        false
    }

    /// Metadata keys of the source that don't carry over to the derived variable.
    fn hidden_metadata(&self) -> &[&str] {
        &[]
    }
}

/// `value * scale + offset`, producing `F64` from any numeric source.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleTransform {
    pub scale: f64,
    pub offset: f64,
}

impl ScaleTransform {
    pub fn new(scale: f64, offset: f64) -> Self {
        Self { scale, offset }
    }
}

impl Transform for ScaleTransform {
    fn data_type(&self, source: DataType) -> Result<DataType> {
        if source.is_numeric() {
            Ok(DataType::F64)
        } else {
            Err(Error::InvalidArgument(format!(
                "cannot scale a variable of type {source:?}"
            )))
        }
    }

    fn transform(&self, _target: &Rectangle, source: DataArray) -> Result<DataArray> {
        let values = source.to_f64().ok_or(Error::TypeMismatch {
            expected: DataType::F64,
            got: source.data_type(),
        })?;

        Ok(DataArray::F64(
            values.mapv(|value| value * self.scale + self.offset),
        ))
    }

    fn reverse_transform(
        &self,
        data: DataArray,
        source_type: DataType,
    ) -> Option<Result<DataArray>> {
        if !self.is_reversible() {
            return None;
        }
        let values = match data.to_f64() {
            Some(values) => values,
            None => {
                return Some(Err(Error::TypeMismatch {
                    expected: DataType::F64,
                    got: data.data_type(),
                }))
            }
        };
        let values = values.mapv(|value| (value - self.offset) / self.scale);

        Some(DataArray::from_f64(&values, source_type))
    }

    fn is_reversible(&self) -> bool {
        self.scale != 0.0
    }

    fn hidden_metadata(&self) -> &[&str] {
        &[KEY_MISSING_VALUE]
    }
}

/// Every `stride[i]`th cell of the source along axis `i`, starting at `origin[i]`.
///
/// The derived variable's axes are generally shorter than the source's, so it gets its own
/// dimension names.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrideTransform {
    origin: Vec<usize>,
    stride: Vec<usize>,
    dimensions: Vec<String>,
}

impl StrideTransform {
    pub fn new<S: Into<String>>(
        origin: Vec<usize>,
        stride: Vec<usize>,
        dimensions: Vec<S>,
    ) -> Result<Self> {
        let dimensions: Vec<String> = dimensions.into_iter().map(Into::into).collect();
        if origin.len() != stride.len() || origin.len() != dimensions.len() {
            return Err(Error::InvalidArgument(String::from(
                "origin, stride and dimensions must have one entry per axis",
            )));
        }
        if stride.contains(&0) {
            return Err(Error::InvalidArgument(String::from("stride must be positive")));
        }

        Ok(Self {
            origin,
            stride,
            dimensions,
        })
    }

    fn axes(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.origin.iter().copied().zip(self.stride.iter().copied())
    }
}

/// Number of indices `j` such that `origin + j * stride < end`.
fn strided_count(end: usize, origin: usize, stride: usize) -> usize {
    if end <= origin {
        0
    } else {
        (end - origin).div_ceil(stride)
    }
}

impl Transform for StrideTransform {
    fn data_type(&self, source: DataType) -> Result<DataType> {
        Ok(source)
    }

    fn dimensions(&self, source: &[String]) -> Result<Vec<String>> {
        if source.len() != self.dimensions.len() {
            return Err(Error::RankMismatch {
                expected: self.dimensions.len(),
                got: source.len(),
            });
        }

        Ok(self.dimensions.clone())
    }

    fn transform_shape(&self, source: &[usize]) -> Vec<usize> {
        self.axes()
            .zip(source)
            .map(|((origin, stride), len)| strided_count(*len, origin, stride))
            .collect()
    }

    fn transform_index_rectangle(&self, source: &Rectangle) -> Rectangle {
        let (origin, shape) = self
            .axes()
            .zip(source.origin.iter().zip(source.end()))
            .map(|((origin, stride), (start, end))| {
                let first = strided_count(*start, origin, stride);
                let last = strided_count(end, origin, stride);
                (first, last.saturating_sub(first))
            })
            .unzip();

        Rectangle::new(origin, shape)
    }

    fn reverse_index_rectangle(&self, target: &Rectangle) -> Rectangle {
        let (origin, shape) = self
            .axes()
            .zip(target.origin.iter().zip(&target.shape))
            .map(|((origin, stride), (start, len))| {
                let covered = if *len == 0 { 0 } else { (len - 1) * stride + 1 };
                (origin + start * stride, covered)
            })
            .unzip();

        Rectangle::new(origin, shape)
    }

    fn transform(&self, target: &Rectangle, source: DataArray) -> Result<DataArray> {
        source.slice(&vec![0; target.rank()], &self.stride, &target.shape)
    }
}

/// Capability of derived variables to add their own changes to a commit's changeset, given the
/// changes already recorded for the variables they derive from.
///
pub(crate) trait DependentVariable {
    fn update_changes(&self, core: &VariableCore, changeset: &mut Changeset) -> Result<()>;
}

/// A transformation variable's link to its source.
pub(crate) struct Transformation {
    pub source: VariableId,
    pub transform: Box<dyn Transform>,
}

impl DependentVariable for Transformation {
    fn update_changes(&self, core: &VariableCore, changeset: &mut Changeset) -> Result<()> {
        let Some(source) = changeset.get_variable_changes(self.source) else {
            return Ok(());
        };
        let metadata = source.metadata.clone();
        let affected = source
            .has_data
            .then(|| self.transform.transform_index_rectangle(&source.affected_rectangle()));
        let shape = self.transform.transform_shape(&source.shape);

        let mut changes = changeset
            .get_variable_changes(core.id)
            .cloned()
            .unwrap_or_else(|| Changes::new(core.schema(SchemaVersion::Committed)));
        changes
            .metadata
            .filter_changes(&metadata, self.transform.hidden_metadata());
        if let Some(affected) = affected.filter(|affected| !affected.is_empty()) {
            changes.stage_write(&affected);
        }
        changes.stage_extent(&shape);
        changeset.update_changes(changes);

        Ok(())
    }
}
