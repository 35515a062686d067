//! Element types and the type-erased n-dimensional array used to move data in and out of
//! variables.
//!
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use ndarray::{ArrayD, IxDyn, Slice};
use num_traits::{cast, NumCast};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// The kind of data stored in a variable.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    F64,
    F32,
    I64,
    I32,
    I16,
    U8,
    Bool,
    Str,
    DateTime,
}

impl DataType {
    /// Whether values of this type have a natural total order usable for coordinate lookup.
    pub fn is_ordered(self) -> bool {
        !matches!(self, DataType::Bool | DataType::Str)
    }

    /// Whether this is a floating point type. Interpolation is only defined for these.
    pub fn is_real(self) -> bool {
        matches!(self, DataType::F64 | DataType::F32)
    }

    pub fn is_numeric(self) -> bool {
        self.is_ordered() && self != DataType::DateTime
    }
}

/// A single value of any element type.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    F64(f64),
    F32(f32),
    I64(i64),
    I32(i32),
    I16(i16),
    U8(u8),
    Bool(bool),
    Str(String),
    DateTime(DateTime<Utc>),
}

impl Scalar {
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::F64(_) => DataType::F64,
            Scalar::F32(_) => DataType::F32,
            Scalar::I64(_) => DataType::I64,
            Scalar::I32(_) => DataType::I32,
            Scalar::I16(_) => DataType::I16,
            Scalar::U8(_) => DataType::U8,
            Scalar::Bool(_) => DataType::Bool,
            Scalar::Str(_) => DataType::Str,
            Scalar::DateTime(_) => DataType::DateTime,
        }
    }

    /// Numeric value as `f64`, or `None` for non numeric scalars.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Scalar::F64(value) => Some(value),
            Scalar::F32(value) => Some(value as f64),
            Scalar::I64(value) => Some(value as f64),
            Scalar::I32(value) => Some(value as f64),
            Scalar::I16(value) => Some(value as f64),
            Scalar::U8(value) => Some(value as f64),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Scalar::DateTime(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

/// A type that can be stored in a variable.
///
/// Implemented for every member of the closed set in `DataType`.
///
pub trait Element: Clone + Debug + Default + PartialOrd + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    fn into_data(array: ArrayD<Self>) -> DataArray;

    fn from_data(data: DataArray) -> Result<ArrayD<Self>>;

    /// Convert a scalar to this type. Numeric scalars are cast between numeric types when the
    /// value is representable.
    fn from_scalar(value: &Scalar) -> Option<Self>;

    fn into_scalar(self) -> Scalar;
}

macro_rules! numeric_element {
    ($type:ty, $variant:ident) => {
        impl Element for $type {
            const DATA_TYPE: DataType = DataType::$variant;

            fn into_data(array: ArrayD<Self>) -> DataArray {
                DataArray::$variant(array)
            }

            fn from_data(data: DataArray) -> Result<ArrayD<Self>> {
                match data {
                    DataArray::$variant(array) => Ok(array),
                    other => Err(Error::TypeMismatch {
                        expected: DataType::$variant,
                        got: other.data_type(),
                    }),
                }
            }

            fn from_scalar(value: &Scalar) -> Option<Self> {
                match value {
                    Scalar::$variant(value) => Some(*value),
                    other => other.as_f64().and_then(cast),
                }
            }

            fn into_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }
        }

        impl From<$type> for Scalar {
            fn from(value: $type) -> Self {
                Scalar::$variant(value)
            }
        }
    };
}

numeric_element!(f64, F64);
numeric_element!(f32, F32);
numeric_element!(i64, I64);
numeric_element!(i32, I32);
numeric_element!(i16, I16);
numeric_element!(u8, U8);

macro_rules! plain_element {
    ($type:ty, $variant:ident) => {
        impl Element for $type {
            const DATA_TYPE: DataType = DataType::$variant;

            fn into_data(array: ArrayD<Self>) -> DataArray {
                DataArray::$variant(array)
            }

            fn from_data(data: DataArray) -> Result<ArrayD<Self>> {
                match data {
                    DataArray::$variant(array) => Ok(array),
                    other => Err(Error::TypeMismatch {
                        expected: DataType::$variant,
                        got: other.data_type(),
                    }),
                }
            }

            fn from_scalar(value: &Scalar) -> Option<Self> {
                match value {
                    Scalar::$variant(value) => Some(value.clone()),
                    _ => None,
                }
            }

            fn into_scalar(self) -> Scalar {
                Scalar::$variant(self)
            }
        }

        impl From<$type> for Scalar {
            fn from(value: $type) -> Self {
                Scalar::$variant(value)
            }
        }
    };
}

plain_element!(bool, Bool);
plain_element!(String, Str);
plain_element!(DateTime<Utc>, DateTime);

/// A type-erased n-dimensional array.
///
#[derive(Clone, Debug, PartialEq)]
pub enum DataArray {
    F64(ArrayD<f64>),
    F32(ArrayD<f32>),
    I64(ArrayD<i64>),
    I32(ArrayD<i32>),
    I16(ArrayD<i16>),
    U8(ArrayD<u8>),
    Bool(ArrayD<bool>),
    Str(ArrayD<String>),
    DateTime(ArrayD<DateTime<Utc>>),
}

/// Evaluate an expression against whichever array a `DataArray` holds.
macro_rules! each {
    ($value:expr, $array:ident => $body:expr) => {
        match $value {
            DataArray::F64($array) => $body,
            DataArray::F32($array) => $body,
            DataArray::I64($array) => $body,
            DataArray::I32($array) => $body,
            DataArray::I16($array) => $body,
            DataArray::U8($array) => $body,
            DataArray::Bool($array) => $body,
            DataArray::Str($array) => $body,
            DataArray::DateTime($array) => $body,
        }
    };
}

/// Like `each!` but rewraps the resulting array in the same variant.
macro_rules! each_map {
    ($value:expr, $array:ident => $body:expr) => {
        match $value {
            DataArray::F64($array) => DataArray::F64($body),
            DataArray::F32($array) => DataArray::F32($body),
            DataArray::I64($array) => DataArray::I64($body),
            DataArray::I32($array) => DataArray::I32($body),
            DataArray::I16($array) => DataArray::I16($body),
            DataArray::U8($array) => DataArray::U8($body),
            DataArray::Bool($array) => DataArray::Bool($body),
            DataArray::Str($array) => DataArray::Str($body),
            DataArray::DateTime($array) => DataArray::DateTime($body),
        }
    };
}

/// Evaluate an expression against two arrays of the same variant.
macro_rules! each_pair {
    ($left:expr, $right:expr, $a:ident, $b:ident => $body:expr, $mismatch:expr) => {
        match ($left, $right) {
            (DataArray::F64($a), DataArray::F64($b)) => $body,
            (DataArray::F32($a), DataArray::F32($b)) => $body,
            (DataArray::I64($a), DataArray::I64($b)) => $body,
            (DataArray::I32($a), DataArray::I32($b)) => $body,
            (DataArray::I16($a), DataArray::I16($b)) => $body,
            (DataArray::U8($a), DataArray::U8($b)) => $body,
            (DataArray::Bool($a), DataArray::Bool($b)) => $body,
            (DataArray::Str($a), DataArray::Str($b)) => $body,
            (DataArray::DateTime($a), DataArray::DateTime($b)) => $body,
            _ => $mismatch,
        }
    };
}

fn filled<T: Element>(shape: &[usize], fill: Option<&Scalar>) -> ArrayD<T> {
    let value = fill.and_then(T::from_scalar).unwrap_or_default();
    ArrayD::from_elem(IxDyn(shape), value)
}

impl<T: Element> From<ArrayD<T>> for DataArray {
    fn from(array: ArrayD<T>) -> Self {
        T::into_data(array)
    }
}

impl DataArray {
    /// A new array of the given type and shape with every cell set to `fill`, or to the type's
    /// default value when `fill` is `None` or not convertible to the type.
    ///
    pub fn filled(data_type: DataType, shape: &[usize], fill: Option<&Scalar>) -> Self {
        match data_type {
            DataType::F64 => DataArray::F64(filled(shape, fill)),
            DataType::F32 => DataArray::F32(filled(shape, fill)),
            DataType::I64 => DataArray::I64(filled(shape, fill)),
            DataType::I32 => DataArray::I32(filled(shape, fill)),
            DataType::I16 => DataArray::I16(filled(shape, fill)),
            DataType::U8 => DataArray::U8(filled(shape, fill)),
            DataType::Bool => DataArray::Bool(filled(shape, fill)),
            DataType::Str => DataArray::Str(filled(shape, fill)),
            DataType::DateTime => DataArray::DateTime(filled(shape, fill)),
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            DataArray::F64(_) => DataType::F64,
            DataArray::F32(_) => DataType::F32,
            DataArray::I64(_) => DataType::I64,
            DataArray::I32(_) => DataType::I32,
            DataArray::I16(_) => DataType::I16,
            DataArray::U8(_) => DataType::U8,
            DataArray::Bool(_) => DataType::Bool,
            DataArray::Str(_) => DataType::Str,
            DataArray::DateTime(_) => DataType::DateTime,
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        each!(self, array => array.shape().to_vec())
    }

    pub fn rank(&self) -> usize {
        each!(self, array => array.ndim())
    }

    pub fn len(&self) -> usize {
        each!(self, array => array.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get a single cell.
    pub fn get(&self, index: &[usize]) -> Option<Scalar> {
        each!(self, array => array.get(index).map(|value| value.clone().into_scalar()))
    }

    /// Copy out a region, taking every `stride[i]`th cell along axis `i`.
    ///
    pub fn slice(&self, origin: &[usize], stride: &[usize], shape: &[usize]) -> Result<Self> {
        check_region(&self.shape(), origin, Some(stride), shape)?;
        let slice = |axis: usize| {
            let start = origin[axis];
            let end = if shape[axis] == 0 {
                start
            } else {
                start + (shape[axis] - 1) * stride[axis] + 1
            };
            Slice::new(start as isize, Some(end as isize), stride[axis] as isize)
        };

        Ok(each_map!(self, array => array
            .slice_each_axis(|axis| slice(axis.axis.index()))
            .to_owned()))
    }

    /// Overwrite the region starting at `origin` with `data`.
    ///
    pub fn write(&mut self, origin: &[usize], data: &DataArray) -> Result<()> {
        if self.data_type() != data.data_type() {
            return Err(Error::TypeMismatch {
                expected: self.data_type(),
                got: data.data_type(),
            });
        }
        let shape = data.shape();
        check_region(&self.shape(), origin, None, &shape)?;
        let slice = |axis: usize| {
            let start = origin[axis] as isize;
            Slice::from(start..start + shape[axis] as isize)
        };

        each_pair!(self, data, target, source => {
            target
                .slice_each_axis_mut(|axis| slice(axis.axis.index()))
                .assign(source);
            Ok(())
        }, unreachable!("types checked above"))
    }

    /// Grow to `shape`, which must be at least as large as the current shape along every axis.
    /// New cells are set to `fill`.
    ///
    pub fn grow(&mut self, shape: &[usize], fill: Option<&Scalar>) -> Result<()> {
        let current = self.shape();
        if current.len() != shape.len() {
            return Err(Error::RankMismatch {
                expected: current.len(),
                got: shape.len(),
            });
        }
        if current == shape {
            return Ok(());
        }
        if current.iter().zip(shape).any(|(old, new)| old > new) {
            return Err(Error::ShapeMismatch(format!(
                "cannot shrink {current:?} to {shape:?}"
            )));
        }

        let mut grown = DataArray::filled(self.data_type(), shape, fill);
        grown.write(&vec![0; shape.len()], self)?;
        *self = grown;

        Ok(())
    }

    /// Convert `f64` values to a numeric type, rounding to the nearest integer for integer
    /// types. Values that can't be represented in the target type are an error.
    ///
    pub fn from_f64(array: &ArrayD<f64>, data_type: DataType) -> Result<Self> {
        let rounded = || array.mapv(f64::round);

        Ok(match data_type {
            DataType::F64 => DataArray::F64(array.clone()),
            DataType::F32 => DataArray::F32(cast_array(array)?),
            DataType::I64 => DataArray::I64(cast_array(&rounded())?),
            DataType::I32 => DataArray::I32(cast_array(&rounded())?),
            DataType::I16 => DataArray::I16(cast_array(&rounded())?),
            DataType::U8 => DataArray::U8(cast_array(&rounded())?),
            other => {
                return Err(Error::InvalidArgument(format!(
                    "cannot convert numbers to {other:?}"
                )))
            }
        })
    }

    /// Values as `f64` for numeric arrays, `None` otherwise.
    pub fn to_f64(&self) -> Option<ArrayD<f64>> {
        match self {
            DataArray::F64(array) => Some(array.clone()),
            DataArray::F32(array) => Some(array.mapv(|v| v as f64)),
            DataArray::I64(array) => Some(array.mapv(|v| v as f64)),
            DataArray::I32(array) => Some(array.mapv(|v| v as f64)),
            DataArray::I16(array) => Some(array.mapv(|v| v as f64)),
            DataArray::U8(array) => Some(array.mapv(|v| v as f64)),
            _ => None,
        }
    }

    /// Whether a one dimensional array can be used to map values back to indices: strictly
    /// monotonic for ordered types, free of duplicates for the others.
    ///
    pub fn is_reversible(&self) -> Result<bool> {
        if self.rank() != 1 {
            return Err(Error::RankMismatch {
                expected: 1,
                got: self.rank(),
            });
        }

        Ok(match self {
            DataArray::Bool(array) => distinct(array.iter().cloned().collect()),
            DataArray::Str(array) => distinct(array.iter().cloned().collect()),
            _ => each!(self, array => strictly_monotonic(&array.iter().collect::<Vec<_>>())),
        })
    }
}

fn cast_array<T: Element + NumCast>(array: &ArrayD<f64>) -> Result<ArrayD<T>> {
    let mut unrepresentable = None;
    let cast_array = array.mapv(|value| {
        cast(value).unwrap_or_else(|| {
            unrepresentable = Some(value);
            T::default()
        })
    });

    match unrepresentable {
        Some(value) => Err(Error::InvalidArgument(format!(
            "{value} cannot be represented as {:?}",
            T::DATA_TYPE
        ))),
        None => Ok(cast_array),
    }
}

fn strictly_monotonic<T: PartialOrd>(values: &[T]) -> bool {
    let ascending = values.windows(2).all(|pair| pair[0] < pair[1]);
    let descending = values.windows(2).all(|pair| pair[0] > pair[1]);

    ascending || descending
}

fn distinct<T: Ord>(mut values: Vec<T>) -> bool {
    let len = values.len();
    values.sort();
    values.dedup();

    values.len() == len
}

/// Check that a region described by `origin`, optional `stride` and `shape` lies within an
/// array of shape `extent`.
///
pub(crate) fn check_region(
    extent: &[usize],
    origin: &[usize],
    stride: Option<&[usize]>,
    shape: &[usize],
) -> Result<()> {
    let rank = extent.len();
    for (what, len) in [("origin", origin.len()), ("shape", shape.len())] {
        if len != rank {
            return Err(Error::InvalidArgument(format!(
                "{what} has {len} indices, expected {rank}"
            )));
        }
    }
    if let Some(stride) = stride {
        if stride.len() != rank {
            return Err(Error::InvalidArgument(format!(
                "stride has {} indices, expected {rank}",
                stride.len()
            )));
        }
        if stride.contains(&0) {
            return Err(Error::InvalidArgument(String::from("stride must be positive")));
        }
    }

    for axis in 0..rank {
        let step = stride.map_or(1, |stride| stride[axis]);
        let end = if shape[axis] == 0 {
            origin[axis]
        } else {
            origin[axis] + (shape[axis] - 1) * step + 1
        };
        if end > extent[axis] {
            return Err(Error::InvalidArgument(format!(
                "region at {origin:?} with shape {shape:?} is out of range for shape {extent:?}"
            )));
        }
    }

    Ok(())
}
