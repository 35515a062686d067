//! Looking values up by coordinate rather than by index.
//!
use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

use crate::{
    data::{DataArray, DataType, Element, Scalar},
    dataset::DataSet,
    errors::{Error, Result},
    geom::Region,
    variable::VariableId,
};

/// How a coordinate value that isn't on an axis sample is handled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Only values equal to an axis sample are found
    Exact,

    /// The closest sample wins, ties going to the lower index. Values beyond either end of the
    /// axis snap to that end.
    Nearest,

    /// Linear interpolation between the two bracketing samples. Real axes and data only.
    Interpolation,
}

/// Where a coordinate value falls on an axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AxisIndex {
    Exact(usize),

    /// Between `lower` and `lower + 1`, `coefficient` of the way from one to the other
    Between { lower: usize, coefficient: f64 },
}

impl AxisIndex {
    fn lower(&self) -> usize {
        match *self {
            AxisIndex::Exact(index) => index,
            AxisIndex::Between { lower, .. } => lower,
        }
    }

    fn len(&self) -> usize {
        match self {
            AxisIndex::Exact(_) => 1,
            AxisIndex::Between { .. } => 2,
        }
    }

    /// The same position relative to the start of the cells it touches.
    fn relative(&self) -> Self {
        match *self {
            AxisIndex::Exact(_) => AxisIndex::Exact(0),
            AxisIndex::Between { coefficient, .. } => AxisIndex::Between {
                lower: 0,
                coefficient,
            },
        }
    }
}

enum Position {
    Exact(usize),
    Between(usize),
    Before,
    After,
}

/// Binary search of a strictly monotonic axis, ascending or descending.
fn locate<T: PartialOrd>(values: &[T], value: &T) -> Position {
    let ascending = values.first() <= values.last();
    let index = if ascending {
        values.partition_point(|sample| sample < value)
    } else {
        values.partition_point(|sample| sample > value)
    };

    if index < values.len() && values[index].partial_cmp(value) == Some(Ordering::Equal) {
        Position::Exact(index)
    } else if index == 0 {
        Position::Before
    } else if index == values.len() {
        Position::After
    } else {
        Position::Between(index - 1)
    }
}

fn not_found(value: &Scalar, mode: SelectionMode) -> Error {
    Error::ValueNotFound(format!("{value:?} is not on the axis in {mode:?} mode"))
}

fn resolve<T, D, F, C>(
    values: &[T],
    value: &T,
    scalar: &Scalar,
    mode: SelectionMode,
    distance: F,
    coefficient: C,
) -> Result<AxisIndex>
where
    T: PartialOrd,
    D: PartialOrd,
    F: Fn(&T, &T) -> D,
    C: Fn(&T, &T, &T) -> Option<f64>,
{
    match (locate(values, value), mode) {
        (Position::Exact(index), _) => Ok(AxisIndex::Exact(index)),
        (_, SelectionMode::Exact) => Err(not_found(scalar, mode)),
        (Position::Before, SelectionMode::Nearest) => Ok(AxisIndex::Exact(0)),
        (Position::After, SelectionMode::Nearest) => Ok(AxisIndex::Exact(values.len() - 1)),
        (Position::Between(lower), SelectionMode::Nearest) => {
            let upper = lower + 1;
            if distance(&values[lower], value) <= distance(&values[upper], value) {
                Ok(AxisIndex::Exact(lower))
            } else {
                Ok(AxisIndex::Exact(upper))
            }
        }
        (Position::Between(lower), SelectionMode::Interpolation) => {
            coefficient(&values[lower], &values[lower + 1], value)
                .map(|coefficient| AxisIndex::Between { lower, coefficient })
                .ok_or_else(|| not_found(scalar, mode))
        }
        (Position::Before | Position::After, SelectionMode::Interpolation) => {
            Err(not_found(scalar, mode))
        }
    }
}

/// Find `value` on a rank 1 `axis`.
///
/// Numeric and datetime axes are searched by value and must be strictly monotonic. Boolean and
/// string axes only support exact matches.
///
pub fn index_of(axis: &DataArray, value: &Scalar, mode: SelectionMode) -> Result<AxisIndex> {
    if axis.rank() != 1 {
        return Err(Error::RankMismatch {
            expected: 1,
            got: axis.rank(),
        });
    }
    if axis.is_empty() {
        return Err(not_found(value, mode));
    }
    let mismatch = || Error::TypeMismatch {
        expected: axis.data_type(),
        got: value.data_type(),
    };

    let data_type = axis.data_type();
    if data_type == DataType::DateTime {
        let values: Vec<DateTime<Utc>> = DateTime::<Utc>::from_data(axis.clone())?
            .iter()
            .copied()
            .collect();
        let target = value.as_datetime().ok_or_else(mismatch)?;

        resolve(
            &values,
            &target,
            value,
            mode,
            |sample, target| (*sample - *target).abs(),
            |_, _, _| None,
        )
    } else if data_type.is_numeric() {
        let values: Vec<f64> = axis
            .to_f64()
            .ok_or_else(mismatch)?
            .iter()
            .copied()
            .collect();
        let target = value.as_f64().ok_or_else(mismatch)?;
        let real = data_type.is_real();

        resolve(
            &values,
            &target,
            value,
            mode,
            |sample, target| (sample - target).abs(),
            |low, high, target| real.then(|| (target - low) / (high - low)),
        )
    } else {
        if value.data_type() != data_type {
            return Err(mismatch());
        }
        let found = (0..axis.len()).find(|index| axis.get(&[*index]).as_ref() == Some(value));
        match (found, mode) {
            (Some(index), SelectionMode::Exact | SelectionMode::Nearest) => {
                Ok(AxisIndex::Exact(index))
            }
            _ => Err(not_found(value, mode)),
        }
    }
}

fn interpolate(values: &ArrayD<f64>, indices: &[AxisIndex], cell: &mut Vec<usize>) -> Option<f64> {
    let axis = cell.len();
    if axis == indices.len() {
        return values.get(cell.as_slice()).copied();
    }
    let mut corner = |index: usize| {
        cell.push(index);
        let value = interpolate(values, indices, cell);
        cell.pop();
        value
    };

    // Corners with zero weight are never read
    match indices[axis] {
        AxisIndex::Exact(index) => corner(index),
        AxisIndex::Between { lower, coefficient } if coefficient == 0.0 => corner(lower),
        AxisIndex::Between { lower, coefficient } if coefficient == 1.0 => corner(lower + 1),
        AxisIndex::Between { lower, coefficient } => {
            let low = corner(lower)?;
            let high = corner(lower + 1)?;
            Some(low + (high - low) * coefficient)
        }
    }
}

/// The value of `data` at a position given per axis.
///
/// If every axis position is exact, this is the value of that cell. Otherwise the value is
/// interpolated over the surrounding cells, one axis at a time, which needs real data.
///
pub fn select(data: &DataArray, indices: &[AxisIndex]) -> Result<Scalar> {
    if data.rank() != indices.len() {
        return Err(Error::RankMismatch {
            expected: data.rank(),
            got: indices.len(),
        });
    }
    let outside = || Error::ValueNotFound(format!("{indices:?} is outside the data"));

    if indices.iter().all(|index| matches!(index, AxisIndex::Exact(_))) {
        let cell: Vec<usize> = indices.iter().map(AxisIndex::lower).collect();
        return data.get(&cell).ok_or_else(outside);
    }
    if !data.data_type().is_real() {
        return Err(Error::ValueNotFound(format!(
            "can't interpolate data of type {:?}",
            data.data_type()
        )));
    }
    let values = data.to_f64().ok_or_else(outside)?;
    let value = interpolate(&values, indices, &mut Vec::with_capacity(indices.len()))
        .ok_or_else(outside)?;

    Ok(match data.data_type() {
        DataType::F32 => Scalar::F32(value as f32),
        _ => Scalar::F64(value),
    })
}

impl DataSet {
    /// Find `value` on axis variable `axis`, as of the last commit.
    pub fn index_of(
        &self,
        axis: VariableId,
        value: &Scalar,
        mode: SelectionMode,
    ) -> Result<AxisIndex> {
        let values = self.read(axis, &Region::all(), false)?;

        index_of(&values, value, mode)
    }

    /// The value of variable `id` at the given coordinates, as of the last commit.
    ///
    /// Each dimension of the variable is resolved through an axis: the axis of the variable's
    /// first coordinate system laid out along that dimension if there is one, otherwise the
    /// rank 1 variable named after the dimension. Coordinates are given by axis name, or by
    /// dimension name.
    ///
    pub fn get_value<T: Element>(
        &self,
        id: VariableId,
        mode: SelectionMode,
        coordinates: &[(&str, Scalar)],
    ) -> Result<T> {
        let axes = self.with(|inner| {
            let core = &inner.entry(id)?.core;
            let system = core
                .coordinate_systems
                .iter()
                .chain(&core.proposed_coordinate_systems)
                .next()
                .and_then(|name| inner.coordinate_system(name));
            let along = |axis: VariableId, dimension: &str| {
                inner
                    .entry(axis)
                    .map(|entry| entry.core.dimensions == [dimension])
                    .unwrap_or(false)
            };

            core.dimensions
                .iter()
                .map(|dimension| {
                    let from_system = system.and_then(|system| {
                        system
                            .axes
                            .iter()
                            .copied()
                            .find(|axis| along(*axis, dimension.as_str()))
                    });
                    let by_name = || {
                        inner
                            .find(dimension)
                            .filter(|axis| along(*axis, dimension.as_str()))
                    };
                    let axis = from_system.or_else(by_name).ok_or_else(|| {
                        Error::ValueNotFound(format!("no axis for dimension {dimension}"))
                    })?;
                    let name = inner.entry(axis)?.core.name().to_string();

                    Ok((dimension.clone(), axis, name))
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let mut origin = Vec::with_capacity(axes.len());
        let mut shape = Vec::with_capacity(axes.len());
        let mut indices = Vec::with_capacity(axes.len());
        for (dimension, axis, name) in axes {
            let value = coordinates
                .iter()
                .find(|(key, _)| *key == name)
                .or_else(|| coordinates.iter().find(|(key, _)| *key == dimension))
                .map(|(_, value)| value)
                .ok_or_else(|| {
                    Error::InvalidArgument(format!("no coordinate given for axis {name}"))
                })?;
            let index = self.index_of(axis, value, mode)?;
            origin.push(index.lower());
            shape.push(index.len());
            indices.push(index.relative());
        }

        let cells = self.read(id, &Region::new(origin, shape), false)?;
        let value = select(&cells, &indices)?;

        T::from_scalar(&value).ok_or(Error::TypeMismatch {
            expected: T::DATA_TYPE,
            got: value.data_type(),
        })
    }
}
