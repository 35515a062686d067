use std::cmp;

use serde::{Deserialize, Serialize};

use crate::{
    data::check_region,
    errors::{Error, Result},
};

/// An axis aligned hyper-rectangle in index space.
///
/// Used to describe the region touched by a write, so that dependent variables know which part
/// of themselves needs to be recomputed.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rectangle {
    pub origin: Vec<usize>,
    pub shape: Vec<usize>,
}

impl Rectangle {
    pub fn new(origin: Vec<usize>, shape: Vec<usize>) -> Self {
        debug_assert_eq!(origin.len(), shape.len());
        Self { origin, shape }
    }

    /// The rectangle covering an entire array of the given shape.
    pub fn from_shape(shape: &[usize]) -> Self {
        Self::new(vec![0; shape.len()], shape.to_vec())
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// A rectangle is empty if it has no extent along any axis. Rank 0 rectangles (scalars) are
    /// never empty.
    pub fn is_empty(&self) -> bool {
        self.shape.contains(&0)
    }

    /// One past the last index along each axis.
    pub fn end(&self) -> Vec<usize> {
        self.origin
            .iter()
            .zip(&self.shape)
            .map(|(origin, len)| origin + len)
            .collect()
    }

    /// The smallest rectangle containing both `self` and `other`.
    ///
    /// Empty rectangles don't contribute.
    ///
    pub fn bounding_box(&self, other: &Rectangle) -> Rectangle {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }

        let origin: Vec<usize> = self
            .origin
            .iter()
            .zip(&other.origin)
            .map(|(a, b)| cmp::min(*a, *b))
            .collect();
        let shape = self
            .end()
            .iter()
            .zip(other.end())
            .zip(&origin)
            .map(|((a, b), origin)| cmp::max(*a, b) - origin)
            .collect();

        Rectangle::new(origin, shape)
    }

    /// The overlap of `self` and `other`. May be empty.
    pub fn intersect(&self, other: &Rectangle) -> Rectangle {
        let origin: Vec<usize> = self
            .origin
            .iter()
            .zip(&other.origin)
            .map(|(a, b)| cmp::max(*a, *b))
            .collect();
        let shape = self
            .end()
            .iter()
            .zip(other.end())
            .zip(&origin)
            .map(|((a, b), origin)| cmp::min(*a, b).saturating_sub(*origin))
            .collect();

        Rectangle::new(origin, shape)
    }

    /// Whether `other` lies entirely within `self`.
    pub fn contains(&self, other: &Rectangle) -> bool {
        if other.is_empty() {
            return true;
        }

        self.origin.iter().zip(&other.origin).all(|(a, b)| a <= b)
            && self.end().iter().zip(other.end()).all(|(a, b)| *a >= b)
    }
}

/// A region of a variable to read, optionally strided.
///
/// Parts left unset default to the whole variable: origin at zero, unit stride, and a shape
/// reaching to the end of every axis.
///
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Region {
    pub origin: Option<Vec<usize>>,
    pub stride: Option<Vec<usize>>,
    pub shape: Option<Vec<usize>>,
}

impl Region {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(origin: Vec<usize>, shape: Vec<usize>) -> Self {
        Self {
            origin: Some(origin),
            stride: None,
            shape: Some(shape),
        }
    }

    pub fn strided(origin: Vec<usize>, stride: Vec<usize>, shape: Vec<usize>) -> Self {
        Self {
            origin: Some(origin),
            stride: Some(stride),
            shape: Some(shape),
        }
    }

    /// Fill in the defaults for an array of shape `extent` and check the result is in range.
    pub(crate) fn resolve(&self, extent: &[usize]) -> Result<Selection> {
        let rank = extent.len();
        let origin = self.origin.clone().unwrap_or_else(|| vec![0; rank]);
        let stride = self.stride.clone().unwrap_or_else(|| vec![1; rank]);
        for (what, len) in [("origin", origin.len()), ("stride", stride.len())] {
            if len != rank {
                return Err(Error::InvalidArgument(format!(
                    "{what} has {len} indices, expected {rank}"
                )));
            }
        }
        if stride.contains(&0) {
            return Err(Error::InvalidArgument(String::from("stride must be positive")));
        }
        let shape = match &self.shape {
            Some(shape) => shape.clone(),
            None => extent
                .iter()
                .zip(origin.iter().zip(&stride))
                .map(|(len, (origin, stride))| len.saturating_sub(*origin).div_ceil(*stride))
                .collect(),
        };
        check_region(extent, &origin, Some(&stride), &shape)?;

        Ok(Selection {
            origin,
            stride,
            shape,
        })
    }
}

/// A `Region` resolved against a concrete extent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Selection {
    pub origin: Vec<usize>,
    pub stride: Vec<usize>,
    pub shape: Vec<usize>,
}

impl Selection {
    pub fn is_contiguous(&self) -> bool {
        self.stride.iter().all(|stride| *stride == 1)
    }

    /// The smallest contiguous rectangle containing every selected cell.
    pub fn covering(&self) -> Rectangle {
        let shape = self
            .shape
            .iter()
            .zip(&self.stride)
            .map(|(len, stride)| if *len == 0 { 0 } else { (len - 1) * stride + 1 })
            .collect();

        Rectangle::new(self.origin.clone(), shape)
    }

    pub fn into_region(self) -> Region {
        Region::strided(self.origin, self.stride, self.shape)
    }
}
