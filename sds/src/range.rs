use std::fmt::Debug;

use ndarray::Array1;
use num_traits::{cast, Float, PrimInt};

use crate::{
    computational::Computation,
    data::{DataArray, DataType, Element},
    errors::{Error, Result},
};

/// `start + index * step` for floating point types.
///
#[derive(Clone, Debug)]
pub struct FloatRange<N>
where
    N: Float + Element,
{
    pub start: N,
    pub step: N,
}

impl<N> FloatRange<N>
where
    N: Float + Element,
{
    pub fn new(start: N, step: N) -> Self {
        Self { start, step }
    }

    pub fn get(&self, index: usize) -> Result<N> {
        let index: N = cast(index).ok_or_else(|| out_of_range(index))?;

        Ok(index * self.step + self.start)
    }

    pub fn slice(&self, start: usize, stop: usize) -> Result<Array1<N>> {
        (start..stop).map(|index| self.get(index)).collect()
    }
}

/// `start + index * step` for integer types. Overflow is an error.
///
#[derive(Clone, Debug)]
pub struct IntRange<N>
where
    N: PrimInt + Element,
{
    pub start: N,
    pub step: N,
}

impl<N> IntRange<N>
where
    N: PrimInt + Element,
{
    pub fn new(start: N, step: N) -> Self {
        Self { start, step }
    }

    pub fn get(&self, index: usize) -> Result<N> {
        cast::<usize, N>(index)
            .and_then(|index| index.checked_mul(&self.step))
            .and_then(|offset| offset.checked_add(&self.start))
            .ok_or_else(|| out_of_range(index))
    }

    pub fn slice(&self, start: usize, stop: usize) -> Result<Array1<N>> {
        (start..stop).map(|index| self.get(index)).collect()
    }
}

fn out_of_range(index: impl Debug) -> Error {
    Error::InvalidArgument(format!("range value at index {index:?} is not representable"))
}

fn check_rank(origin: &[usize], shape: &[usize]) -> Result<()> {
    if origin.len() != 1 || shape.len() != 1 {
        return Err(Error::RankMismatch {
            expected: 1,
            got: shape.len(),
        });
    }

    Ok(())
}

impl<N> Computation for FloatRange<N>
where
    N: Float + Element,
{
    fn data_type(&self) -> DataType {
        N::DATA_TYPE
    }

    fn rank(&self) -> Option<usize> {
        Some(1)
    }

    fn compute(&self, origin: &[usize], shape: &[usize]) -> Result<DataArray> {
        check_rank(origin, shape)?;
        let values = self.slice(origin[0], origin[0] + shape[0])?;

        Ok(DataArray::from(values.into_dyn()))
    }
}

impl<N> Computation for IntRange<N>
where
    N: PrimInt + Element,
{
    fn data_type(&self) -> DataType {
        N::DATA_TYPE
    }

    fn rank(&self) -> Option<usize> {
        Some(1)
    }

    fn compute(&self, origin: &[usize], shape: &[usize]) -> Result<DataArray> {
        check_rank(origin, shape)?;
        let values = self.slice(origin[0], origin[0] + shape[0])?;

        Ok(DataArray::from(values.into_dyn()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::s;
    use paste::paste;

    macro_rules! range_tests {
        ($name:ident) => {
            paste! {
                #[test]
                fn [<$name _test_get>]() -> Result<()> {
                    let (data, range) = $name();
                    for i in 0..data.len() {
                        assert_eq!(range.get(i)?, data[i]);
                    }

                    Ok(())
                }

                #[test]
                fn [<$name _test_slice>]() -> Result<()> {
                    let (data, range) = $name();
                    for i in 0..data.len() / 2 {
                        let (start, end) = (i, data.len() - i);
                        assert_eq!(range.slice(start, end)?, data.slice(s![start..end]));
                    }

                    Ok(())
                }

                #[test]
                fn [<$name _test_compute>]() -> Result<()> {
                    let (data, range) = $name();
                    assert_eq!(range.rank(), Some(1));
                    let computed = range.compute(&[3], &[4])?;
                    assert_eq!(computed.data_type(), range.data_type());
                    assert_eq!(
                        computed,
                        DataArray::from(data.slice(s![3..7]).to_owned().into_dyn())
                    );
                    assert!(range.compute(&[0, 0], &[1, 1]).is_err());

                    Ok(())
                }
            }
        };
    }

    fn range_i32() -> (Array1<i32>, IntRange<i32>) {
        (Array1::from_iter((-20..130).step_by(5)), IntRange::new(-20, 5))
    }

    range_tests!(range_i32);

    fn range_i64() -> (Array1<i64>, IntRange<i64>) {
        (Array1::from_iter((-20..130).step_by(5)), IntRange::new(-20, 5))
    }

    range_tests!(range_i64);

    fn range_f32() -> (Array1<f32>, FloatRange<f32>) {
        (Array1::range(-20.0, 130.0, 5.0), FloatRange::new(-20.0, 5.0))
    }

    range_tests!(range_f32);

    fn range_f64() -> (Array1<f64>, FloatRange<f64>) {
        (Array1::range(-20.0, 130.0, 5.0), FloatRange::new(-20.0, 5.0))
    }

    range_tests!(range_f64);

    #[test]
    fn test_int_overflow() {
        let range = IntRange::new(i32::MAX - 1, 1);
        assert_eq!(range.get(1).unwrap(), i32::MAX);
        assert!(matches!(range.get(2), Err(Error::InvalidArgument(_))));
    }
}
