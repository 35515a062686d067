use std::cmp;

use indexmap::IndexMap;

use crate::{
    data::{DataArray, DataType, Scalar},
    errors::{Error, Result},
    provider::{ChunkSizes, Provider, VariableStore},
};

/// The built in provider, keeping every variable's data in memory.
///
#[derive(Debug, Default)]
pub struct MemoryProvider {
    chunk_sizes: IndexMap<usize, Vec<usize>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn create_variable(
        &mut self,
        _name: &str,
        data_type: DataType,
        dimensions: &[String],
    ) -> Result<Box<dyn VariableStore>> {
        let chunk_sizes = self.chunk_sizes.get(&dimensions.len()).cloned();

        Ok(Box::new(MemoryStore::new(
            data_type,
            dimensions.len(),
            chunk_sizes,
        )))
    }

    fn chunking(&mut self) -> Option<&mut dyn ChunkSizes> {
        Some(self)
    }
}

impl ChunkSizes for MemoryProvider {
    fn set_chunk_sizes(&mut self, sizes: &[usize]) -> Result<()> {
        if sizes.contains(&0) {
            return Err(Error::InvalidArgument(String::from(
                "chunk sizes must be positive",
            )));
        }
        self.chunk_sizes.insert(sizes.len(), sizes.to_vec());

        Ok(())
    }

    fn chunk_sizes(&self, rank: usize) -> Option<&[usize]> {
        self.chunk_sizes.get(&rank).map(Vec::as_slice)
    }
}

/// In memory storage for one variable.
///
/// Writes go to a copy of the committed buffer, made on the first write of a transaction.
///
#[derive(Debug)]
pub struct MemoryStore {
    committed: DataArray,
    proposed: Option<DataArray>,
    chunk_sizes: Option<Vec<usize>>,
}

impl MemoryStore {
    pub fn new(data_type: DataType, rank: usize, chunk_sizes: Option<Vec<usize>>) -> Self {
        Self {
            committed: DataArray::filled(data_type, &vec![0; rank], None),
            proposed: None,
            chunk_sizes,
        }
    }

    fn buffer(&self, proposed: bool) -> &DataArray {
        match (&self.proposed, proposed) {
            (Some(buffer), true) => buffer,
            _ => &self.committed,
        }
    }
}

impl VariableStore for MemoryStore {
    fn data_type(&self) -> DataType {
        self.committed.data_type()
    }

    fn read_shape(&self, proposed: bool) -> Vec<usize> {
        self.buffer(proposed).shape()
    }

    fn read(
        &self,
        origin: &[usize],
        stride: &[usize],
        shape: &[usize],
        proposed: bool,
    ) -> Result<DataArray> {
        self.buffer(proposed).slice(origin, stride, shape)
    }

    fn write(&mut self, origin: &[usize], data: &DataArray, fill: Option<&Scalar>) -> Result<()> {
        let current = self.read_shape(true);
        if origin.len() != current.len() {
            return Err(Error::InvalidArgument(format!(
                "origin has {} indices, expected {}",
                origin.len(),
                current.len()
            )));
        }
        if data.rank() != current.len() {
            return Err(Error::RankMismatch {
                expected: current.len(),
                got: data.rank(),
            });
        }

        let buffer = match self.proposed.take() {
            Some(buffer) => buffer,
            None => self.committed.clone(),
        };
        let buffer = self.proposed.insert(buffer);
        let shape: Vec<usize> = current
            .iter()
            .zip(origin.iter().zip(data.shape()))
            .map(|(len, (origin, extent))| cmp::max(*len, origin + extent))
            .collect();
        buffer.grow(&shape, fill)?;

        buffer.write(origin, data)
    }

    fn on_commit(&mut self) {
        if let Some(buffer) = self.proposed.take() {
            self.committed = buffer;
        }
    }

    fn on_rollback(&mut self) {
        self.proposed = None;
    }

    fn chunk_sizes(&self) -> Option<&[usize]> {
        self.chunk_sizes.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::array;

    fn read_all(store: &MemoryStore, proposed: bool) -> Result<DataArray> {
        let shape = store.read_shape(proposed);
        store.read(&vec![0; shape.len()], &vec![1; shape.len()], &shape, proposed)
    }

    #[test]
    fn test_copy_on_write() -> Result<()> {
        let mut store = MemoryStore::new(DataType::I32, 1, None);
        store.write(&[0], &DataArray::from(array![1, 2, 3].into_dyn()), None)?;
        assert_eq!(store.read_shape(false), vec![0]);
        assert_eq!(store.read_shape(true), vec![3]);

        store.on_commit();
        assert_eq!(
            read_all(&store, false)?,
            DataArray::from(array![1, 2, 3].into_dyn())
        );

        store.write(&[5], &DataArray::from(array![6].into_dyn()), Some(&Scalar::I32(-1)))?;
        assert_eq!(
            read_all(&store, true)?,
            DataArray::from(array![1, 2, 3, -1, -1, 6].into_dyn())
        );
        store.on_rollback();
        assert_eq!(store.read_shape(true), vec![3]);

        Ok(())
    }

    #[test]
    fn test_write_rank_mismatch() {
        let mut store = MemoryStore::new(DataType::F64, 2, None);
        let data = DataArray::from(array![1.0].into_dyn());
        assert!(store.write(&[0], &data, None).is_err());
        assert!(store.proposed.is_none());
    }

    #[test]
    fn test_chunk_sizes() -> Result<()> {
        let mut provider = MemoryProvider::new();
        let dims = vec![String::from("x"), String::from("y")];
        let chunking = provider.chunking().unwrap();
        chunking.set_chunk_sizes(&[16, 16])?;
        assert!(chunking.set_chunk_sizes(&[0]).is_err());
        assert_eq!(chunking.chunk_sizes(2), Some(&[16, 16][..]));

        let store = provider.create_variable("v", DataType::U8, &dims)?;
        assert_eq!(store.chunk_sizes(), Some(&[16, 16][..]));
        let store = provider.create_variable("w", DataType::U8, &dims[..1])?;
        assert_eq!(store.chunk_sizes(), None);

        Ok(())
    }
}
