//! Reading variables, committed or proposed.
//!
use ndarray::ArrayD;

use crate::{
    data::{DataArray, Element},
    dataset::DataSet,
    errors::{Error, Result},
    geom::{Rectangle, Region, Selection},
    schema::SchemaVersion,
    variable::{VariableId, VariableKind},
};

enum ReadPlan {
    Done(DataArray),

    /// Read `needed` from the transform's source, then transform it into `target`
    Source {
        source: VariableId,
        needed: Rectangle,
        target: Rectangle,
        selection: Selection,
    },
    Remote {
        dataset: DataSet,
        id: VariableId,
        region: Region,
    },
}

/// Pick the strided cells of a `selection` out of its covering rectangle.
fn stride(data: DataArray, selection: &Selection) -> Result<DataArray> {
    if selection.is_contiguous() {
        Ok(data)
    } else {
        data.slice(&vec![0; selection.shape.len()], &selection.stride, &selection.shape)
    }
}

impl DataSet {
    /// All of variable `id` as of the last commit.
    pub fn get_data<T: Element>(&self, id: VariableId) -> Result<ArrayD<T>> {
        T::from_data(self.read(id, &Region::all(), false)?)
    }

    pub fn get_data_region<T: Element>(
        &self,
        id: VariableId,
        origin: &[usize],
        shape: &[usize],
    ) -> Result<ArrayD<T>> {
        let region = Region::new(origin.to_vec(), shape.to_vec());

        T::from_data(self.read(id, &region, false)?)
    }

    pub fn get_data_strided<T: Element>(
        &self,
        id: VariableId,
        origin: &[usize],
        stride: &[usize],
        shape: &[usize],
    ) -> Result<ArrayD<T>> {
        let region = Region::strided(origin.to_vec(), stride.to_vec(), shape.to_vec());

        T::from_data(self.read(id, &region, false)?)
    }

    /// Committed data without knowing its type up front.
    pub fn get_data_array(&self, id: VariableId, region: &Region) -> Result<DataArray> {
        self.read(id, region, false)
    }

    /// Read at a given schema version. `Proposed` and `Recent` both see staged writes.
    pub fn read_data(
        &self,
        id: VariableId,
        region: &Region,
        version: SchemaVersion,
    ) -> Result<DataArray> {
        self.read(id, region, version != SchemaVersion::Committed)
    }

    pub(crate) fn read(
        &self,
        id: VariableId,
        region: &Region,
        proposed: bool,
    ) -> Result<DataArray> {
        let version = if proposed {
            SchemaVersion::Recent
        } else {
            SchemaVersion::Committed
        };
        let mirrored = self.reference_extent(id, version)?;
        let plan = self.with(|inner| {
            let entry = inner.entry(id)?;
            let extent = match mirrored {
                Some(extent) => extent,
                None => entry.core.shape(version),
            };
            let selection = region.resolve(&extent)?;
            if selection.shape.contains(&0) {
                return Ok(ReadPlan::Done(DataArray::filled(
                    entry.core.data_type,
                    &selection.shape,
                    None,
                )));
            }

            match &entry.kind {
                VariableKind::Stored(store) => Ok(ReadPlan::Done(store.read(
                    &selection.origin,
                    &selection.stride,
                    &selection.shape,
                    proposed,
                )?)),
                VariableKind::Computational(computed) => {
                    let covering = selection.covering();
                    let data = computed
                        .computation
                        .compute(&covering.origin, &covering.shape)?;
                    Ok(ReadPlan::Done(stride(data, &selection)?))
                }
                VariableKind::Transform(link) => {
                    let target = selection.covering();
                    Ok(ReadPlan::Source {
                        source: link.source,
                        needed: link.transform.reverse_index_rectangle(&target),
                        target,
                        selection,
                    })
                }
                VariableKind::Reference(remote) => Ok(ReadPlan::Remote {
                    dataset: remote.dataset.clone(),
                    id: remote.id,
                    region: selection.into_region(),
                }),
            }
        })?;

        match plan {
            ReadPlan::Done(data) => Ok(data),
            ReadPlan::Source {
                source,
                needed,
                target,
                selection,
            } => {
                let data = self.read(source, &Region::new(needed.origin, needed.shape), proposed)?;
                let transformed = self.with(|inner| match &inner.entry(id)?.kind {
                    VariableKind::Transform(link) => link.transform.transform(&target, data),
                    _ => Err(Error::not_found(id)),
                })?;

                stride(transformed, &selection)
            }
            ReadPlan::Remote {
                dataset,
                id,
                region,
            } => dataset.read(id, &region, proposed),
        }
    }
}
