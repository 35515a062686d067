//! Staging changes: writes, appends and metadata updates.
//!
//! A change is planned with the DataSet borrowed, announced to `Changing` handlers with nothing
//! borrowed, then applied. Changes to a variable are propagated to the variables derived from
//! it as they are staged, so their proposed shapes stay current.
//!
use std::collections::HashMap;

use ndarray::Array;
use tracing::trace;

use crate::{
    data::{DataArray, Element},
    dataset::{DataSet, DataSetInner},
    errors::{Error, Result},
    events::{self, ChangeAction, ChangingEvent, ChangingHandler},
    geom::Rectangle,
    metadata::{AttributeValue, KEY_NAME},
    schema::SchemaVersion,
    variable::{VariableEntry, VariableId, VariableKind},
};

/// A `Changing` event waiting to be raised.
struct Notice {
    variable: VariableId,
    shape: Vec<usize>,
    affected: Rectangle,
    handlers: Vec<ChangingHandler>,
}

struct WritePlan {
    notices: Vec<Notice>,

    /// Derived variables with the region and extent the write gives them
    dependents: Vec<(VariableId, Rectangle, Vec<usize>)>,
    epoch: u64,
}

enum Applied {
    Staged,

    /// The write belongs to another DataSet
    Remote(DataSet, VariableId),
}

impl DataSetInner {
    fn check_write(&self, entry: &VariableEntry, origin: &[usize], data: &DataArray) -> Result<()> {
        self.check_writable()?;
        let core = &entry.core;
        if data.data_type() != core.data_type {
            return Err(Error::TypeMismatch {
                expected: core.data_type,
                got: data.data_type(),
            });
        }
        if data.rank() != core.rank() {
            return Err(Error::RankMismatch {
                expected: core.rank(),
                got: data.rank(),
            });
        }
        if origin.len() != core.rank() {
            return Err(Error::InvalidArgument(format!(
                "origin has {} indices but variable {} has rank {}",
                origin.len(),
                core.id,
                core.rank()
            )));
        }

        Ok(())
    }

    /// Follow transformation variables back to the variable that takes the data, reverse
    /// transforming the data on the way.
    fn resolve_write(
        &self,
        mut id: VariableId,
        mut origin: Vec<usize>,
        mut data: DataArray,
    ) -> Result<(VariableId, Vec<usize>, DataArray)> {
        loop {
            let entry = self.entry(id)?;
            self.check_write(entry, &origin, &data)?;
            match &entry.kind {
                VariableKind::Stored(_) | VariableKind::Reference(_) => {
                    return Ok((id, origin, data))
                }
                VariableKind::Computational(_) => {
                    return Err(Error::ReadOnly(format!(
                        "variable {id} is computed and can't be written"
                    )))
                }
                VariableKind::Transform(link) => {
                    let not_reversible = || {
                        Error::ReadOnly(format!("the transform of variable {id} isn't reversible"))
                    };
                    if !link.transform.is_reversible() {
                        return Err(not_reversible());
                    }
                    let target = Rectangle::new(origin, data.shape());
                    let needed = link.transform.reverse_index_rectangle(&target);
                    let source_type = self.entry(link.source)?.core.data_type;
                    data = link
                        .transform
                        .reverse_transform(data, source_type)
                        .ok_or_else(not_reversible)??;
                    origin = needed.origin;
                    id = link.source;
                }
            }
        }
    }

    /// `mirrored` is the extent of the referenced variable when `id` is a reference variable.
    fn plan_write(
        &self,
        id: VariableId,
        origin: &[usize],
        data: &DataArray,
        mirrored: Option<Vec<usize>>,
    ) -> Result<WritePlan> {
        let entry = self.entry(id)?;
        let affected = Rectangle::new(origin.to_vec(), data.shape());
        let shape: Vec<usize> = mirrored
            .unwrap_or_else(|| entry.core.proposed_shape())
            .into_iter()
            .zip(affected.end())
            .map(|(len, end)| len.max(end))
            .collect();

        let mut notices = vec![Notice {
            variable: id,
            shape: shape.clone(),
            affected: affected.clone(),
            handlers: entry.handlers.changing(),
        }];
        let mut staged = HashMap::from([(id, (affected, shape))]);
        let mut dependents = vec![];
        for dependent in self.graph.dependents_of(id) {
            let entry = self.entry(dependent)?;
            let VariableKind::Transform(link) = &entry.kind else {
                continue;
            };
            let Some((source_affected, source_shape)) = staged.get(&link.source) else {
                continue;
            };
            let affected = link.transform.transform_index_rectangle(source_affected);
            let shape = link.transform.transform_shape(source_shape);
            if !affected.is_empty() {
                notices.push(Notice {
                    variable: dependent,
                    shape: shape.clone(),
                    affected: affected.clone(),
                    handlers: entry.handlers.changing(),
                });
            }
            staged.insert(dependent, (affected.clone(), shape.clone()));
            dependents.push((dependent, affected, shape));
        }

        Ok(WritePlan {
            notices,
            dependents,
            epoch: self.epoch,
        })
    }

    fn apply_write(
        &mut self,
        id: VariableId,
        origin: &[usize],
        data: &DataArray,
        dependents: &[(VariableId, Rectangle, Vec<usize>)],
    ) -> Result<Applied> {
        let entry = self.entry_mut(id)?;
        match &mut entry.kind {
            VariableKind::Stored(store) => {
                let fill = entry.core.missing_value();
                store.write(origin, data, fill.as_ref())?;
            }
            VariableKind::Reference(remote) => {
                return Ok(Applied::Remote(remote.dataset.clone(), remote.id));
            }
            VariableKind::Transform(_) | VariableKind::Computational(_) => {
                return Err(Error::ReadOnly(format!("variable {id} has no storage")));
            }
        }
        self.stage(id, &Rectangle::new(origin.to_vec(), data.shape()), dependents)?;

        Ok(Applied::Staged)
    }

    /// Record a write to `id` and what it does to the variables derived from it.
    fn stage(
        &mut self,
        id: VariableId,
        affected: &Rectangle,
        dependents: &[(VariableId, Rectangle, Vec<usize>)],
    ) -> Result<()> {
        self.entry_mut(id)?.core.stage_write(affected);
        for (dependent, affected, shape) in dependents {
            let changes = self.entry_mut(*dependent)?.core.changes_mut();
            if !affected.is_empty() {
                changes.stage_write(affected);
            }
            changes.stage_extent(shape);
        }
        trace!(dataset = %self.id, variable = %id, ?affected, "staged write");

        Ok(())
    }
}

impl DataSet {
    /// Write `data` into variable `id` with its first element at `origin`, growing the variable
    /// as needed.
    pub fn put_data<T, D>(&self, id: VariableId, origin: &[usize], data: Array<T, D>) -> Result<()>
    where
        T: Element,
        D: ndarray::Dimension,
    {
        self.put_data_array(id, origin, DataArray::from(data.into_dyn()))
    }

    pub fn put_data_array(&self, id: VariableId, origin: &[usize], data: DataArray) -> Result<()> {
        let _op = self.operation();
        self.write(id, origin.to_vec(), data, ChangeAction::PutData)?;

        self.autocommit()
    }

    /// Write `data` just past the end of variable `id` along `axis`.
    ///
    /// Along every other axis, `data` must match the variable's proposed extent, unless that
    /// extent is still zero.
    ///
    pub fn append<T, D>(&self, id: VariableId, data: Array<T, D>, axis: usize) -> Result<()>
    where
        T: Element,
        D: ndarray::Dimension,
    {
        self.append_array(id, DataArray::from(data.into_dyn()), axis)
    }

    pub fn append_array(&self, id: VariableId, data: DataArray, axis: usize) -> Result<()> {
        let _op = self.operation();
        let shape = self.shape(id, SchemaVersion::Recent)?;
        if shape.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "can't append to variable {id}, it has no axes"
            )));
        }
        if axis >= shape.len() {
            return Err(Error::InvalidArgument(format!(
                "axis {axis} is out of range for variable {id} of rank {}",
                shape.len()
            )));
        }
        if data.rank() != shape.len() {
            return Err(Error::RankMismatch {
                expected: shape.len(),
                got: data.rank(),
            });
        }
        for (index, (len, extent)) in shape.iter().zip(data.shape()).enumerate() {
            if index != axis && *len != 0 && *len != extent {
                return Err(Error::ShapeMismatch(format!(
                    "variable {id} has extent {len} along axis {index}, data has {extent}"
                )));
            }
        }

        let mut origin = vec![0; shape.len()];
        origin[axis] = shape[axis];
        self.write(id, origin, data, ChangeAction::Append)?;

        self.autocommit()
    }

    /// Stage a write without committing.
    pub(crate) fn write(
        &self,
        id: VariableId,
        origin: Vec<usize>,
        data: DataArray,
        action: ChangeAction,
    ) -> Result<()> {
        let (target, origin, data) = self.with(|inner| inner.resolve_write(id, origin, data))?;
        if data.is_empty() {
            trace!(dataset = %self.id, variable = %id, "empty write ignored");
            return Ok(());
        }

        let mirrored = self.reference_extent(target, SchemaVersion::Recent)?;
        let plan = self.with(|inner| inner.plan_write(target, &origin, &data, mirrored))?;
        self.notify_changing(action, plan.notices, plan.epoch)?;
        let applied =
            self.with_mut(|inner| inner.apply_write(target, &origin, &data, &plan.dependents))?;
        if let Applied::Remote(remote, remote_id) = applied {
            let affected = Rectangle::new(origin.clone(), data.shape());
            remote.stage_remote(remote_id, origin, data, action)?;
            self.with_mut(|inner| inner.stage(target, &affected, &plan.dependents))?;
        }

        Ok(())
    }

    /// Write on behalf of a reference variable in another DataSet.
    fn stage_remote(
        &self,
        id: VariableId,
        origin: Vec<usize>,
        data: DataArray,
        action: ChangeAction,
    ) -> Result<()> {
        let _op = self.operation();
        self.write(id, origin, data, action)?;

        self.autocommit()
    }

    /// Raise `Changing` for each notice in turn, stopping at the first veto.
    fn notify_changing(
        &self,
        action: ChangeAction,
        notices: Vec<Notice>,
        epoch: u64,
    ) -> Result<()> {
        for notice in notices {
            if notice.handlers.is_empty() {
                continue;
            }
            let mut event = ChangingEvent::new(
                self.id,
                notice.variable,
                action,
                notice.shape,
                notice.affected,
            );
            events::raise_changing(&notice.handlers, &mut event);
            if event.wants_rollback() {
                self.rollback()?;
                return Err(Error::Cancelled(format!(
                    "a handler on variable {} rolled back the transaction",
                    notice.variable
                )));
            }
            if event.is_cancelled() {
                return Err(Error::Cancelled(format!(
                    "a handler on variable {} cancelled the change",
                    notice.variable
                )));
            }
            if self.with(|inner| Ok(inner.epoch))? != epoch {
                return Err(Error::Cancelled(String::from(
                    "the transaction ended while handlers were running",
                )));
            }
        }

        Ok(())
    }

    /// Stage a metadata entry. `None` removes the key.
    fn stage_metadata(
        &self,
        id: VariableId,
        key: String,
        value: Option<AttributeValue>,
    ) -> Result<()> {
        let _op = self.operation();
        let (notice, epoch) = self.with(|inner| {
            inner.check_writable()?;
            let entry = inner.entry(id)?;
            if key == KEY_NAME {
                if let Some(name) = value.as_ref().and_then(AttributeValue::as_str) {
                    if inner.find(name).is_some_and(|other| other != id) {
                        return Err(Error::InvalidArgument(format!(
                            "a variable named {name} already exists in dataset {}",
                            inner.id
                        )));
                    }
                }
            }
            let shape = entry.core.proposed_shape();
            let rank = shape.len();
            let notice = Notice {
                variable: id,
                shape,
                affected: Rectangle::new(vec![0; rank], vec![0; rank]),
                handlers: entry.handlers.changing(),
            };

            Ok((notice, inner.epoch))
        })?;
        self.notify_changing(ChangeAction::Metadata, vec![notice], epoch)?;
        self.with_mut(|inner| {
            let core = &mut inner.entry_mut(id)?.core;
            core.metadata.set(key, value)?;
            if core.metadata.has_changes() {
                core.changes_mut();
            }
            Ok(())
        })?;

        self.autocommit()
    }

    /// Stage a metadata entry on variable `id`. Setting `Name` renames the variable.
    pub fn set_metadata<S, V>(&self, id: VariableId, key: S, value: V) -> Result<()>
    where
        S: Into<String>,
        V: Into<AttributeValue>,
    {
        self.stage_metadata(id, key.into(), Some(value.into()))
    }

    pub fn remove_metadata(&self, id: VariableId, key: &str) -> Result<()> {
        self.stage_metadata(id, key.to_string(), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use ndarray::{array, Array2};

    use crate::{
        data::Scalar,
        metadata::KEY_MISSING_VALUE,
        range::FloatRange,
        transform::{ScaleTransform, StrideTransform},
    };

    #[test]
    fn test_put_data_grows() -> Result<()> {
        let dataset = DataSet::new();
        let id = dataset.add_variable::<i32>("v", &["x"])?;
        dataset.set_metadata(id, KEY_MISSING_VALUE, -1)?;
        dataset.put_data(id, &[2], array![5, 6])?;
        assert_eq!(dataset.shape(id, SchemaVersion::Committed)?, vec![4]);
        assert_eq!(dataset.get_data::<i32>(id)?, array![-1, -1, 5, 6].into_dyn());

        Ok(())
    }

    #[test]
    fn test_put_data_rejects_bad_writes() -> Result<()> {
        let dataset = DataSet::new();
        let id = dataset.add_variable::<i32>("v", &["x"])?;
        assert!(matches!(
            dataset.put_data(id, &[0], array![1.0, 2.0]),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            dataset.put_data(id, &[0, 0], array![[1, 2]]),
            Err(Error::RankMismatch { .. })
        ));
        assert!(matches!(
            dataset.put_data(id, &[0, 0], array![1, 2]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(!dataset.has_changes()?);

        Ok(())
    }

    #[test]
    fn test_empty_write_is_noop() -> Result<()> {
        let dataset = DataSet::new();
        let id = dataset.add_variable::<i32>("v", &["x"])?;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        dataset.on_changing(id, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })?;
        dataset.put_data(id, &[3], Array::<i32, _>::zeros(0))?;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(dataset.shape(id, SchemaVersion::Committed)?, vec![0]);
        assert_eq!(dataset.version()?, 1);

        Ok(())
    }

    #[test]
    fn test_append() -> Result<()> {
        let dataset = DataSet::new();
        dataset.set_autocommit(false)?;
        let id = dataset.add_variable::<f64>("v", &["t", "x"])?;
        dataset.append(id, Array2::<f64>::zeros((1, 3)), 0)?;
        dataset.append(id, Array2::<f64>::ones((2, 3)), 0)?;
        assert_eq!(dataset.shape(id, SchemaVersion::Recent)?, vec![3, 3]);
        assert!(matches!(
            dataset.append(id, Array2::<f64>::ones((1, 2)), 0),
            Err(Error::ShapeMismatch(_))
        ));
        assert!(matches!(
            dataset.append(id, Array2::<f64>::ones((1, 3)), 2),
            Err(Error::InvalidArgument(_))
        ));
        dataset.commit()?;
        assert_eq!(
            dataset.get_data::<f64>(id)?,
            array![[0.0, 0.0, 0.0], [1.0, 1.0, 1.0], [1.0, 1.0, 1.0]].into_dyn()
        );

        Ok(())
    }

    #[test]
    fn test_append_scalar() -> Result<()> {
        let dataset = DataSet::new();
        let id = dataset.add_variable::<f64>("v", &[])?;
        assert!(matches!(
            dataset.append_array(id, DataArray::from(ndarray::arr0(1.0).into_dyn()), 0),
            Err(Error::InvalidArgument(_))
        ));

        Ok(())
    }

    #[test]
    fn test_cancel() -> Result<()> {
        let dataset = DataSet::new();
        let id = dataset.add_variable::<i32>("v", &["x"])?;
        dataset.on_changing(id, |event| {
            if event.shape[0] > 2 {
                event.cancel();
            }
        })?;
        dataset.put_data(id, &[0], array![1, 2])?;
        assert!(matches!(
            dataset.put_data(id, &[2], array![3]),
            Err(Error::Cancelled(_))
        ));
        assert_eq!(dataset.get_data::<i32>(id)?, array![1, 2].into_dyn());

        Ok(())
    }

    #[test]
    fn test_handler_rollback() -> Result<()> {
        let dataset = DataSet::new();
        dataset.set_autocommit(false)?;
        let a = dataset.add_variable::<i32>("a", &["x"])?;
        let b = dataset.add_variable::<i32>("b", &["y"])?;
        dataset.commit()?;
        dataset.put_data(a, &[0], array![1, 2])?;
        dataset.on_changing(b, |event| event.rollback())?;
        assert!(matches!(
            dataset.put_data(b, &[0], array![1]),
            Err(Error::Cancelled(_))
        ));
        assert!(!dataset.has_changes()?);
        assert_eq!(dataset.shape(a, SchemaVersion::Recent)?, vec![0]);

        Ok(())
    }

    #[test]
    fn test_handler_may_read() -> Result<()> {
        let dataset = DataSet::new();
        let id = dataset.add_variable::<i32>("v", &["x"])?;
        dataset.put_data(id, &[0], array![1, 2])?;
        let seen = Arc::new(parking_lot::Mutex::new(vec![]));
        let (reader, sink) = (dataset.clone(), seen.clone());
        dataset.on_changing(id, move |_| {
            if let Ok(data) = reader.get_data::<i32>(id) {
                sink.lock().extend(data.iter().copied());
            }
        })?;
        dataset.put_data(id, &[2], array![3])?;
        assert_eq!(*seen.lock(), vec![1, 2]);

        Ok(())
    }

    #[test]
    fn test_write_through_transform() -> Result<()> {
        let dataset = DataSet::new();
        let source = dataset.add_variable::<i32>("metres", &["x"])?;
        let scaled = dataset.add_transform("centimetres", source, ScaleTransform::new(100.0, 0.0))?;
        dataset.put_data(scaled, &[0], array![100.0, 250.0])?;
        assert_eq!(dataset.get_data::<i32>(source)?, array![1, 3].into_dyn());
        assert_eq!(dataset.shape(scaled, SchemaVersion::Committed)?, vec![2]);

        let every_other = dataset.add_transform(
            "every_other",
            source,
            StrideTransform::new(vec![0], vec![2], vec!["half_x"])?,
        )?;
        assert!(matches!(
            dataset.put_data(every_other, &[0], array![1]),
            Err(Error::ReadOnly(_))
        ));

        let computed = dataset.add_computational("ramp", &["x"], FloatRange::new(0.0, 0.5))?;
        assert!(matches!(
            dataset.put_data(computed, &[0], array![1.0]),
            Err(Error::ReadOnly(_))
        ));

        Ok(())
    }

    #[test]
    fn test_dependents_see_changing() -> Result<()> {
        let dataset = DataSet::new();
        let source = dataset.add_variable::<i32>("v", &["x"])?;
        let coarse = dataset.add_transform(
            "coarse",
            source,
            StrideTransform::new(vec![1], vec![3], vec!["coarse_x"])?,
        )?;
        let seen = Arc::new(parking_lot::Mutex::new(vec![]));
        let sink = seen.clone();
        dataset.on_changing(coarse, move |event| {
            sink.lock().push((event.affected.clone(), event.shape.clone()));
        })?;

        // Touches only source index 0, which the stride skips
        dataset.put_data(source, &[0], array![0])?;
        assert!(seen.lock().is_empty());

        dataset.put_data(source, &[1], Array::from_iter(1..10))?;
        assert_eq!(
            *seen.lock(),
            vec![(Rectangle::new(vec![0], vec![3]), vec![3])]
        );
        assert_eq!(dataset.shape(coarse, SchemaVersion::Committed)?, vec![3]);

        Ok(())
    }

    #[test]
    fn test_metadata() -> Result<()> {
        let dataset = DataSet::new();
        let a = dataset.add_variable::<f64>("a", &["x"])?;
        let b = dataset.add_variable::<f64>("b", &["x"])?;
        dataset.set_metadata(a, "units", "K")?;
        assert_eq!(
            dataset.metadata(a, "units", SchemaVersion::Committed)?,
            Some("K".into())
        );
        dataset.remove_metadata(a, "units")?;
        assert_eq!(dataset.metadata(a, "units", SchemaVersion::Committed)?, None);

        dataset.set_metadata(a, KEY_NAME, "air_temperature")?;
        assert_eq!(dataset.find_variable("air_temperature")?, a);
        assert!(matches!(
            dataset.set_metadata(b, KEY_NAME, "air_temperature"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(dataset.remove_metadata(b, KEY_NAME).is_err());

        dataset.set_metadata(b, KEY_MISSING_VALUE, f64::NAN)?;
        assert!(matches!(dataset.missing_value(b)?, Some(Scalar::F64(value)) if value.is_nan()));

        Ok(())
    }
}
