//! Commit and rollback.
//!
//! Committing is two phase. In the first phase each participating DataSet builds a changeset,
//! lets its derived variables add their own changes, prepares the DataSets its reference
//! variables follow, and checks its constraints. Only when every participant has prepared are
//! the stores told to commit and the new state made current. If anything fails in the first
//! phase, every DataSet that took part is rolled back.
//!
use std::collections::HashSet;

use tracing::{debug, warn};

use crate::{
    changes::Changeset,
    dataset::{DataSet, DataSetId, DataSetInner},
    errors::{Error, Result},
    events::{self, ChangedEvent, ChangedHandler, RolledBackEvent, RolledBackHandler},
    geom::Region,
    reference::RemoteVariable,
    transform::DependentVariable,
    variable::{VariableId, VariableKind},
};

/// The DataSets taking part in one commit.
#[derive(Default)]
pub(crate) struct CommitContext {
    pub visited: HashSet<DataSetId>,

    /// Every DataSet whose first phase started
    pub touched: Vec<DataSet>,

    /// DataSets whose first phase succeeded, followed DataSets before those following them
    pub prepared: Vec<DataSet>,
}

type ChangedEvents = Vec<(Vec<ChangedHandler>, ChangedEvent)>;
type RolledBackEvents = Vec<(Vec<RolledBackHandler>, RolledBackEvent)>;

impl DataSetInner {
    /// Let variable `id` contribute to the changeset. Returns the remote side of reference
    /// variables, which have to be handled without this DataSet borrowed.
    ///
    fn precommit(
        &mut self,
        id: VariableId,
        changeset: &mut Changeset,
    ) -> Result<Option<RemoteVariable>> {
        let entry = self.entry_mut(id)?;
        match &mut entry.kind {
            VariableKind::Stored(store) => {
                if changeset.contains(id) {
                    store.on_precommit()?;
                }
                Ok(None)
            }
            VariableKind::Transform(link) => {
                link.update_changes(&entry.core, changeset)?;
                Ok(None)
            }
            VariableKind::Computational(computed) => {
                computed.update_changes(&entry.core, changeset)?;
                Ok(None)
            }
            VariableKind::Reference(remote) => Ok(Some(remote.clone())),
        }
    }

    /// Take the changeset's entries as the variables' pending changes.
    fn absorb(&mut self, changeset: Changeset) {
        for changes in changeset.into_changes() {
            if let Ok(entry) = self.entry_mut(changes.variable) {
                entry.core.changes = Some(changes);
            }
        }
    }

    fn commit_stores(&mut self) {
        for entry in self.entries_mut() {
            if let VariableKind::Stored(store) = &mut entry.kind {
                store.on_commit();
            }
        }
    }

    fn finalize(&mut self) -> ChangedEvents {
        let dataset = self.id;
        let mut changed = vec![];
        for entry in self.entries_mut() {
            if let Some(changes) = entry.core.changes.take() {
                entry.core.finalize(&changes);
                changed.push((
                    entry.handlers.changed(),
                    ChangedEvent {
                        dataset,
                        variable: entry.core.id,
                        changes,
                    },
                ));
            }
        }
        let new_systems = self.coordinate_systems.iter().any(|system| !system.committed);
        for system in &mut self.coordinate_systems {
            system.committed = true;
        }
        if !changed.is_empty() || new_systems {
            self.version += 1;
        }
        self.epoch += 1;
        debug!(dataset = %self.id, version = self.version, variables = changed.len(), "committed");

        changed
    }

    /// Discard every pending change, including variables and coordinate systems that were
    /// never committed.
    ///
    pub fn rollback(&mut self) -> RolledBackEvents {
        let dataset = self.id;
        let mut rolled_back = vec![];
        for entry in self.entries_mut() {
            if let VariableKind::Stored(store) = &mut entry.kind {
                store.on_rollback();
            }
            let pending = entry.core.has_changes()
                || entry.core.metadata.has_changes()
                || !entry.core.proposed_coordinate_systems.is_empty();
            if pending {
                entry.core.rollback();
                rolled_back.push((
                    entry.handlers.rolled_back(),
                    RolledBackEvent {
                        dataset,
                        variable: entry.core.id,
                    },
                ));
            }
        }

        let discarded: Vec<VariableId> = self
            .entries()
            .filter(|entry| !entry.core.is_committed())
            .map(|entry| entry.core.id)
            .collect();
        for id in discarded {
            self.variables[id.index()] = None;
            self.graph.remove(id);
        }
        self.coordinate_systems.retain(|system| system.committed);
        self.epoch += 1;
        debug!(dataset = %self.id, variables = rolled_back.len(), "rolled back");

        rolled_back
    }
}

impl DataSet {
    /// Make every pending change current, along with the pending changes of the DataSets this
    /// one's reference variables follow.
    ///
    /// On failure nothing is committed and every participating DataSet is rolled back.
    ///
    pub fn commit(&self) -> Result<()> {
        let _op = self.operation();
        let mut context = CommitContext::default();
        if let Err(err) = self.prepare(&mut context) {
            warn!(dataset = %self.id, error = %err, "commit failed, rolling back");
            Self::abort(&context);
            return Err(err);
        }

        let mut changed = vec![];
        for participant in &context.prepared {
            changed.extend(participant.with_mut(|inner| {
                inner.commit_stores();
                Ok(inner.finalize())
            })?);
        }
        events::raise_changed(changed);

        Ok(())
    }

    /// First phase of a commit.
    pub(crate) fn prepare(&self, context: &mut CommitContext) -> Result<()> {
        let _op = self.operation();
        context.visited.insert(self.id);
        context.touched.push(self.clone());

        let (mut changeset, order) =
            self.with(|inner| Ok((inner.changeset(), inner.graph.topological_order())))?;
        for id in order {
            let remote = self.with_mut(|inner| inner.precommit(id, &mut changeset))?;
            if let Some(remote) = remote {
                self.follow(id, &remote, &mut changeset, context)?;
            }
        }
        self.with_mut(|inner| {
            inner.absorb(changeset);
            Ok(())
        })?;
        self.validate()?;
        context.prepared.push(self.clone());

        Ok(())
    }

    /// Check the proposed state: dimensions agree and every coordinate axis is reversible.
    fn validate(&self) -> Result<()> {
        let (mut violations, axes) = self.with(|inner| Ok(inner.structural_violations()))?;
        for (system, axis) in axes {
            let values = self.read(axis, &Region::all(), true)?;
            if !values.is_reversible()? {
                violations.push(format!(
                    "axis {axis} of coordinate system {system} is not strictly monotonic or has duplicates"
                ));
            }
        }
        if violations.is_empty() {
            return Ok(());
        }

        warn!(dataset = %self.id, ?violations, "constraints failed");
        Err(Error::ConstraintsFailed {
            dataset: self.id,
            violations,
        })
    }

    /// Roll back everything a failed commit touched.
    fn abort(context: &CommitContext) {
        let mut rolled_back = vec![];
        for participant in &context.touched {
            match participant.with_mut(|inner| Ok(inner.rollback())) {
                Ok(events) => rolled_back.extend(events),
                Err(err) => warn!(dataset = %participant.id, error = %err, "rollback failed"),
            }
        }
        events::raise_rolled_back(rolled_back);
    }

    /// Discard every pending change, and those of followed DataSets with changes of their own.
    pub fn rollback(&self) -> Result<()> {
        let mut visited = HashSet::new();

        self.rollback_with(&mut visited)
    }

    fn rollback_with(&self, visited: &mut HashSet<DataSetId>) -> Result<()> {
        let _op = self.operation();
        visited.insert(self.id);
        let (rolled_back, followed) =
            self.with_mut(|inner| Ok((inner.rollback(), inner.referenced_datasets())))?;
        events::raise_rolled_back(rolled_back);

        for dataset in followed {
            if !visited.contains(&dataset.id) && dataset.has_changes()? {
                dataset.rollback_with(visited)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use ndarray::{array, Array1};
    use proptest::prelude::*;

    use crate::{
        data::{DataArray, DataType, Scalar},
        memory::{MemoryProvider, MemoryStore},
        options::DataSetOptions,
        provider::{Provider, VariableStore},
        schema::SchemaVersion,
        transform::ScaleTransform,
    };

    /// A store that can't flush its proposed data.
    struct FullStore(MemoryStore);

    impl VariableStore for FullStore {
        fn data_type(&self) -> DataType {
            self.0.data_type()
        }

        fn read_shape(&self, proposed: bool) -> Vec<usize> {
            self.0.read_shape(proposed)
        }

        fn read(
            &self,
            origin: &[usize],
            stride: &[usize],
            shape: &[usize],
            proposed: bool,
        ) -> Result<DataArray> {
            self.0.read(origin, stride, shape, proposed)
        }

        fn write(
            &mut self,
            origin: &[usize],
            data: &DataArray,
            fill: Option<&Scalar>,
        ) -> Result<()> {
            self.0.write(origin, data, fill)
        }

        fn on_precommit(&mut self) -> Result<()> {
            Err(Error::Provider(String::from("disk full")))
        }

        fn on_commit(&mut self) {
            self.0.on_commit();
        }

        fn on_rollback(&mut self) {
            self.0.on_rollback();
        }
    }

    /// Memory storage, except for variables named `full`.
    struct FullProvider(MemoryProvider);

    impl Provider for FullProvider {
        fn name(&self) -> &str {
            "full"
        }

        fn create_variable(
            &mut self,
            name: &str,
            data_type: DataType,
            dimensions: &[String],
        ) -> Result<Box<dyn VariableStore>> {
            if name == "full" {
                let store = MemoryStore::new(data_type, dimensions.len(), None);
                return Ok(Box::new(FullStore(store)));
            }

            self.0.create_variable(name, data_type, dimensions)
        }
    }

    #[test]
    fn test_commit_and_rollback() -> Result<()> {
        let dataset = DataSet::new();
        dataset.set_autocommit(false)?;
        let id = dataset.add_variable::<i32>("v", &["x"])?;
        dataset.put_data(id, &[0], array![1, 2, 3])?;
        dataset.commit()?;
        assert_eq!(dataset.version()?, 1);

        dataset.append(id, array![4, 5], 0)?;
        assert_eq!(dataset.shape(id, SchemaVersion::Recent)?, vec![5]);
        assert_eq!(dataset.shape(id, SchemaVersion::Committed)?, vec![3]);
        dataset.rollback()?;
        assert_eq!(dataset.shape(id, SchemaVersion::Recent)?, vec![3]);
        assert_eq!(dataset.get_data::<i32>(id)?, array![1, 2, 3].into_dyn());

        dataset.append(id, array![4, 5], 0)?;
        dataset.commit()?;
        assert_eq!(dataset.version()?, 2);
        assert_eq!(dataset.variable_version(id)?, 2);
        assert_eq!(dataset.get_data::<i32>(id)?, array![1, 2, 3, 4, 5].into_dyn());

        Ok(())
    }

    #[test]
    fn test_rollback_discards_new_variables() -> Result<()> {
        let dataset = DataSet::new();
        dataset.set_autocommit(false)?;
        let kept = dataset.add_variable::<f64>("kept", &["x"])?;
        dataset.commit()?;
        let dropped = dataset.add_variable::<f64>("dropped", &["x"])?;
        let derived = dataset.add_transform("derived", dropped, ScaleTransform::new(2.0, 0.0))?;
        dataset.rollback()?;

        assert_eq!(dataset.variables()?, vec![kept]);
        assert!(matches!(dataset.name(dropped), Err(Error::VariableNotFound(_))));
        assert!(matches!(dataset.name(derived), Err(Error::VariableNotFound(_))));

        // Slots are never reused
        let again = dataset.add_variable::<f64>("dropped", &["x"])?;
        assert_eq!(again, VariableId::Source(3));

        Ok(())
    }

    #[test]
    fn test_dimension_conflict_fails_commit() -> Result<()> {
        let dataset = DataSet::new();
        dataset.set_autocommit(false)?;
        let a = dataset.add_variable::<i32>("a", &["x"])?;
        let b = dataset.add_variable::<i32>("b", &["x"])?;
        dataset.put_data(a, &[0], array![1, 2, 3])?;
        dataset.put_data(b, &[0], array![1, 2])?;

        match dataset.commit() {
            Err(Error::ConstraintsFailed { dataset: id, violations }) => {
                assert_eq!(id, dataset.id());
                assert_eq!(violations.len(), 1);
            }
            other => panic!("expected constraint failure, got {other:?}"),
        }
        assert!(!dataset.has_changes()?);
        assert!(dataset.variables()?.is_empty());

        Ok(())
    }

    #[test]
    fn test_events() -> Result<()> {
        let dataset = DataSet::new();
        dataset.set_autocommit(false)?;
        let id = dataset.add_variable::<i32>("v", &["x"])?;
        dataset.commit()?;

        let changed = Arc::new(AtomicUsize::new(0));
        let rolled_back = Arc::new(AtomicUsize::new(0));
        let counter = changed.clone();
        dataset.on_changed(id, move |event| {
            assert_eq!(event.changes.shape, vec![2]);
            counter.fetch_add(1, Ordering::SeqCst);
        })?;
        let counter = rolled_back.clone();
        let subscription = dataset.on_rolled_back(id, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })?;

        dataset.put_data(id, &[0], array![1, 2])?;
        dataset.commit()?;
        dataset.put_data(id, &[2], array![3])?;
        dataset.rollback()?;
        assert_eq!(changed.load(Ordering::SeqCst), 1);
        assert_eq!(rolled_back.load(Ordering::SeqCst), 1);

        assert!(dataset.unsubscribe(subscription)?);
        assert!(!dataset.unsubscribe(subscription)?);
        dataset.put_data(id, &[2], array![3])?;
        dataset.rollback()?;
        assert_eq!(rolled_back.load(Ordering::SeqCst), 1);

        Ok(())
    }

    #[test]
    fn test_handler_may_commit() -> Result<()> {
        let dataset = DataSet::new();
        dataset.set_autocommit(false)?;
        let id = dataset.add_variable::<i32>("v", &["x"])?;
        let writer = dataset.clone();
        dataset.on_changed(id, move |event| {
            if event.changes.shape == vec![1] {
                writer.put_data(id, &[1], array![2]).unwrap();
                writer.commit().unwrap();
            }
        })?;
        dataset.put_data(id, &[0], array![1])?;
        dataset.commit()?;
        assert_eq!(dataset.get_data::<i32>(id)?, array![1, 2].into_dyn());

        Ok(())
    }

    #[test]
    fn test_failing_store_commits_nothing() -> Result<()> {
        let provider = Box::new(FullProvider(MemoryProvider::new()));
        let dataset = DataSet::with_provider(provider, DataSetOptions::default());
        dataset.set_autocommit(false)?;
        let a = dataset.add_variable::<i32>("a", &["x"])?;
        dataset.put_data(a, &[0], array![1, 2])?;
        dataset.commit()?;
        let full = dataset.add_variable::<i32>("full", &["y"])?;
        dataset.put_data(a, &[0], array![9, 9])?;
        dataset.put_data(full, &[0], array![5])?;

        assert!(matches!(dataset.commit(), Err(Error::Provider(_))));
        assert!(!dataset.has_changes()?);
        assert_eq!(dataset.get_data::<i32>(a)?, array![1, 2].into_dyn());
        assert_eq!(dataset.read_data(a, &Region::all(), SchemaVersion::Recent)?.shape(), vec![2]);
        assert_eq!(dataset.variable_version(a)?, 1);
        assert_eq!(dataset.version()?, 1);
        assert_eq!(dataset.variables()?, vec![a]);

        Ok(())
    }

    #[test]
    fn test_empty_commit_keeps_version() -> Result<()> {
        let dataset = DataSet::new();
        dataset.add_variable::<i32>("v", &["x"])?;
        assert_eq!(dataset.version()?, 1);
        dataset.commit()?;
        dataset.rollback()?;
        assert_eq!(dataset.version()?, 1);

        Ok(())
    }

    proptest! {
        #[test]
        fn test_rollback_restores_committed_state(
            committed in proptest::collection::vec(-100_i32..100, 0..10),
            writes in proptest::collection::vec((0_usize..12, 1_usize..4), 1..6),
        ) {
            let dataset = DataSet::new();
            dataset.set_autocommit(false).unwrap();
            let id = dataset.add_variable::<i32>("v", &["x"]).unwrap();
            dataset.put_data(id, &[0], Array1::from(committed.clone())).unwrap();
            dataset.commit().unwrap();

            let mut last = dataset.shape(id, SchemaVersion::Recent).unwrap();
            for (origin, len) in writes {
                dataset.put_data(id, &[origin], Array1::from_elem(len, 7)).unwrap();
                let shape = dataset.shape(id, SchemaVersion::Recent).unwrap();
                prop_assert!(shape[0] >= last[0]);
                prop_assert!(shape[0] >= origin + len);
                last = shape;
            }
            dataset.rollback().unwrap();

            prop_assert_eq!(
                dataset.shape(id, SchemaVersion::Recent).unwrap(),
                vec![committed.len()]
            );
            prop_assert_eq!(
                dataset.get_data::<i32>(id).unwrap(),
                Array1::from(committed).into_dyn()
            );
        }
    }
}
