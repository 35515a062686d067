use tracing::debug;

use crate::{
    dataset::{DataSet, DataSetInner},
    dimension::{self, Dimension},
    errors::{Error, Result},
    schema::{CoordinateSystemSchema, SchemaVersion},
    variable::VariableId,
};

/// A named, ordered list of axis variables. Immutable once committed.
///
/// Every axis must be reversible, so that coordinate values can be mapped back to indices. This
/// is checked at commit, along with the system having at least one axis.
///
#[derive(Clone, Debug)]
pub(crate) struct CoordinateSystem {
    pub name: String,
    pub axes: Vec<VariableId>,
    pub committed: bool,
}

impl CoordinateSystem {
    pub fn schema(&self) -> CoordinateSystemSchema {
        CoordinateSystemSchema {
            name: self.name.clone(),
            axes: self.axes.clone(),
            committed: self.committed,
        }
    }
}

impl DataSetInner {
    pub fn coordinate_system(&self, name: &str) -> Option<&CoordinateSystem> {
        self.coordinate_systems
            .iter()
            .find(|system| system.name == name)
    }

    fn coordinate_system_mut(&mut self, name: &str) -> Result<&mut CoordinateSystem> {
        self.coordinate_systems
            .iter_mut()
            .find(|system| system.name == name)
            .ok_or_else(|| Error::InvalidArgument(format!("no coordinate system named {name}")))
    }

    fn check_axis(&self, axis: VariableId) -> Result<()> {
        let rank = self.entry(axis)?.core.rank();
        if rank != 1 {
            return Err(Error::RankMismatch {
                expected: 1,
                got: rank,
            });
        }

        Ok(())
    }

    /// Violations that can be found without reading data, plus the axes whose data still has
    /// to be checked for reversibility.
    ///
    pub fn structural_violations(&self) -> (Vec<String>, Vec<(String, VariableId)>) {
        let dimensions: Vec<Dimension> = self
            .entries()
            .flat_map(|entry| {
                dimension::zip_shape(&entry.core.dimensions, &entry.core.proposed_shape())
            })
            .collect();
        let mut violations: Vec<String> = dimension::aggregate(&dimensions)
            .into_iter()
            .filter(|dimension| !dimension.is_resolved())
            .map(|dimension| {
                let lengths: Vec<String> = dimensions
                    .iter()
                    .filter(|other| other.name == dimension.name)
                    .filter_map(|other| other.length)
                    .map(|length| length.to_string())
                    .collect();
                format!(
                    "variables disagree on the length of dimension {}: {}",
                    dimension.name,
                    lengths.join(", ")
                )
            })
            .collect();

        let mut axes = vec![];
        for system in &self.coordinate_systems {
            if system.axes.is_empty() {
                violations.push(format!("coordinate system {} has no axes", system.name));
            }
            for axis in &system.axes {
                match self.entry(*axis) {
                    Ok(_) => axes.push((system.name.clone(), *axis)),
                    Err(_) => violations.push(format!(
                        "axis {axis} of coordinate system {} no longer exists",
                        system.name
                    )),
                }
            }
        }

        (violations, axes)
    }
}

impl DataSet {
    /// Add a coordinate system over rank 1 `axes`. It can take more axes until it is committed.
    pub fn add_coordinate_system(&self, name: &str, axes: &[VariableId]) -> Result<()> {
        let _op = self.operation();
        self.with_mut(|inner| {
            inner.check_writable()?;
            if name.is_empty() {
                return Err(Error::InvalidArgument(String::from(
                    "coordinate system names must not be empty",
                )));
            }
            if inner.coordinate_system(name).is_some() {
                return Err(Error::InvalidArgument(format!(
                    "a coordinate system named {name} already exists"
                )));
            }
            for (index, axis) in axes.iter().enumerate() {
                inner.check_axis(*axis)?;
                if axes[..index].contains(axis) {
                    return Err(Error::InvalidArgument(format!(
                        "axis {axis} appears more than once in coordinate system {name}"
                    )));
                }
            }
            inner.coordinate_systems.push(CoordinateSystem {
                name: name.to_string(),
                axes: axes.to_vec(),
                committed: false,
            });

            Ok(())
        })?;
        debug!(dataset = %self.id, name, axes = axes.len(), "added coordinate system");

        self.autocommit()
    }

    pub fn add_coordinate_axis(&self, name: &str, axis: VariableId) -> Result<()> {
        let _op = self.operation();
        self.with_mut(|inner| {
            inner.check_writable()?;
            inner.check_axis(axis)?;
            let system = inner.coordinate_system_mut(name)?;
            if system.committed {
                return Err(Error::ReadOnly(format!(
                    "coordinate system {name} is committed"
                )));
            }
            if system.axes.contains(&axis) {
                return Err(Error::InvalidArgument(format!(
                    "axis {axis} is already part of coordinate system {name}"
                )));
            }
            system.axes.push(axis);

            Ok(())
        })?;

        self.autocommit()
    }

    /// Record that `variable` is laid out over coordinate system `name`.
    pub fn attach_coordinate_system(&self, variable: VariableId, name: &str) -> Result<()> {
        let _op = self.operation();
        self.with_mut(|inner| {
            inner.check_writable()?;
            if inner.coordinate_system(name).is_none() {
                return Err(Error::InvalidArgument(format!(
                    "no coordinate system named {name}"
                )));
            }
            let core = &mut inner.entry_mut(variable)?.core;
            let attached = core
                .coordinate_systems
                .iter()
                .chain(&core.proposed_coordinate_systems)
                .any(|attached| attached == name);
            if !attached {
                core.proposed_coordinate_systems.push(name.to_string());
                core.changes_mut();
            }

            Ok(())
        })?;

        self.autocommit()
    }

    pub fn coordinate_systems(
        &self,
        version: SchemaVersion,
    ) -> Result<Vec<CoordinateSystemSchema>> {
        self.with(|inner| Ok(inner.schema(version).coordinate_systems))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ndarray::{array, Array2};

    #[test]
    fn test_add_and_commit() -> Result<()> {
        let dataset = DataSet::new();
        let x = dataset.add_variable::<f64>("x", &["x"])?;
        let y = dataset.add_variable::<f64>("y", &["y"])?;
        let v = dataset.add_variable::<f64>("v", &["y", "x"])?;
        dataset.set_autocommit(false)?;
        dataset.put_data(x, &[0], array![0.0, 1.0, 2.0])?;
        dataset.put_data(y, &[0], array![10.0, 5.0])?;
        dataset.put_data(v, &[0, 0], Array2::<f64>::zeros((2, 3)))?;
        dataset.add_coordinate_system("grid", &[y])?;
        dataset.add_coordinate_axis("grid", x)?;
        dataset.attach_coordinate_system(v, "grid")?;
        assert!(dataset.coordinate_systems(SchemaVersion::Committed)?.is_empty());
        dataset.commit()?;

        let systems = dataset.coordinate_systems(SchemaVersion::Committed)?;
        assert_eq!(systems.len(), 1);
        assert_eq!(systems[0].axes, vec![y, x]);
        assert!(systems[0].committed);
        assert_eq!(
            dataset.variable_schema(v, SchemaVersion::Committed)?.coordinate_systems,
            vec![String::from("grid")]
        );
        assert!(matches!(
            dataset.add_coordinate_axis("grid", v),
            Err(Error::RankMismatch { .. })
        ));
        let z = dataset.add_variable::<f64>("z", &["z"])?;
        assert!(matches!(
            dataset.add_coordinate_axis("grid", z),
            Err(Error::ReadOnly(_))
        ));

        Ok(())
    }

    #[test]
    fn test_bad_definitions() -> Result<()> {
        let dataset = DataSet::new();
        let x = dataset.add_variable::<f64>("x", &["x"])?;
        assert!(dataset.add_coordinate_system("", &[x]).is_err());
        assert!(dataset.add_coordinate_system("twice", &[x, x]).is_err());
        assert!(dataset.add_coordinate_axis("missing", x).is_err());
        assert!(dataset.attach_coordinate_system(x, "missing").is_err());
        assert!(matches!(
            dataset.add_coordinate_system("empty", &[]),
            Err(Error::ConstraintsFailed { .. })
        ));
        assert!(dataset.coordinate_systems(SchemaVersion::Recent)?.is_empty());

        Ok(())
    }

    #[test]
    fn test_axes_must_be_reversible() -> Result<()> {
        let dataset = DataSet::new();
        let x = dataset.add_variable::<i32>("x", &["x"])?;
        dataset.put_data(x, &[0], array![3, 2, 1])?;
        dataset.add_coordinate_system("line", &[x])?;

        match dataset.put_data(x, &[3], array![2]) {
            Err(Error::ConstraintsFailed { violations, .. }) => {
                assert_eq!(violations.len(), 1);
                assert!(violations[0].contains("line"));
            }
            other => panic!("expected constraint failure, got {other:?}"),
        }
        assert_eq!(dataset.get_data::<i32>(x)?, array![3, 2, 1].into_dyn());
        dataset.put_data(x, &[3], array![0])?;

        let labels = dataset.add_variable::<String>("label", &["label"])?;
        dataset.put_data(labels, &[0], array![String::from("a"), String::from("a")])?;
        assert!(matches!(
            dataset.add_coordinate_system("labels", &[labels]),
            Err(Error::ConstraintsFailed { .. })
        ));

        Ok(())
    }
}
