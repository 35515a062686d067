use std::result;

use thiserror::Error;

use crate::{data::DataType, dataset::DataSetId, variable::VariableId};

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("rank mismatch: expected {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("type mismatch: expected {expected:?}, got {got:?}")]
    TypeMismatch { expected: DataType, got: DataType },

    #[error("read only: {0}")]
    ReadOnly(String),

    #[error("value not found: {0}")]
    ValueNotFound(String),

    #[error("variable not found: {0}")]
    VariableNotFound(String),

    #[error("constraints failed in dataset {dataset}: {}", .violations.join("; "))]
    ConstraintsFailed {
        dataset: DataSetId,
        violations: Vec<String>,
    },

    #[error("distributed commit failed in dataset {dataset}: {source}")]
    DistributedCommitFailed {
        dataset: DataSetId,
        #[source]
        source: Box<Error>,
    },

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("dataset {0} is busy with another operation on this thread")]
    Busy(DataSetId),

    #[error("dataset {0} has been disposed")]
    Disposed(DataSetId),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("bad dataset uri: {0}")]
    Uri(String),

    #[error("could not schedule request: {0}")]
    Spawn(#[from] futures::task::SpawnError),
}

impl Error {
    pub(crate) fn not_found(id: VariableId) -> Self {
        Self::VariableNotFound(format!("{id}"))
    }

    /// Wrap an error raised while committing a followed DataSet.
    ///
    /// The innermost failing participant is kept, so an error that already names a failed
    /// participant is passed through unchanged.
    ///
    pub(crate) fn distributed(dataset: DataSetId, err: Error) -> Self {
        match err {
            Error::DistributedCommitFailed { .. } => err,
            err => Error::DistributedCommitFailed {
                dataset,
                source: Box::new(err),
            },
        }
    }
}

pub type Result<T> = result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distributed_keeps_innermost() {
        let inner = Error::ConstraintsFailed {
            dataset: DataSetId::from_raw(7),
            violations: vec![String::from("x")],
        };
        let err = Error::distributed(DataSetId::from_raw(7), inner);
        let err = Error::distributed(DataSetId::from_raw(3), err);
        match err {
            Error::DistributedCommitFailed { dataset, source } => {
                assert_eq!(dataset, DataSetId::from_raw(7));
                assert!(matches!(*source, Error::ConstraintsFailed { .. }));
            }
            _ => panic!("expected distributed commit failure"),
        }
    }

    #[test]
    fn test_display() {
        let err = Error::ConstraintsFailed {
            dataset: DataSetId::from_raw(1),
            violations: vec![String::from("a"), String::from("b")],
        };
        assert_eq!(err.to_string(), "constraints failed in dataset #1: a; b");
    }
}
