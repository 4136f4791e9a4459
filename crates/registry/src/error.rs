//! Registry error types.

use ddsched_core::{TaskId, UnitId};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("precondition violated: {0}")]
    PreconditionViolated(String),

    #[error("{unit} not found in {list} list")]
    NotFound { unit: UnitId, list: &'static str },

    #[error("cannot schedule task {task}: all {capacity} priority levels in use")]
    CapacityExceeded { task: TaskId, capacity: usize },

    #[error("out of memory: {0}")]
    OutOfMemory(String),
}
