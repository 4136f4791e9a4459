use ddsched_core::{CoreError, TaskId};
use ddsched_registry::RegistryError;
use thiserror::Error;

/// Errors surfaced by the coordinator and its client handles.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A command or report channel is missing or has shut down.
    #[error("{0} channel unavailable")]
    ChannelUnavailable(&'static str),

    #[error("report delivery failed: {0}")]
    ReportDelivery(String),

    #[error("task {task} rejected: {reason}")]
    Rejected { task: TaskId, reason: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
