//! Messages accepted by the coordinator.
//!
//! Create and delete carry a private one-shot reply channel; the requester
//! blocks on it until the mutation has been applied. Queries are answered
//! through the shared report mailbox instead.

use ddsched_core::{Priority, TaskId, UnitId};
use ddsched_registry::{ListKind, TaskRecord};
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Debug)]
pub enum Command {
    Create {
        correlation_id: Uuid,
        requester: String,
        task: TaskRecord,
        reply: oneshot::Sender<CreateOutcome>,
    },
    Delete {
        correlation_id: Uuid,
        requester: String,
        unit: UnitId,
        reply: oneshot::Sender<DeleteOutcome>,
    },
    Query {
        correlation_id: Uuid,
        list: ListKind,
    },
}

impl Command {
    pub fn correlation_id(&self) -> Uuid {
        match self {
            Command::Create { correlation_id, .. }
            | Command::Delete { correlation_id, .. }
            | Command::Query { correlation_id, .. } => *correlation_id,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Create { .. } => "create",
            Command::Delete { .. } => "delete",
            Command::Query { .. } => "query",
        }
    }
}

/// Acknowledgment of a create command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Scheduled {
        task: TaskId,
        priority: Priority,
        position: usize,
    },
    Rejected {
        task: TaskId,
        reason: String,
    },
}

/// Acknowledgment of a delete command.
#[derive(Debug)]
pub enum DeleteOutcome {
    /// The record, unlinked and stamped with its completion time. The
    /// requester disposes of it.
    Released(TaskRecord),
    /// Nothing was removed; the reason has been logged.
    NotScheduled { reason: String },
}
