//! Requester-side handles to the coordinator.

use std::sync::Arc;

use ddsched_core::{Executor, Priority, TaskId, Tick, UnitId};
use ddsched_registry::{ListKind, TaskRecord};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::command::{Command, CreateOutcome, DeleteOutcome};
use crate::error::SchedulerError;
use crate::mailbox::ReportReceiver;

/// A task the coordinator accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub task: TaskId,
    pub unit: UnitId,
    pub priority: Priority,
    /// Position in the active list when it was admitted, 0 = head.
    pub position: usize,
}

/// Summary of a task removed by its own delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub task: TaskId,
    pub deadline: Tick,
    pub completed_at: Tick,
    pub met_deadline: bool,
}

/// Cloneable handle for submitting create and delete commands.
///
/// Both calls block the caller until the coordinator has acknowledged.
#[derive(Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    executor: Arc<dyn Executor>,
    parked: Priority,
    requester: Arc<str>,
}

impl SchedulerHandle {
    /// `parked` is the priority new units hold until they are placed.
    pub fn new(commands: mpsc::Sender<Command>, executor: Arc<dyn Executor>, parked: Priority) -> Self {
        Self {
            commands,
            executor,
            parked,
            requester: Arc::from("anonymous"),
        }
    }

    /// Same handle, tagged with a requester name for logs.
    pub fn with_requester(&self, name: impl AsRef<str>) -> Self {
        Self {
            requester: Arc::from(name.as_ref()),
            ..self.clone()
        }
    }

    pub fn requester(&self) -> &str {
        &self.requester
    }

    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Schedule a task.
    ///
    /// A unit is created at the parked priority unless the record already
    /// names one. The unit stays suspended until the coordinator has
    /// assigned its priority; a rejected task has its unit terminated.
    pub async fn submit_create(&self, mut task: TaskRecord) -> Result<Scheduled, SchedulerError> {
        let unit = match task.unit {
            Some(unit) => unit,
            None => {
                let unit = self.executor.spawn_unit(&task.name, self.parked)?;
                task.unit = Some(unit);
                unit
            }
        };
        self.executor.suspend(unit);

        let id = task.id;
        let (reply, ack) = oneshot::channel();
        let command = Command::Create {
            correlation_id: Uuid::new_v4(),
            requester: self.requester.to_string(),
            task,
            reply,
        };
        if self.commands.send(command).await.is_err() {
            self.executor.terminate(unit);
            return Err(SchedulerError::ChannelUnavailable("command"));
        }

        match ack.await {
            Ok(CreateOutcome::Scheduled {
                priority, position, ..
            }) => {
                self.executor.resume(unit);
                debug!(requester = %self.requester, task_id = %id, %unit, %priority, position, "task released");
                Ok(Scheduled {
                    task: id,
                    unit,
                    priority,
                    position,
                })
            }
            Ok(CreateOutcome::Rejected { reason, .. }) => {
                self.executor.terminate(unit);
                Err(SchedulerError::Rejected { task: id, reason })
            }
            Err(_) => {
                self.executor.terminate(unit);
                Err(SchedulerError::ChannelUnavailable("acknowledgment"))
            }
        }
    }

    /// Remove a finished task and terminate its unit.
    ///
    /// Returns `None` when the coordinator no longer had the task, e.g.
    /// because a sweep had already moved it to the overdue list.
    pub async fn submit_delete(&self, unit: UnitId) -> Result<Option<Completion>, SchedulerError> {
        let (reply, ack) = oneshot::channel();
        let command = Command::Delete {
            correlation_id: Uuid::new_v4(),
            requester: self.requester.to_string(),
            unit,
            reply,
        };
        self.commands
            .send(command)
            .await
            .map_err(|_| SchedulerError::ChannelUnavailable("command"))?;
        let outcome = ack
            .await
            .map_err(|_| SchedulerError::ChannelUnavailable("acknowledgment"))?;

        let completion = match outcome {
            DeleteOutcome::Released(task) => {
                let completed_at = task.completion_time.unwrap_or_else(|| self.executor.now());
                let completion = Completion {
                    task: task.id,
                    deadline: task.absolute_deadline,
                    completed_at,
                    met_deadline: completed_at <= task.absolute_deadline,
                };
                if let Err((e, task)) = task.destroy() {
                    warn!(task_id = %task.id, error = %e, "released task record could not be destroyed");
                }
                Some(completion)
            }
            DeleteOutcome::NotScheduled { reason } => {
                debug!(requester = %self.requester, %unit, %reason, "delete had nothing to remove");
                None
            }
        };

        self.executor.terminate(unit);
        Ok(completion)
    }
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("requester", &self.requester)
            .field("parked", &self.parked)
            .finish()
    }
}

/// The single reader of list snapshots.
pub struct SnapshotReader {
    commands: mpsc::Sender<Command>,
    reports: ReportReceiver,
}

impl SnapshotReader {
    pub fn new(commands: mpsc::Sender<Command>, reports: ReportReceiver) -> Self {
        Self { commands, reports }
    }

    /// Ask for a rendering of one list and wait for it.
    ///
    /// Reports answering earlier queries are skipped. The text comes back
    /// with trailing whitespace trimmed.
    pub async fn request_snapshot(&mut self, list: ListKind) -> Result<String, SchedulerError> {
        if let Some(stale) = self.reports.try_recv() {
            debug!(list = %stale.list, "discarding unread report");
        }

        let correlation_id = Uuid::new_v4();
        self.commands
            .send(Command::Query {
                correlation_id,
                list,
            })
            .await
            .map_err(|_| SchedulerError::ChannelUnavailable("command"))?;

        loop {
            let report = self
                .reports
                .recv()
                .await
                .ok_or(SchedulerError::ChannelUnavailable("report"))?;
            if report.correlation_id == correlation_id {
                return Ok(report.text.trim_end().to_string());
            }
            debug!(list = %report.list, "skipping report for an earlier query");
        }
    }
}
