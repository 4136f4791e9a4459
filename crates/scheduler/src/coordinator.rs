//! The coordinator actor: sole owner of the task registry.
//!
//! Requesters reach it only through its command channel. Every command is
//! handled in four steps (wait, sweep, apply, reply), so overdue work is
//! relocated before each mutation and the requester is released only after
//! the mutation, priority assignment included, has been applied.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use ddsched_core::{ControlUnit, Executor, Priority, SchedulerConfig, Tick, UnitId};
use ddsched_registry::{ListKind, Registry, TaskRecord};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, instrument, trace, warn};

use crate::command::{Command, CreateOutcome, DeleteOutcome};
use crate::error::SchedulerError;
use crate::mailbox::{Report, ReportSender};

/// Where the coordinator is in its command cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    WaitingForCommand,
    Sweeping,
    Applying,
    Replying,
}

impl fmt::Display for CoordinatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordinatorState::WaitingForCommand => "waiting",
            CoordinatorState::Sweeping => "sweeping",
            CoordinatorState::Applying => "applying",
            CoordinatorState::Replying => "replying",
        };
        f.write_str(name)
    }
}

/// Name of the coordinator's own executor unit.
pub const COORDINATOR_UNIT: &str = "Scheduler Coordinator";

pub struct Coordinator {
    registry: Registry,
    executor: Arc<dyn Executor>,
    priority: Priority,
    commands: mpsc::Receiver<Command>,
    reports: Option<ReportSender>,
    shutdown: watch::Receiver<bool>,
    state: CoordinatorState,
}

impl Coordinator {
    /// Build a coordinator around an existing command channel.
    ///
    /// Without a report mailbox the first query halts the coordinator.
    pub fn new(
        config: &SchedulerConfig,
        executor: Arc<dyn Executor>,
        commands: mpsc::Receiver<Command>,
        reports: Option<ReportSender>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let registry = Registry::new(config.band(), executor.clone(), config.scheduler.retention);
        Self {
            registry,
            executor,
            priority: config.priorities.coordinator,
            commands,
            reports,
            shutdown,
            state: CoordinatorState::WaitingForCommand,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Process commands until shutdown is requested, every requester has
    /// gone away, or a fatal channel error occurs.
    pub async fn run(mut self) -> Result<(), SchedulerError> {
        let _control = ControlUnit::spawn(self.executor.clone(), COORDINATOR_UNIT, self.priority)
            .map_err(|e| warn!(error = %e, "coordinator runs without its own unit"))
            .ok();
        info!(
            priority = %self.priority,
            capacity = self.registry.list(ListKind::Active).capacity().unwrap_or_default(),
            retention = self.registry.retention(),
            reports = self.reports.is_some(),
            "coordinator started"
        );

        loop {
            self.enter(CoordinatorState::WaitingForCommand);
            let command = tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("coordinator shutdown requested");
                        break;
                    }
                    continue;
                }
                command = self.commands.recv() => command,
            };

            let Some(command) = command else {
                info!("all requesters gone, coordinator stopping");
                break;
            };
            self.handle(command)?;
        }

        info!(
            active = self.registry.list(ListKind::Active).len(),
            overdue = self.registry.list(ListKind::Overdue).len(),
            "coordinator stopped"
        );
        Ok(())
    }

    /// Run one full sweep/apply/reply cycle for a command.
    ///
    /// Only a missing report mailbox is returned as an error; everything
    /// else is logged and acknowledged.
    #[instrument(skip_all, fields(command = command.kind(), correlation_id = %command.correlation_id()))]
    pub fn handle(&mut self, command: Command) -> Result<(), SchedulerError> {
        self.enter(CoordinatorState::Sweeping);
        let now = self.executor.now();
        self.registry.sweep(now);

        self.enter(CoordinatorState::Applying);
        match command {
            Command::Create {
                requester,
                task,
                reply,
                ..
            } => {
                let outcome = self.apply_create(task, now);
                self.enter(CoordinatorState::Replying);
                if reply.send(outcome).is_err() {
                    warn!(%requester, "requester left before create was acknowledged");
                }
            }
            Command::Delete {
                requester,
                unit,
                reply,
                ..
            } => {
                let outcome = self.apply_delete(unit, now);
                self.enter(CoordinatorState::Replying);
                if reply.send(outcome).is_err() {
                    warn!(%requester, %unit, "requester left before delete was acknowledged");
                }
            }
            Command::Query {
                correlation_id,
                list,
            } => {
                if self.reports.is_none() {
                    error!(%list, "query received but no report mailbox is attached");
                    return Err(SchedulerError::ChannelUnavailable("report"));
                }
                let text = match self.registry.render(list) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(%list, error = %e, "snapshot could not be rendered");
                        return Ok(());
                    }
                };

                self.enter(CoordinatorState::Replying);
                let report = Report {
                    correlation_id,
                    list,
                    text,
                    at: now,
                    taken_at: Utc::now(),
                };
                if let Some(reports) = &self.reports {
                    if let Err(e) = reports.post(report) {
                        warn!(%list, error = %e, "report not delivered");
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_create(&mut self, task: TaskRecord, now: Tick) -> CreateOutcome {
        let id = task.id;
        match self.registry.admit(task, now) {
            Ok(admission) => CreateOutcome::Scheduled {
                task: id,
                priority: admission.priority,
                position: admission.position,
            },
            Err(e) => {
                warn!(task_id = %id, error = %e, "task not scheduled");
                CreateOutcome::Rejected {
                    task: id,
                    reason: e.to_string(),
                }
            }
        }
    }

    fn apply_delete(&mut self, unit: UnitId, now: Tick) -> DeleteOutcome {
        match self.registry.release(unit, now) {
            Ok(task) => DeleteOutcome::Released(task),
            Err(e) => {
                warn!(%unit, error = %e, "delete ignored");
                DeleteOutcome::NotScheduled {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn enter(&mut self, next: CoordinatorState) {
        if self.state != next {
            trace!(from = %self.state, to = %next, "coordinator state");
            self.state = next;
        }
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("registry", &self.registry)
            .field("state", &self.state)
            .field("reports", &self.reports.is_some())
            .finish()
    }
}
