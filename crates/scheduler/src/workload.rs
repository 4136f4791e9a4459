//! Task generators and the body every generated task runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ddsched_core::{ControlUnit, GeneratorConfig, Priority, TaskId, UnitId, UnitState};
use ddsched_registry::TaskRecord;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::client::{Completion, SchedulerHandle};
use crate::error::SchedulerError;

/// Shared source of task ids, starting at 1.
#[derive(Debug, Clone, Default)]
pub struct TaskIds(Arc<AtomicU64>);

impl TaskIds {
    pub fn next(&self) -> TaskId {
        TaskId(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

/// Release counts of one generator.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorStats {
    pub released: u32,
    pub scheduled: u32,
    pub rejected: u32,
}

/// Periodic producer of deadline tasks.
pub struct Generator {
    config: GeneratorConfig,
    priority: Priority,
    handle: SchedulerHandle,
    ids: TaskIds,
    shutdown: watch::Receiver<bool>,
}

impl Generator {
    /// `priority` is the level of the generator's own executor unit.
    pub fn new(
        config: GeneratorConfig,
        priority: Priority,
        handle: SchedulerHandle,
        ids: TaskIds,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            priority,
            handle,
            ids,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<GeneratorStats> {
        tokio::spawn(self.run())
    }

    /// Release a task every period until `count` is reached, shutdown is
    /// requested, or the coordinator goes away. A zero period releases
    /// nothing.
    pub async fn run(mut self) -> GeneratorStats {
        let executor = self.handle.executor().clone();
        let mut stats = GeneratorStats::default();
        if self.config.period_ticks == 0 {
            warn!(generator = %self.config.name, "zero period, generator not started");
            return stats;
        }

        let _control = ControlUnit::spawn(executor.clone(), &self.config.name, self.priority)
            .map_err(|e| {
                warn!(generator = %self.config.name, error = %e, "generator runs without its own unit")
            })
            .ok();
        info!(
            priority = %self.priority,
            generator = %self.config.name,
            kind = %self.config.kind,
            period = self.config.period_ticks,
            deadline = self.config.relative_deadline(),
            work = self.config.execution_ticks,
            "generator started"
        );

        if self.config.offset_ticks > 0 {
            tokio::select! {
                _ = tokio::time::sleep(executor.ticks(self.config.offset_ticks)) => {}
                _ = self.shutdown.changed() => return stats,
            }
        }

        let mut interval = tokio::time::interval(executor.ticks(self.config.period_ticks));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.config.count.is_some_and(|limit| stats.released >= limit) {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown.changed() => break,
            }

            stats.released += 1;
            match self.release(stats.released).await {
                Ok(()) => stats.scheduled += 1,
                Err(SchedulerError::Rejected { task, reason }) => {
                    warn!(generator = %self.config.name, task_id = %task, %reason, "release rejected");
                    stats.rejected += 1;
                }
                Err(e) => {
                    warn!(generator = %self.config.name, error = %e, "generator stopping");
                    break;
                }
            }
        }

        info!(
            generator = %self.config.name,
            released = stats.released,
            scheduled = stats.scheduled,
            rejected = stats.rejected,
            "generator finished"
        );
        stats
    }

    async fn release(&self, n: u32) -> Result<(), SchedulerError> {
        let executor = self.handle.executor();
        let now = executor.now();
        let task = TaskRecord::new(
            self.ids.next(),
            format!("{} #{n}", self.config.name),
            self.config.kind,
            now,
            now.saturating_add(self.config.relative_deadline()),
        );

        let scheduled = self.handle.submit_create(task).await?;
        let work = executor.ticks(self.config.execution_ticks);
        tokio::spawn(run_task_body(self.handle.clone(), scheduled.unit, work));
        Ok(())
    }
}

/// How a task body ended.
#[derive(Debug)]
pub enum BodyOutcome {
    /// Work finished and the delete was acknowledged.
    Completed(Option<Completion>),
    /// The unit was terminated before the work finished.
    Terminated,
    Failed(SchedulerError),
}

/// Body of a generated task: wait until runnable, work, then delete
/// itself. Ends early if the unit is terminated.
pub async fn run_task_body(handle: SchedulerHandle, unit: UnitId, work: Duration) -> BodyOutcome {
    let Some(mut state) = handle.executor().watch(unit) else {
        return BodyOutcome::Terminated;
    };
    if !wait_for_state(&mut state, UnitState::Ready).await {
        return BodyOutcome::Terminated;
    }

    tokio::select! {
        _ = tokio::time::sleep(work) => {}
        _ = wait_for_state(&mut state, UnitState::Terminated) => {
            debug!(%unit, "task terminated while working");
            return BodyOutcome::Terminated;
        }
    }

    match handle.submit_delete(unit).await {
        Ok(completion) => BodyOutcome::Completed(completion),
        Err(e) => {
            warn!(%unit, error = %e, "task could not delete itself");
            BodyOutcome::Failed(e)
        }
    }
}

/// Wait until the unit reaches `target`. Returns `false` if it was
/// terminated first.
async fn wait_for_state(state: &mut watch::Receiver<UnitState>, target: UnitState) -> bool {
    loop {
        let current = *state.borrow_and_update();
        if current == target {
            return true;
        }
        if current == UnitState::Terminated {
            return false;
        }
        if state.changed().await.is_err() {
            return *state.borrow() == target;
        }
    }
}
