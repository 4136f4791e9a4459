//! Overdue sweep and bounded history.

use ddsched_core::{Executor, TaskId, TaskKind, Tick, UnitId};
use tracing::{info, warn};

use crate::list::TaskList;

/// What one sweep changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepOutcome {
    /// Tasks moved from active to overdue, earliest deadline first.
    pub relocated: Vec<TaskId>,
    /// Periodic units the sweep terminated.
    pub terminated: Vec<UnitId>,
    /// History records destroyed to respect the retention bound.
    pub evicted: Vec<TaskId>,
}

impl SweepOutcome {
    pub fn is_empty(&self) -> bool {
        self.relocated.is_empty() && self.evicted.is_empty()
    }
}

/// Move every active task whose deadline is before `now` to the tail of
/// `overdue`.
///
/// The active list is sorted, so the walk stops at the first task that is
/// still on time. Periodic units are suspended and terminated here; an
/// aperiodic unit keeps its expiry timer, which terminates it.
pub fn sweep_overdue(
    active: &mut TaskList,
    overdue: &mut TaskList,
    now: Tick,
    executor: &dyn Executor,
) -> SweepOutcome {
    let mut outcome = SweepOutcome::default();

    while active
        .front()
        .is_some_and(|head| head.absolute_deadline < now)
    {
        let Some(task) = active.pop_front() else {
            break;
        };
        let (id, kind, unit, deadline) = (task.id, task.kind, task.unit, task.absolute_deadline);

        if let Err(e) = overdue.push_back(task) {
            warn!(task_id = %id, error = %e, "could not retain overdue task");
        }
        outcome.relocated.push(id);

        if kind == TaskKind::Periodic {
            if let Some(unit) = unit {
                executor.suspend(unit);
                executor.terminate(unit);
                outcome.terminated.push(unit);
            }
        }
        info!(task_id = %id, %kind, deadline, now, "task overdue");
    }

    outcome
}

/// Destroy the oldest history records until at most `retention` remain.
///
/// An evicted aperiodic record whose expiry timer has not fired yet loses
/// that timer, so its unit is terminated here instead.
pub fn trim_history(history: &mut TaskList, retention: usize, executor: &dyn Executor) -> Vec<TaskId> {
    let mut evicted = Vec::new();
    while history.len() > retention {
        if let Some(oldest) = history.front() {
            if let (true, Some(unit)) = (oldest.has_armed_timer(), oldest.unit) {
                executor.suspend(unit);
                executor.terminate(unit);
                info!(task_id = %oldest.id, %unit, "evicted before its expiry fired, unit terminated");
            }
        }
        match history.remove_front() {
            Ok(id) => evicted.push(id),
            Err(e) => {
                warn!(list = history.name(), error = %e, "history trim stopped");
                break;
            }
        }
    }
    evicted
}
