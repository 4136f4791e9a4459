//! The three lists owned by the coordinator.

use std::fmt;
use std::sync::Arc;

use ddsched_core::{Executor, ExpiryTimer, Priority, PriorityBand, TaskKind, Tick, UnitId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::list::TaskList;
use crate::sweep::{sweep_overdue, trim_history, SweepOutcome};
use crate::task::TaskRecord;

/// Which list a query addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Active,
    Overdue,
    Completed,
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListKind::Active => f.write_str("active"),
            ListKind::Overdue => f.write_str("overdue"),
            ListKind::Completed => f.write_str("completed"),
        }
    }
}

/// Result of admitting a task into the active list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub priority: Priority,
    /// Position in the active list, 0 = head.
    pub position: usize,
    pub expiry_armed: bool,
}

/// Active, overdue and completed lists plus the retention policy.
pub struct Registry {
    active: TaskList,
    overdue: TaskList,
    completed: TaskList,
    executor: Arc<dyn Executor>,
    retention: usize,
}

impl Registry {
    pub fn new(band: PriorityBand, executor: Arc<dyn Executor>, retention: usize) -> Self {
        Self {
            active: TaskList::deadline_ordered("active", band, executor.clone()),
            overdue: TaskList::history("overdue"),
            completed: TaskList::history("completed"),
            executor,
            retention,
        }
    }

    pub fn list(&self, kind: ListKind) -> &TaskList {
        match kind {
            ListKind::Active => &self.active,
            ListKind::Overdue => &self.overdue,
            ListKind::Completed => &self.completed,
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Relocate expired tasks, then trim overdue history.
    pub fn sweep(&mut self, now: Tick) -> SweepOutcome {
        let mut outcome = sweep_overdue(
            &mut self.active,
            &mut self.overdue,
            now,
            self.executor.as_ref(),
        );
        outcome.evicted = trim_history(&mut self.overdue, self.retention, self.executor.as_ref());
        if !outcome.is_empty() {
            debug!(
                relocated = outcome.relocated.len(),
                evicted = outcome.evicted.len(),
                overdue = self.overdue.len(),
                "sweep complete"
            );
        }
        outcome
    }

    /// Insert a task into the active list and, for an aperiodic task, arm
    /// its expiry timer. The timer is only armed once insertion succeeded.
    ///
    /// Arming needs a tokio runtime.
    pub fn admit(&mut self, task: TaskRecord, now: Tick) -> Result<Admission, RegistryError> {
        let (id, kind, deadline) = (task.id, task.kind, task.absolute_deadline);
        let slot = self.active.insert(task)?;

        let mut expiry_armed = false;
        if kind == TaskKind::Aperiodic {
            if let Some(record) = self.active.get_mut(slot) {
                if let Some(unit) = record.unit {
                    let after = deadline.saturating_sub(now);
                    record.set_expiry(ExpiryTimer::arm(self.executor.clone(), unit, after));
                    expiry_armed = true;
                }
            }
        }

        let priority = self
            .active
            .get(slot)
            .and_then(|t| t.priority)
            .ok_or_else(|| {
                RegistryError::PreconditionViolated(format!("task {id} admitted without a priority"))
            })?;
        let position = self
            .active
            .iter()
            .position(|t| t.id == id && t.absolute_deadline == deadline)
            .unwrap_or_default();

        info!(task_id = %id, %kind, deadline, %priority, position, "task scheduled");
        Ok(Admission {
            priority,
            position,
            expiry_armed,
        })
    }

    /// Take a finished task out of the active list and stamp its
    /// completion time. The caller disposes of the record.
    pub fn release(&mut self, unit: UnitId, now: Tick) -> Result<TaskRecord, RegistryError> {
        let mut task = self
            .active
            .remove(unit, false)?
            .ok_or(RegistryError::NotFound {
                unit,
                list: "active",
            })?;
        task.completion_time = Some(now);

        match task.met_deadline() {
            Some(true) => info!(task_id = %task.id, deadline = task.absolute_deadline, now, "task completed"),
            _ => warn!(task_id = %task.id, deadline = task.absolute_deadline, now, "task completed after its deadline"),
        }
        Ok(task)
    }

    /// Human-readable snapshot of one list.
    pub fn render(&self, kind: ListKind) -> Result<String, RegistryError> {
        self.list(kind).render_report()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("active", &self.active.len())
            .field("overdue", &self.overdue.len())
            .field("completed", &self.completed.len())
            .field("retention", &self.retention)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ddsched_core::{SimExecutor, TaskId};

    use super::*;
    use crate::list::EMPTY_REPORT;

    fn registry(exec: &Arc<SimExecutor>) -> Registry {
        let band = PriorityBand::new(Priority(20), Priority(2));
        Registry::new(band, exec.clone(), 4)
    }

    fn periodic(exec: &SimExecutor, id: u64, deadline: u64) -> TaskRecord {
        let unit = exec.spawn_unit(&format!("t{id}"), Priority(1)).unwrap();
        TaskRecord::new(TaskId(id), format!("t{id}"), TaskKind::Periodic, 0, deadline).with_unit(unit)
    }

    #[test]
    fn admit_reports_position_and_priority() {
        let exec = Arc::new(SimExecutor::manual(Duration::from_millis(1)));
        let mut reg = registry(&exec);
        reg.admit(periodic(&exec, 1, 300), 0).unwrap();
        let adm = reg.admit(periodic(&exec, 2, 100), 0).unwrap();
        assert_eq!(adm.position, 0);
        assert_eq!(adm.priority, Priority(20));
        assert!(!adm.expiry_armed);

        let adm = reg.admit(periodic(&exec, 3, 200), 0).unwrap();
        assert_eq!(adm.position, 1);
        assert_eq!(adm.priority, Priority(19));
        reg.list(ListKind::Active).assert_consistent();
    }

    #[test]
    fn release_stamps_completion() {
        let exec = Arc::new(SimExecutor::manual(Duration::from_millis(1)));
        let mut reg = registry(&exec);
        let t = periodic(&exec, 1, 300);
        let unit = t.unit.unwrap();
        reg.admit(t, 0).unwrap();

        let done = reg.release(unit, 120).unwrap();
        assert_eq!(done.completion_time, Some(120));
        assert_eq!(done.met_deadline(), Some(true));
        assert!(reg.list(ListKind::Active).is_empty());
        assert!(reg.list(ListKind::Completed).is_empty());

        assert!(matches!(
            reg.release(unit, 130),
            Err(RegistryError::PreconditionViolated(_))
        ));
    }

    #[test]
    fn overdue_history_is_capped() {
        let exec = Arc::new(SimExecutor::manual(Duration::from_millis(1)));
        let mut reg = registry(&exec);
        for id in 1..=6 {
            reg.admit(periodic(&exec, id, id * 10), 0).unwrap();
        }

        let outcome = reg.sweep(1000);
        assert_eq!(outcome.relocated.len(), 6);
        assert_eq!(outcome.evicted, vec![TaskId(1), TaskId(2)]);
        let kept: Vec<_> = reg.list(ListKind::Overdue).iter().map(|t| t.id.0).collect();
        assert_eq!(kept, vec![3, 4, 5, 6]);
    }

    #[test]
    fn completed_list_renders_empty() {
        let exec = Arc::new(SimExecutor::manual(Duration::from_millis(1)));
        let reg = registry(&exec);
        assert_eq!(reg.render(ListKind::Completed).unwrap(), EMPTY_REPORT);
    }

    #[tokio::test(start_paused = true)]
    async fn aperiodic_admission_arms_timer() {
        let exec = Arc::new(SimExecutor::runtime(Duration::from_millis(1)));
        let mut reg = registry(&exec);
        let unit = exec.spawn_unit("sporadic", Priority(1)).unwrap();
        let t = TaskRecord::new(TaskId(5), "sporadic", TaskKind::Aperiodic, 0, 80).with_unit(unit);

        let adm = reg.admit(t, exec.now()).unwrap();
        assert!(adm.expiry_armed);

        tokio::time::sleep(Duration::from_millis(81)).await;
        assert!(!exec.is_alive(unit));

        // The timer never touches the lists; the next sweep relocates it.
        assert_eq!(reg.list(ListKind::Active).len(), 1);
        let outcome = reg.sweep(exec.now());
        assert_eq!(outcome.relocated, vec![TaskId(5)]);
        assert_eq!(reg.list(ListKind::Overdue).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn releasing_aperiodic_stops_timer() {
        let exec = Arc::new(SimExecutor::runtime(Duration::from_millis(1)));
        let mut reg = registry(&exec);
        let unit = exec.spawn_unit("sporadic", Priority(1)).unwrap();
        let t = TaskRecord::new(TaskId(6), "sporadic", TaskKind::Aperiodic, 0, 80).with_unit(unit);
        reg.admit(t, exec.now()).unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let done = reg.release(unit, exec.now()).unwrap();
        assert!(!done.has_armed_timer());
        assert!(done.destroy().is_ok());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(exec.is_alive(unit));
    }
}
