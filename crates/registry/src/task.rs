//! The task record: one deadline-bound unit of work.

use std::fmt;

use ddsched_core::{ExpiryTimer, Priority, TaskId, TaskKind, Tick, UnitId};

use crate::error::RegistryError;
use crate::list::SlotId;

/// Position of a record inside a [`TaskList`](crate::TaskList).
///
/// `list` identifies the owning list; a record with `list == None` is
/// unlinked and both neighbours are `None` as well.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Links {
    pub list: Option<u32>,
    pub prev: Option<SlotId>,
    pub next: Option<SlotId>,
}

impl Links {
    pub fn clear(&mut self) {
        *self = Links::default();
    }
}

/// A deadline-bound task and the executor unit that runs it.
#[derive(Debug, Default)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub kind: TaskKind,
    pub release_time: Tick,
    pub absolute_deadline: Tick,
    pub completion_time: Option<Tick>,
    /// Executor unit running this task. Filled in by the submitting client.
    pub unit: Option<UnitId>,
    /// Level assigned by the deadline-ordered list holding this record.
    /// Cleared whenever the record enters or leaves a list.
    pub(crate) priority: Option<Priority>,
    pub(crate) expiry: Option<ExpiryTimer>,
    pub(crate) links: Links,
}

impl TaskRecord {
    /// Blank record: no unit, no timer, not linked anywhere.
    pub fn create() -> Self {
        Self::default()
    }

    pub fn new(
        id: TaskId,
        name: impl Into<String>,
        kind: TaskKind,
        release_time: Tick,
        absolute_deadline: Tick,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            release_time,
            absolute_deadline,
            ..Self::default()
        }
    }

    pub fn with_unit(mut self, unit: UnitId) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    pub fn is_linked(&self) -> bool {
        self.links.list.is_some()
    }

    pub fn has_armed_timer(&self) -> bool {
        self.expiry.as_ref().is_some_and(ExpiryTimer::is_armed)
    }

    pub fn expiry(&self) -> Option<&ExpiryTimer> {
        self.expiry.as_ref()
    }

    /// Attach an expiry timer. Only meaningful for aperiodic tasks.
    pub fn set_expiry(&mut self, timer: ExpiryTimer) {
        self.expiry = Some(timer);
    }

    /// Stop and release the expiry timer, if any.
    pub fn disarm(&mut self) {
        if let Some(mut timer) = self.expiry.take() {
            timer.stop();
        }
    }

    /// Whether the task finished at or before its deadline.
    pub fn met_deadline(&self) -> Option<bool> {
        self.completion_time.map(|t| t <= self.absolute_deadline)
    }

    /// Release the record.
    ///
    /// Fails, handing the record back, while it is still linked into a list
    /// or still owns an armed timer.
    pub fn destroy(self) -> Result<(), (RegistryError, TaskRecord)> {
        if self.is_linked() {
            let err = RegistryError::PreconditionViolated(format!(
                "task {} must be removed from its list before it is destroyed",
                self.id
            ));
            return Err((err, self));
        }
        if self.has_armed_timer() {
            let err = RegistryError::PreconditionViolated(format!(
                "task {} still owns an armed expiry timer",
                self.id
            ));
            return Err((err, self));
        }
        Ok(())
    }
}

impl fmt::Display for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Task ID = {}, Deadline = {}",
            self.id, self.absolute_deadline
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_is_blank() {
        let task = TaskRecord::create();
        assert_eq!(task.id, TaskId(0));
        assert!(task.unit.is_none());
        assert!(task.expiry().is_none());
        assert!(task.completion_time.is_none());
        assert!(!task.is_linked());
    }

    #[test]
    fn destroy_unlinked_record() {
        let task = TaskRecord::new(TaskId(1), "t1", TaskKind::Periodic, 0, 100);
        assert!(task.destroy().is_ok());
    }

    #[test]
    fn destroy_linked_record_is_refused() {
        let mut task = TaskRecord::new(TaskId(2), "t2", TaskKind::Periodic, 0, 100);
        task.links.list = Some(7);
        let (err, back) = task.destroy().unwrap_err();
        assert!(matches!(err, RegistryError::PreconditionViolated(_)));
        assert_eq!(back.id, TaskId(2));
    }

    #[test]
    fn met_deadline_compares_completion() {
        let mut task = TaskRecord::new(TaskId(3), "t3", TaskKind::Aperiodic, 0, 100);
        assert_eq!(task.met_deadline(), None);
        task.completion_time = Some(100);
        assert_eq!(task.met_deadline(), Some(true));
        task.completion_time = Some(101);
        assert_eq!(task.met_deadline(), Some(false));
    }

    #[test]
    fn display_matches_report_line() {
        let task = TaskRecord::new(TaskId(4), "t4", TaskKind::Periodic, 0, 350);
        assert_eq!(task.to_string(), "Task ID = 4, Deadline = 350");
    }
}
