use std::fmt;

use serde::{Deserialize, Serialize};

/// Monotonic executor time, in ticks since the executor started.
pub type Tick = u64;

/// Executor priority level. Numerically higher values are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u32);

impl Priority {
    /// One level less urgent, saturating at zero.
    pub fn lower(self) -> Priority {
        Priority(self.0.saturating_sub(1))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to a schedulable unit owned by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(pub u64);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

/// Caller-assigned identity of a deadline task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a task repeats (and is terminated by the sweep when late) or
/// runs once (and is terminated by its own expiry timer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    #[default]
    Periodic,
    Aperiodic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Periodic => f.write_str("periodic"),
            TaskKind::Aperiodic => f.write_str("aperiodic"),
        }
    }
}

/// The contiguous run of executor priorities reserved for deadline tasks.
///
/// The list head always holds `base`; each following position is one level
/// lower, down to `floor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityBand {
    pub base: Priority,
    pub floor: Priority,
}

impl PriorityBand {
    pub fn new(base: Priority, floor: Priority) -> Self {
        Self { base, floor }
    }

    /// Number of distinct levels, i.e. how many deadline tasks can be
    /// scheduled at once.
    pub fn capacity(&self) -> usize {
        (self.base.0.saturating_sub(self.floor.0) + 1) as usize
    }

    /// Priority for the given list position (0 = head). `None` past the floor.
    pub fn level_at(&self, position: usize) -> Option<Priority> {
        if position >= self.capacity() {
            return None;
        }
        Some(Priority(self.base.0 - position as u32))
    }
}
