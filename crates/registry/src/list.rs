//! Deadline-ordered task list backed by a slab.
//!
//! Records live in `slots`; prev/next links are slot indices, so removing a
//! record never leaves a dangling neighbour. A list created with
//! [`TaskList::deadline_ordered`] also owns a priority band: after every
//! structural change [`renumber`](TaskList::renumber) walks the list once and
//! gives the head the band's base level, one level less per position. That
//! keeps list order and executor priority order isomorphic no matter which
//! node was inserted or removed.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ddsched_core::{Executor, Priority, PriorityBand, TaskId, TaskKind, UnitId};
use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::task::{Links, TaskRecord};

static NEXT_LIST_ID: AtomicU32 = AtomicU32::new(1);

/// Sentinel rendered for a list with no entries.
pub const EMPTY_REPORT: &str = "List is empty.\n";

/// Index of a record inside one [`TaskList`]. Not stable across lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(usize);

/// Band plus the executor whose priorities the list drives.
struct PriorityLane {
    band: PriorityBand,
    executor: Arc<dyn Executor>,
}

pub struct TaskList {
    id: u32,
    name: &'static str,
    slots: Vec<Option<TaskRecord>>,
    free: Vec<usize>,
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
    lane: Option<PriorityLane>,
}

impl TaskList {
    /// List whose positions map onto executor priorities in `band`.
    pub fn deadline_ordered(
        name: &'static str,
        band: PriorityBand,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let mut list = Self::history(name);
        list.lane = Some(PriorityLane { band, executor });
        list
    }

    /// List that never touches executor priorities (overdue, completed).
    pub fn history(name: &'static str) -> Self {
        Self {
            id: NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed),
            name,
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
            lane: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// How many records this list can hold, `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.lane.as_ref().map(|lane| lane.band.capacity())
    }

    pub fn front(&self) -> Option<&TaskRecord> {
        self.head.map(|slot| self.node(slot))
    }

    pub fn back(&self) -> Option<&TaskRecord> {
        self.tail.map(|slot| self.node(slot))
    }

    pub fn get(&self, slot: SlotId) -> Option<&TaskRecord> {
        self.slots.get(slot.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut TaskRecord> {
        self.slots.get_mut(slot.0).and_then(Option::as_mut)
    }

    /// Head-to-tail iteration.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// Locate the record running on `unit`.
    pub fn find(&self, unit: UnitId) -> Option<SlotId> {
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let node = self.node(slot);
            if node.unit == Some(unit) {
                return Some(slot);
            }
            cursor = node.links.next;
        }
        None
    }

    pub fn contains(&self, unit: UnitId) -> bool {
        self.find(unit).is_some()
    }

    // ── Insertion ───────────────────────────────────────────────────

    /// Insert in deadline order, before the first record with a strictly
    /// later deadline. Equal deadlines keep arrival order.
    pub fn insert(&mut self, task: TaskRecord) -> Result<SlotId, RegistryError> {
        self.check_insertable(&task)?;

        if let Some(lane) = &self.lane {
            if task.unit.is_none() {
                return Err(RegistryError::InvalidArgument(format!(
                    "task {} has no executor unit",
                    task.id
                )));
            }
            let capacity = lane.band.capacity();
            if self.len >= capacity {
                return Err(RegistryError::CapacityExceeded {
                    task: task.id,
                    capacity,
                });
            }
        }

        let deadline = task.absolute_deadline;
        let slot = self.alloc(task)?;

        let mut cursor = self.head;
        let mut successor = None;
        while let Some(current) = cursor {
            let node = self.node(current);
            if node.absolute_deadline > deadline {
                successor = Some(current);
                break;
            }
            cursor = node.links.next;
        }

        match successor {
            Some(next) => self.link_before(slot, next),
            None => self.link_back(slot),
        }
        self.renumber();

        debug!(
            list = self.name,
            task_id = %self.node(slot).id,
            deadline,
            len = self.len,
            "task inserted"
        );
        Ok(slot)
    }

    /// Append at the tail regardless of deadline. Only valid for lists
    /// without a priority band.
    pub fn push_back(&mut self, task: TaskRecord) -> Result<SlotId, RegistryError> {
        self.check_insertable(&task)?;
        if self.lane.is_some() {
            return Err(RegistryError::InvalidArgument(format!(
                "{} list is deadline-ordered; use insert",
                self.name
            )));
        }
        let slot = self.alloc(task)?;
        self.link_back(slot);
        Ok(slot)
    }

    fn check_insertable(&self, task: &TaskRecord) -> Result<(), RegistryError> {
        if task.is_linked() {
            return Err(RegistryError::InvalidArgument(format!(
                "task {} is already linked into a list",
                task.id
            )));
        }
        Ok(())
    }

    // ── Removal ─────────────────────────────────────────────────────

    /// Pop the head and destroy it. Used for bounded eviction.
    pub fn remove_front(&mut self) -> Result<TaskId, RegistryError> {
        let Some(head) = self.head else {
            return Err(RegistryError::PreconditionViolated(format!(
                "{} list is already empty",
                self.name
            )));
        };

        let mut task = self.unlink(head);
        self.renumber();
        task.disarm();
        let id = task.id;
        destroy_or_warn(task);
        Ok(id)
    }

    /// Unlink the head without destroying it or touching its timer.
    ///
    /// The sweep uses this so an aperiodic task keeps its expiry timer while
    /// it is moved into history.
    pub fn pop_front(&mut self) -> Option<TaskRecord> {
        let head = self.head?;
        let task = self.unlink(head);
        self.renumber();
        Some(task)
    }

    /// Remove the record running on `unit`.
    ///
    /// An aperiodic record has its expiry timer stopped first. With `clear`
    /// the record is destroyed and `None` is returned; otherwise it comes
    /// back unlinked for the caller to keep or relink.
    pub fn remove(
        &mut self,
        unit: UnitId,
        clear: bool,
    ) -> Result<Option<TaskRecord>, RegistryError> {
        if self.is_empty() {
            return Err(RegistryError::PreconditionViolated(format!(
                "{} list is already empty",
                self.name
            )));
        }
        let slot = self.find(unit).ok_or(RegistryError::NotFound {
            unit,
            list: self.name,
        })?;

        if self.node(slot).kind == TaskKind::Aperiodic {
            self.node_mut(slot).disarm();
        }

        let task = self.unlink(slot);
        self.renumber();
        debug!(list = self.name, task_id = %task.id, clear, len = self.len, "task removed");

        if clear {
            destroy_or_warn(task);
            Ok(None)
        } else {
            Ok(Some(task))
        }
    }

    // ── Priorities ──────────────────────────────────────────────────

    /// Give every record its position's level: head = band base, then one
    /// lower per position. No-op for history lists.
    pub fn renumber(&mut self) {
        let Some(band) = self.lane.as_ref().map(|lane| lane.band) else {
            return;
        };

        let mut cursor = self.head;
        let mut position = 0;
        while let Some(slot) = cursor {
            match band.level_at(position) {
                Some(level) => self.assign_priority(slot, level),
                None => warn!(
                    list = self.name,
                    position, "list longer than its priority band"
                ),
            }
            cursor = self.node(slot).links.next;
            position += 1;
        }
    }

    fn assign_priority(&mut self, slot: SlotId, level: Priority) {
        let Some(executor) = self.lane.as_ref().map(|lane| lane.executor.clone()) else {
            return;
        };
        let node = self.node_mut(slot);
        if node.priority == Some(level) {
            return;
        }
        node.priority = Some(level);
        if let Some(unit) = node.unit {
            executor.set_priority(unit, level);
        }
    }

    // ── Reporting ───────────────────────────────────────────────────

    /// One line per record in list order, or [`EMPTY_REPORT`].
    pub fn render_report(&self) -> Result<String, RegistryError> {
        let mut out = String::new();
        if self.is_empty() {
            out.push_str(EMPTY_REPORT);
            return Ok(out);
        }

        let estimate = self.iter().map(|t| t.name.len() + 50).sum::<usize>();
        out.try_reserve(estimate).map_err(|e| {
            RegistryError::OutOfMemory(format!("{} list report buffer: {e}", self.name))
        })?;
        for task in self.iter() {
            let _ = writeln!(out, "{task}");
        }
        Ok(out)
    }

    // ── Slab and link plumbing ──────────────────────────────────────

    fn alloc(&mut self, mut task: TaskRecord) -> Result<SlotId, RegistryError> {
        task.priority = None;
        task.links = Links {
            list: Some(self.id),
            prev: None,
            next: None,
        };
        if let Some(index) = self.free.pop() {
            self.slots[index] = Some(task);
            return Ok(SlotId(index));
        }
        self.slots.try_reserve(1).map_err(|e| {
            RegistryError::OutOfMemory(format!("{} list slot for task {}: {e}", self.name, task.id))
        })?;
        self.slots.push(Some(task));
        Ok(SlotId(self.slots.len() - 1))
    }

    fn link_before(&mut self, slot: SlotId, next: SlotId) {
        let prev = self.node(next).links.prev;
        {
            let node = self.node_mut(slot);
            node.links.prev = prev;
            node.links.next = Some(next);
        }
        self.node_mut(next).links.prev = Some(slot);
        match prev {
            Some(p) => self.node_mut(p).links.next = Some(slot),
            None => self.head = Some(slot),
        }
        self.len += 1;
    }

    fn link_back(&mut self, slot: SlotId) {
        let prev = self.tail;
        {
            let node = self.node_mut(slot);
            node.links.prev = prev;
            node.links.next = None;
        }
        match prev {
            Some(p) => self.node_mut(p).links.next = Some(slot),
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
        self.len += 1;
    }

    fn unlink(&mut self, slot: SlotId) -> TaskRecord {
        let links = self.node(slot).links;
        match links.prev {
            Some(p) => self.node_mut(p).links.next = links.next,
            None => self.head = links.next,
        }
        match links.next {
            Some(n) => self.node_mut(n).links.prev = links.prev,
            None => self.tail = links.prev,
        }
        self.len -= 1;

        let mut task = self.slots[slot.0]
            .take()
            .expect("linked slot is occupied");
        self.free.push(slot.0);
        task.links.clear();
        task.priority = None;
        task
    }

    fn node(&self, slot: SlotId) -> &TaskRecord {
        self.slots[slot.0]
            .as_ref()
            .expect("linked slot is occupied")
    }

    fn node_mut(&mut self, slot: SlotId) -> &mut TaskRecord {
        self.slots[slot.0]
            .as_mut()
            .expect("linked slot is occupied")
    }

    /// Check count, link symmetry, ordering and priority numbering.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let forward: Vec<_> = self.iter().map(|t| t.absolute_deadline).collect();
        assert_eq!(forward.len(), self.len, "forward count");

        let mut backward = 0;
        let mut cursor = self.tail;
        while let Some(slot) = cursor {
            backward += 1;
            cursor = self.node(slot).links.prev;
        }
        assert_eq!(backward, self.len, "backward count");

        if let Some(lane) = &self.lane {
            assert!(forward.windows(2).all(|w| w[0] <= w[1]), "sorted: {forward:?}");
            for (position, task) in self.iter().enumerate() {
                let expected = lane.band.level_at(position);
                assert_eq!(task.priority, expected, "priority at position {position}");
                let unit = task.unit.expect("scheduled task has a unit");
                assert_eq!(lane.executor.priority(unit), expected);
            }
        }
    }
}

/// Destroy a record that was just unlinked; a refusal here is a bug.
fn destroy_or_warn(task: TaskRecord) {
    if let Err((err, task)) = task.destroy() {
        warn!(task_id = %task.id, error = %err, "task record could not be destroyed");
    }
}

impl std::fmt::Debug for TaskList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskList")
            .field("name", &self.name)
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish()
    }
}

pub struct Iter<'a> {
    list: &'a TaskList,
    cursor: Option<SlotId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a TaskRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        let node = self.list.node(slot);
        self.cursor = node.links.next;
        Some(node)
    }
}
