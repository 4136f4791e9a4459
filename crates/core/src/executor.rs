//! Interface to the fixed-priority executor, plus an in-process simulation.
//!
//! The scheduler never reasons about how units are context-switched. It only
//! creates units, parks and releases them, reads and writes their priority,
//! and reads the monotonic tick count. [`SimExecutor`] provides those
//! operations for tests and the demo binary: it tracks each unit's priority
//! and run state and publishes state changes on a `watch` channel so task
//! bodies can wait until they are released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::types::{Priority, Tick, UnitId};

/// Run state of an executor unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Ready,
    Suspended,
    Terminated,
}

/// Operations the deadline scheduler consumes from the executor.
///
/// Operations addressed to a unit that no longer exists are no-ops.
pub trait Executor: Send + Sync {
    /// Create a runnable unit at the given priority.
    fn spawn_unit(&self, name: &str, priority: Priority) -> Result<UnitId, CoreError>;

    fn priority(&self, unit: UnitId) -> Option<Priority>;

    fn set_priority(&self, unit: UnitId, priority: Priority);

    fn suspend(&self, unit: UnitId);

    fn resume(&self, unit: UnitId);

    /// Delete the unit. It can never run again.
    fn terminate(&self, unit: UnitId);

    /// Current run state, `None` once the unit has been deleted.
    fn state(&self, unit: UnitId) -> Option<UnitState>;

    /// Subscribe to run-state changes of a unit.
    fn watch(&self, unit: UnitId) -> Option<watch::Receiver<UnitState>>;

    /// Monotonic time in ticks.
    fn now(&self) -> Tick;

    /// Wall-clock length of one tick.
    fn tick_period(&self) -> Duration;

    fn is_alive(&self, unit: UnitId) -> bool {
        self.state(unit).is_some()
    }

    /// Wall-clock duration of `ticks` ticks.
    fn ticks(&self, ticks: Tick) -> Duration {
        let nanos = self.tick_period().as_nanos().saturating_mul(ticks as u128);
        Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
    }
}

// ── Control units ────────────────────────────────────────────────────

/// Unit standing in for a control-plane task (coordinator, generator,
/// monitor) at its configured priority. Terminated when dropped.
pub struct ControlUnit {
    executor: Arc<dyn Executor>,
    unit: UnitId,
}

impl ControlUnit {
    pub fn spawn(
        executor: Arc<dyn Executor>,
        name: &str,
        priority: Priority,
    ) -> Result<Self, CoreError> {
        let unit = executor.spawn_unit(name, priority)?;
        debug!(%unit, name, %priority, "control unit started");
        Ok(Self { executor, unit })
    }

    pub fn id(&self) -> UnitId {
        self.unit
    }
}

impl Drop for ControlUnit {
    fn drop(&mut self) {
        self.executor.terminate(self.unit);
    }
}

impl std::fmt::Debug for ControlUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlUnit").field("unit", &self.unit).finish()
    }
}

// ── Clock ────────────────────────────────────────────────────────────

/// Time source for [`SimExecutor`].
pub enum Clock {
    /// Ticks derived from `tokio::time`, so paused-time tests control it.
    Runtime {
        epoch: tokio::time::Instant,
        tick: Duration,
    },
    /// Ticks only move when [`SimExecutor::advance`] is called.
    Manual { now: AtomicU64, tick: Duration },
}

impl Clock {
    pub fn runtime(tick: Duration) -> Self {
        Clock::Runtime {
            epoch: tokio::time::Instant::now(),
            tick,
        }
    }

    pub fn manual(tick: Duration) -> Self {
        Clock::Manual {
            now: AtomicU64::new(0),
            tick,
        }
    }

    fn now(&self) -> Tick {
        match self {
            Clock::Runtime { epoch, tick } => {
                let tick_nanos = tick.as_nanos().max(1);
                (epoch.elapsed().as_nanos() / tick_nanos) as Tick
            }
            Clock::Manual { now, .. } => now.load(Ordering::SeqCst),
        }
    }

    fn tick(&self) -> Duration {
        match self {
            Clock::Runtime { tick, .. } | Clock::Manual { tick, .. } => *tick,
        }
    }
}

// ── SimExecutor ──────────────────────────────────────────────────────

struct Unit {
    name: String,
    priority: Priority,
    state: watch::Sender<UnitState>,
}

impl Unit {
    fn current(&self) -> UnitState {
        *self.state.borrow()
    }
}

/// In-process executor that records priorities and run states.
pub struct SimExecutor {
    units: Mutex<HashMap<UnitId, Unit>>,
    next_id: AtomicU64,
    clock: Clock,
    unit_limit: Option<usize>,
}

impl SimExecutor {
    pub fn new(clock: Clock) -> Self {
        Self {
            units: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            clock,
            unit_limit: None,
        }
    }

    /// Executor whose ticks follow `tokio::time`.
    pub fn runtime(tick: Duration) -> Self {
        Self::new(Clock::runtime(tick))
    }

    /// Executor with a hand-driven clock.
    pub fn manual(tick: Duration) -> Self {
        Self::new(Clock::manual(tick))
    }

    /// Refuse to create more than `limit` live units.
    pub fn with_unit_limit(mut self, limit: usize) -> Self {
        self.unit_limit = Some(limit);
        self
    }

    /// Move a manual clock forward. Ignored for runtime clocks.
    pub fn advance(&self, ticks: Tick) {
        match &self.clock {
            Clock::Manual { now, .. } => {
                now.fetch_add(ticks, Ordering::SeqCst);
            }
            Clock::Runtime { .. } => {
                warn!("advance() called on a runtime clock; use tokio::time instead");
            }
        }
    }

    /// Number of units that have not been terminated.
    pub fn live_units(&self) -> usize {
        self.units().len()
    }

    /// First live unit created with `name`.
    pub fn find(&self, name: &str) -> Option<UnitId> {
        self.units()
            .iter()
            .find(|(_, u)| u.name == name)
            .map(|(id, _)| *id)
    }

    /// Name the unit was created with.
    pub fn name_of(&self, unit: UnitId) -> Option<String> {
        self.units().get(&unit).map(|u| u.name.clone())
    }

    fn units(&self) -> MutexGuard<'_, HashMap<UnitId, Unit>> {
        self.units.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transition(&self, unit: UnitId, to: UnitState) {
        let units = self.units();
        match units.get(&unit) {
            Some(u) => {
                let from = u.current();
                if from != to {
                    debug!(%unit, name = %u.name, ?from, ?to, "unit state change");
                    u.state.send_replace(to);
                }
            }
            None => debug!(%unit, ?to, "state change on unknown unit ignored"),
        }
    }
}

impl Executor for SimExecutor {
    fn spawn_unit(&self, name: &str, priority: Priority) -> Result<UnitId, CoreError> {
        let mut units = self.units();
        if let Some(limit) = self.unit_limit {
            if units.len() >= limit {
                warn!(name, limit, "unit limit reached");
                return Err(CoreError::UnitCreation(name.to_string()));
            }
        }

        let id = UnitId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (state, _) = watch::channel(UnitState::Ready);
        units.insert(
            id,
            Unit {
                name: name.to_string(),
                priority,
                state,
            },
        );
        debug!(unit = %id, name, %priority, "unit created");
        Ok(id)
    }

    fn priority(&self, unit: UnitId) -> Option<Priority> {
        self.units().get(&unit).map(|u| u.priority)
    }

    fn set_priority(&self, unit: UnitId, priority: Priority) {
        match self.units().get_mut(&unit) {
            Some(u) => u.priority = priority,
            None => debug!(%unit, %priority, "set_priority on unknown unit ignored"),
        }
    }

    fn suspend(&self, unit: UnitId) {
        self.transition(unit, UnitState::Suspended);
    }

    fn resume(&self, unit: UnitId) {
        self.transition(unit, UnitState::Ready);
    }

    fn terminate(&self, unit: UnitId) {
        if let Some(u) = self.units().remove(&unit) {
            debug!(%unit, name = %u.name, "unit terminated");
            u.state.send_replace(UnitState::Terminated);
        }
    }

    fn state(&self, unit: UnitId) -> Option<UnitState> {
        self.units().get(&unit).map(Unit::current)
    }

    fn watch(&self, unit: UnitId) -> Option<watch::Receiver<UnitState>> {
        self.units().get(&unit).map(|u| u.state.subscribe())
    }

    fn now(&self) -> Tick {
        self.clock.now()
    }

    fn tick_period(&self) -> Duration {
        self.clock.tick()
    }
}
