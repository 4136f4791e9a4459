//! One-shot expiry timer for aperiodic tasks.
//!
//! The timer runs on its own tokio task, outside the coordinator's command
//! stream. When it fires it touches nothing but the unit it guards: it marks
//! itself released, then suspends and terminates that unit. Moving the task
//! record into the overdue list is left to the next sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::executor::Executor;
use crate::types::{Tick, UnitId};

#[derive(Default)]
struct TimerState {
    fired: AtomicBool,
    stopped: AtomicBool,
}

/// Handle to an armed expiry timer. Owned by the task record it guards.
///
/// Must be created from within a tokio runtime.
pub struct ExpiryTimer {
    unit: UnitId,
    state: Arc<TimerState>,
    handle: JoinHandle<()>,
}

impl ExpiryTimer {
    /// Arm a timer that terminates `unit` after `after` ticks.
    pub fn arm(executor: Arc<dyn Executor>, unit: UnitId, after: Tick) -> Self {
        let state = Arc::new(TimerState::default());
        let delay = executor.ticks(after);
        let fire_state = state.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire_state.fired.store(true, Ordering::SeqCst);
            executor.suspend(unit);
            executor.terminate(unit);
            info!(%unit, now = executor.now(), "aperiodic deadline reached, unit terminated");
        });

        debug!(%unit, after_ticks = after, "expiry timer armed");
        Self {
            unit,
            state,
            handle,
        }
    }

    /// Disarm the timer. Returns `true` if it had not fired yet.
    pub fn stop(&mut self) -> bool {
        if self.state.fired.load(Ordering::SeqCst) || self.state.stopped.load(Ordering::SeqCst) {
            return false;
        }
        self.state.stopped.store(true, Ordering::SeqCst);
        self.handle.abort();
        debug!(unit = %self.unit, "expiry timer stopped");
        true
    }

    /// Whether the timer is still waiting to fire.
    pub fn is_armed(&self) -> bool {
        !self.state.fired.load(Ordering::SeqCst) && !self.state.stopped.load(Ordering::SeqCst)
    }

    pub fn has_fired(&self) -> bool {
        self.state.fired.load(Ordering::SeqCst)
    }

    pub fn unit(&self) -> UnitId {
        self.unit
    }
}

impl Drop for ExpiryTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl std::fmt::Debug for ExpiryTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiryTimer")
            .field("unit", &self.unit)
            .field("armed", &self.is_armed())
            .field("fired", &self.has_fired())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::executor::SimExecutor;
    use crate::types::Priority;

    #[tokio::test(start_paused = true)]
    async fn fires_and_terminates_unit() {
        let exec = Arc::new(SimExecutor::runtime(Duration::from_millis(1)));
        let unit = exec.spawn_unit("sporadic", Priority(5)).unwrap();
        let timer = ExpiryTimer::arm(exec.clone(), unit, 100);
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(exec.is_alive(unit));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!exec.is_alive(unit));
        assert!(timer.has_fired());
        assert!(!timer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_timer_never_fires() {
        let exec = Arc::new(SimExecutor::runtime(Duration::from_millis(1)));
        let unit = exec.spawn_unit("sporadic", Priority(5)).unwrap();
        let mut timer = ExpiryTimer::arm(exec.clone(), unit, 50);

        assert!(timer.stop());
        assert!(!timer.stop());
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(exec.is_alive(unit));
        assert!(!timer.has_fired());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_fires_immediately() {
        let exec = Arc::new(SimExecutor::runtime(Duration::from_millis(1)));
        let unit = exec.spawn_unit("late", Priority(5)).unwrap();
        let _timer = ExpiryTimer::arm(exec.clone(), unit, 0);

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!exec.is_alive(unit));
    }
}
