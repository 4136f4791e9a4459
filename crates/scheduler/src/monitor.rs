//! Periodic logger of list snapshots.

use std::sync::Arc;

use ddsched_core::{ControlUnit, Executor, MonitorConfig, Priority};
use ddsched_registry::ListKind;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::client::SnapshotReader;
use crate::error::SchedulerError;

/// Order in which a poll reads the lists.
const POLL_ORDER: [ListKind; 3] = [ListKind::Active, ListKind::Completed, ListKind::Overdue];

/// Name of the monitor's own executor unit.
pub const MONITOR_UNIT: &str = "Monitor";

pub struct Monitor {
    config: MonitorConfig,
    priority: Priority,
    reader: SnapshotReader,
    executor: Arc<dyn Executor>,
    shutdown: watch::Receiver<bool>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        priority: Priority,
        reader: SnapshotReader,
        executor: Arc<dyn Executor>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            priority,
            reader,
            executor,
            shutdown,
        }
    }

    /// Wait out the startup delay, then poll every interval until shutdown.
    pub async fn run(mut self) -> Result<(), SchedulerError> {
        if !self.config.enabled {
            info!("monitor disabled");
            return Ok(());
        }
        if self.config.poll_interval_ticks == 0 {
            warn!("zero poll interval, monitor not started");
            return Ok(());
        }
        let _control = ControlUnit::spawn(self.executor.clone(), MONITOR_UNIT, self.priority)
            .map_err(|e| warn!(error = %e, "monitor runs without its own unit"))
            .ok();

        tokio::select! {
            _ = tokio::time::sleep(self.executor.ticks(self.config.startup_delay_ticks)) => {}
            _ = self.shutdown.changed() => return Ok(()),
        }

        let mut interval =
            tokio::time::interval(self.executor.ticks(self.config.poll_interval_ticks));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.shutdown.changed() => break,
            }
            self.poll().await?;
        }
        info!("monitor stopped");
        Ok(())
    }

    /// Read and log one snapshot of every list.
    pub async fn poll(&mut self) -> Result<Vec<(ListKind, String)>, SchedulerError> {
        let now = self.executor.now();
        info!(now, "scheduler snapshot");

        let mut snapshots = Vec::with_capacity(POLL_ORDER.len());
        for list in POLL_ORDER {
            let text = self.reader.request_snapshot(list).await?;
            info!(%list, "\n{text}");
            snapshots.push((list, text));
        }
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ddsched_core::SimExecutor;
    use tokio::sync::mpsc;

    use super::*;
    use crate::mailbox::report_mailbox;

    fn monitor(exec: &Arc<SimExecutor>, config: MonitorConfig) -> (Monitor, watch::Sender<bool>) {
        let (tx, _rx) = mpsc::channel(1);
        let (_reports_tx, reports_rx) = report_mailbox();
        let (stop_tx, stop_rx) = watch::channel(false);
        let reader = SnapshotReader::new(tx, reports_rx);
        (Monitor::new(config, Priority(22), reader, exec.clone(), stop_rx), stop_tx)
    }

    #[tokio::test(start_paused = true)]
    async fn zero_poll_interval_returns_immediately() {
        let exec = Arc::new(SimExecutor::runtime(Duration::from_millis(1)));
        let config = MonitorConfig {
            poll_interval_ticks: 0,
            ..MonitorConfig::default()
        };
        let (monitor, _stop) = monitor(&exec, config);
        assert!(monitor.run().await.is_ok());
        assert_eq!(exec.live_units(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unit_held_at_monitor_priority_until_shutdown() {
        let exec = Arc::new(SimExecutor::runtime(Duration::from_millis(1)));
        let (monitor, stop) = monitor(&exec, MonitorConfig::default());
        let task = tokio::spawn(monitor.run());

        tokio::time::sleep(Duration::from_millis(5)).await;
        let unit = exec.find(MONITOR_UNIT).unwrap();
        assert_eq!(exec.priority(unit), Some(Priority(22)));

        stop.send_replace(true);
        assert!(task.await.unwrap().is_ok());
        assert!(!exec.is_alive(unit));
    }
}
