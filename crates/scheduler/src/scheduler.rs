//! Wiring for a running coordinator.

use std::sync::Arc;

use ddsched_core::{Executor, SchedulerConfig};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::error;

use crate::client::{SchedulerHandle, SnapshotReader};
use crate::coordinator::Coordinator;
use crate::error::SchedulerError;
use crate::mailbox::report_mailbox;

/// A coordinator running on its own tokio task, with its command channel,
/// report mailbox and shutdown switch.
pub struct Scheduler {
    handle: SchedulerHandle,
    reader: Option<SnapshotReader>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), SchedulerError>>,
}

impl Scheduler {
    /// Spawn the coordinator. Must be called from within a tokio runtime.
    pub fn start(config: &SchedulerConfig, executor: Arc<dyn Executor>) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(config.scheduler.command_queue_depth);
        let (reports_tx, reports_rx) = report_mailbox();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let coordinator = Coordinator::new(
            config,
            executor.clone(),
            commands_rx,
            Some(reports_tx),
            shutdown_rx,
        );
        let task = tokio::spawn(coordinator.run());

        let handle = SchedulerHandle::new(commands_tx.clone(), executor, config.priorities.minimum);
        let reader = SnapshotReader::new(commands_tx, reports_rx);
        Self {
            handle,
            reader: Some(reader),
            shutdown,
            task,
        }
    }

    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// The snapshot reader. There is only one; later calls return `None`.
    pub fn take_reader(&mut self) -> Option<SnapshotReader> {
        self.reader.take()
    }

    /// Receiver that flips to `true` when [`shutdown`](Self::shutdown) is called.
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Ask the coordinator and every subscriber to stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Wait for the coordinator task to finish. Consuming the scheduler
    /// drops the shutdown switch, which also stops the coordinator.
    pub async fn join(self) -> Result<(), SchedulerError> {
        let Self { task, .. } = self;
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "coordinator task failed");
                Err(SchedulerError::ChannelUnavailable("command"))
            }
        }
    }
}
