//! Deadline scheduling on top of a fixed-priority executor.
//!
//! A single [`Coordinator`] owns the task registry. Producers talk to it
//! through a [`SchedulerHandle`]; one [`SnapshotReader`] fetches rendered
//! lists through a single-slot mailbox.

pub mod client;
pub mod command;
pub mod coordinator;
pub mod error;
pub mod mailbox;
pub mod monitor;
pub mod scheduler;
pub mod workload;

pub use client::{Completion, Scheduled, SchedulerHandle, SnapshotReader};
pub use command::{Command, CreateOutcome, DeleteOutcome};
pub use coordinator::{Coordinator, CoordinatorState, COORDINATOR_UNIT};
pub use error::SchedulerError;
pub use mailbox::{report_mailbox, Report, ReportReceiver, ReportSender};
pub use monitor::{Monitor, MONITOR_UNIT};
pub use scheduler::Scheduler;
pub use workload::{run_task_body, BodyOutcome, Generator, GeneratorStats, TaskIds};
