//! Single-slot report mailbox between the coordinator and one reader.
//!
//! Holds at most one report. Posting while a report is still unread
//! replaces it, so the reader only ever sees the most recent snapshot.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use ddsched_core::Tick;
use ddsched_registry::ListKind;
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::error::SchedulerError;

/// A rendered list snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Matches the query that produced it.
    pub correlation_id: Uuid,
    pub list: ListKind,
    pub text: String,
    /// Executor tick at which the snapshot was taken.
    pub at: Tick,
    pub taken_at: DateTime<Utc>,
}

#[derive(Default)]
struct Slot {
    report: Option<Report>,
    sender_closed: bool,
    receiver_closed: bool,
}

#[derive(Default)]
struct Shared {
    slot: Mutex<Slot>,
    notify: Notify,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Create a connected sender/receiver pair.
pub fn report_mailbox() -> (ReportSender, ReportReceiver) {
    let shared = Arc::new(Shared::default());
    (
        ReportSender {
            shared: shared.clone(),
        },
        ReportReceiver { shared },
    )
}

/// Coordinator side of the mailbox.
pub struct ReportSender {
    shared: Arc<Shared>,
}

impl ReportSender {
    /// Post a report, discarding any unread one. Returns the discarded
    /// report, if there was one.
    pub fn post(&self, report: Report) -> Result<Option<Report>, SchedulerError> {
        let replaced = {
            let mut slot = self.shared.slot();
            if slot.receiver_closed {
                return Err(SchedulerError::ReportDelivery(format!(
                    "{} report has no reader",
                    report.list
                )));
            }
            slot.report.replace(report)
        };
        if let Some(stale) = &replaced {
            debug!(list = %stale.list, correlation_id = %stale.correlation_id, "unread report discarded");
        }
        self.shared.notify.notify_one();
        Ok(replaced)
    }
}

impl Drop for ReportSender {
    fn drop(&mut self) {
        self.shared.slot().sender_closed = true;
        self.shared.notify.notify_one();
    }
}

/// Reader side of the mailbox.
pub struct ReportReceiver {
    shared: Arc<Shared>,
}

impl ReportReceiver {
    /// Wait for the next report. `None` once the sender is gone and the
    /// slot is empty.
    pub async fn recv(&mut self) -> Option<Report> {
        loop {
            {
                let mut slot = self.shared.slot();
                if let Some(report) = slot.report.take() {
                    return Some(report);
                }
                if slot.sender_closed {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<Report> {
        self.shared.slot().report.take()
    }
}

impl Drop for ReportReceiver {
    fn drop(&mut self) {
        let mut slot = self.shared.slot();
        slot.receiver_closed = true;
        slot.report = None;
    }
}
