//! Deadline-ordered task registry.
//!
//! Holds the three lists the coordinator owns (active, overdue, completed)
//! and keeps executor priorities of active tasks in step with their list
//! position. Nothing here is synchronised: the registry is meant to be owned
//! by exactly one actor.

pub mod error;
pub mod list;
pub mod registry;
pub mod sweep;
pub mod task;

pub use error::RegistryError;
pub use list::{SlotId, TaskList};
pub use registry::{Admission, ListKind, Registry};
pub use sweep::{sweep_overdue, trim_history, SweepOutcome};
pub use task::TaskRecord;
