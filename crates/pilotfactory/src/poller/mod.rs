//! Periodic refresh of the batch state and per-queue demand cycles.
pub mod process;
pub mod snapshot;

pub use process::{BatchPoller, QueueAgent, queue_agent_process, status_poller_process};
pub use snapshot::{BatchSnapshot, CycleReport, SnapshotCell};
