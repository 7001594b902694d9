//! Synchronization engine: the polling scheduler and the coordinator that
//! owns the local snapshot.

pub mod coordinator;
pub mod scheduler;

pub use coordinator::{Pollers, SyncCoordinator, SyncEvent};
pub use scheduler::{BatchSink, PollingScheduler, SchedulerStatsSnapshot};
