//! Runtime adapters (async jobs) and API surface.

pub mod api;
#[cfg(feature = "tokio-runtime")]
pub mod future_task;

pub use api::{list_instances, scheduler_snapshot_json, InstanceInfo, SchedulerSnapshot};
#[cfg(feature = "tokio-runtime")]
pub use future_task::{AsyncJob, FutureTask};
