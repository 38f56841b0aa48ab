//! API-facing introspection models for ops tooling.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{Launcher, Scheduler};

pub use crate::core::SchedulerSnapshot;

/// One running launcher instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Registry tag.
    pub tag: String,
    /// Instance identifier.
    pub instance_id: Uuid,
}

/// Running launcher instances, ordered by tag.
#[must_use]
pub fn list_instances(launcher: &Launcher) -> Vec<InstanceInfo> {
    launcher
        .instances()
        .into_iter()
        .map(|(tag, instance_id)| InstanceInfo { tag, instance_id })
        .collect()
}

/// Scheduler snapshot rendered as JSON.
///
/// # Errors
///
/// Serialization failures from `serde_json`.
pub fn scheduler_snapshot_json(scheduler: &Scheduler) -> Result<String, serde_json::Error> {
    serde_json::to_string(&scheduler.snapshot())
}
