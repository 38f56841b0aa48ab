//! Schedule records: one request to run a task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::task::{Task, TaskResult};
use crate::util::clock::now_secs;

/// What happens to a record that cannot run right away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostponePolicy {
    /// Queue it; dequeued FIFO later.
    #[default]
    Wait,
    /// Report it dropped; never queued.
    Drop,
    /// Keep the oldest queued record of the group, drop newcomers.
    KeepFirst,
    /// Keep only the newest queued record of the group.
    KeepLast,
}

impl fmt::Display for PostponePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Wait => "wait",
            Self::Drop => "drop",
            Self::KeepFirst => "keep_first",
            Self::KeepLast => "keep_last",
        })
    }
}

/// An immutable request to run one task under group, TTL and policy rules.
///
/// ```rust,ignore
/// let record = ScheduleRecord::new(task)
///     .with_group_id("reports")
///     .with_simultaneous_policy(1)
///     .with_postpone_policy(PostponePolicy::KeepLast)
///     .into_shared();
/// ```
#[derive(Clone)]
pub struct ScheduleRecord {
    id: Uuid,
    task: Arc<dyn Task>,
    group_id: Option<String>,
    ttl: Option<f64>,
    simultaneous_policy: usize,
    postpone_policy: PostponePolicy,
}

/// Records are shared between the scheduler, its queue and event payloads.
pub type SharedRecord = Arc<ScheduleRecord>;

impl ScheduleRecord {
    /// Ungrouped record without TTL, unlimited simultaneity, `wait` policy.
    #[must_use]
    pub fn new(task: Arc<dyn Task>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            group_id: None,
            ttl: None,
            simultaneous_policy: 0,
            postpone_policy: PostponePolicy::Wait,
        }
    }

    /// Set the group id.
    #[must_use]
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Expire at an absolute epoch timestamp (seconds).
    #[must_use]
    pub const fn with_ttl(mut self, ttl: f64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Expire `after` from now.
    #[must_use]
    pub fn with_ttl_in(self, after: Duration) -> Self {
        self.with_ttl(now_secs() + after.as_secs_f64())
    }

    /// Maximum number of concurrently running records of the group; 0 means
    /// unlimited.
    #[must_use]
    pub const fn with_simultaneous_policy(mut self, limit: usize) -> Self {
        self.simultaneous_policy = limit;
        self
    }

    /// Set the postpone policy.
    #[must_use]
    pub const fn with_postpone_policy(mut self, policy: PostponePolicy) -> Self {
        self.postpone_policy = policy;
        self
    }

    /// Freeze into a shared record.
    #[must_use]
    pub fn into_shared(self) -> SharedRecord {
        Arc::new(self)
    }

    /// Record id, fresh per record.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Task to run.
    #[must_use]
    pub const fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }

    /// Group id.
    #[must_use]
    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    /// Expiry timestamp.
    #[must_use]
    pub const fn ttl(&self) -> Option<f64> {
        self.ttl
    }

    /// Simultaneous-run limit (0 = unlimited).
    #[must_use]
    pub const fn simultaneous_policy(&self) -> usize {
        self.simultaneous_policy
    }

    /// Postpone policy.
    #[must_use]
    pub const fn postpone_policy(&self) -> PostponePolicy {
        self.postpone_policy
    }

    /// True if the TTL passed at `now` (epoch seconds).
    #[must_use]
    pub fn is_expired_at(&self, now: f64) -> bool {
        self.ttl.is_some_and(|ttl| ttl < now)
    }

    /// True if the TTL passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_secs())
    }
}

impl PartialEq for ScheduleRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ScheduleRecord {}

impl fmt::Debug for ScheduleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleRecord")
            .field("id", &self.id)
            .field("group_id", &self.group_id)
            .field("ttl", &self.ttl)
            .field("simultaneous_policy", &self.simultaneous_policy)
            .field("postpone_policy", &self.postpone_policy)
            .finish_non_exhaustive()
    }
}

/// Serializable view of a record for snapshots and ops tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordInfo {
    /// Record id.
    pub record_id: Uuid,
    /// Group id.
    pub group_id: Option<String>,
    /// Expiry timestamp (epoch seconds).
    pub ttl: Option<f64>,
    /// Simultaneous-run limit (0 = unlimited).
    pub simultaneous_policy: usize,
    /// Postpone policy.
    pub postpone_policy: PostponePolicy,
}

impl From<&ScheduleRecord> for RecordInfo {
    fn from(record: &ScheduleRecord) -> Self {
        Self {
            record_id: record.id,
            group_id: record.group_id.clone(),
            ttl: record.ttl,
            simultaneous_policy: record.simultaneous_policy,
            postpone_policy: record.postpone_policy,
        }
    }
}

/// Completion payload of a scheduled record.
#[derive(Debug, Clone)]
pub struct ScheduledTaskResult {
    /// The record that ran.
    pub record: SharedRecord,
    /// What its task returned.
    pub result: TaskResult,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signal::Payload;
    use crate::core::task::FnTask;

    fn record() -> ScheduleRecord {
        ScheduleRecord::new(Arc::new(FnTask::new(|| Ok(Payload::none()))))
    }

    #[test]
    fn test_defaults() {
        let r = record();
        assert_eq!(r.group_id(), None);
        assert_eq!(r.simultaneous_policy(), 0);
        assert_eq!(r.postpone_policy(), PostponePolicy::Wait);
        assert!(!r.is_expired());
    }

    #[test]
    fn test_expiry() {
        let r = record().with_ttl(100.0);
        assert!(r.is_expired_at(100.5));
        assert!(!r.is_expired_at(99.0));
        assert!(!record().with_ttl_in(Duration::from_secs(60)).is_expired());
    }

    #[test]
    fn test_policy_serde_names() {
        assert_eq!(
            serde_json::to_string(&PostponePolicy::KeepLast).unwrap(),
            "\"keep_last\""
        );
        assert_eq!(PostponePolicy::KeepFirst.to_string(), "keep_first");
    }
}
