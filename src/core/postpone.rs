//! Buffer for records that cannot run yet.
//!
//! Admission refusals are resolved by the record's [`PostponePolicy`], and
//! expired records are weeded out both on arrival and while scanning. Every
//! record that enters leaves exactly once: returned by
//! [`PostponeQueue::next_record`], reported dropped, or reported expired.
//!
//! Reports are events emitted after the internal lock is released, in the
//! order the decisions were made.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::core::error::SchedulerError;
use crate::core::record::{PostponePolicy, ScheduleRecord, SharedRecord};
use crate::core::signal::{Emitter, Payload, Signal, SignalSet, SignalSource};
use crate::util::clock::now_secs;

/// A record was discarded by its postpone policy.
pub static RECORD_DROPPED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<SharedRecord>("record_dropped"));
/// A record was queued.
pub static RECORD_POSTPONED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<SharedRecord>("record_postponed"));
/// A record's TTL passed before it could run.
pub static RECORD_EXPIRED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<SharedRecord>("record_expired"));

/// Signals of [`PostponeQueue`].
pub static POSTPONE_QUEUE_SIGNALS: LazyLock<SignalSet> = LazyLock::new(|| {
    SignalSet::declare(&[&*RECORD_DROPPED, &*RECORD_POSTPONED, &*RECORD_EXPIRED])
});

enum Report {
    Dropped(SharedRecord),
    Postponed(SharedRecord),
    Expired(SharedRecord),
}

/// Ordered, group-aware buffer of postponed records.
pub struct PostponeQueue {
    records: Mutex<VecDeque<SharedRecord>>,
    emitter: Emitter,
}

impl Default for PostponeQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PostponeQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            emitter: Emitter::new("postpone_queue", &POSTPONE_QUEUE_SIGNALS),
        }
    }

    fn report(&self, reports: Vec<Report>) {
        for report in reports {
            let (signal, record) = match report {
                Report::Dropped(r) => {
                    warn!(record_id = %r.id(), group_id = ?r.group_id(), "record dropped");
                    (&*RECORD_DROPPED, r)
                }
                Report::Postponed(r) => {
                    debug!(record_id = %r.id(), group_id = ?r.group_id(), "record postponed");
                    (&*RECORD_POSTPONED, r)
                }
                Report::Expired(r) => {
                    warn!(record_id = %r.id(), group_id = ?r.group_id(), "record expired");
                    (&*RECORD_EXPIRED, r)
                }
            };
            if let Err(e) = self.emitter.emit(signal, Payload::new(record)) {
                error!(signal = signal.name(), error = %e, "failed to report record");
            }
        }
    }

    /// Apply `record`'s postpone policy.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::PostponePolicyMismatch`] if a queued record of the
    /// same group uses a different policy. Nothing is changed in that case.
    pub fn postpone(&self, record: SharedRecord) -> Result<(), SchedulerError> {
        let reports = {
            let mut records = self.records.lock();
            Self::decide(&mut records, record)?
        };
        self.report(reports);
        Ok(())
    }

    fn decide(
        records: &mut VecDeque<SharedRecord>,
        record: SharedRecord,
    ) -> Result<Vec<Report>, SchedulerError> {
        let policy = record.postpone_policy();
        if policy == PostponePolicy::Drop {
            return Ok(vec![Report::Dropped(record)]);
        }
        if record.is_expired() {
            return Ok(vec![Report::Expired(record)]);
        }

        let Some(group_id) = record.group_id().map(str::to_string) else {
            records.push_back(Arc::clone(&record));
            return Ok(vec![Report::Postponed(record)]);
        };

        let same_group = |r: &SharedRecord| r.group_id() == Some(group_id.as_str());
        if let Some(queued) = records
            .iter()
            .find(|r| same_group(*r) && r.postpone_policy() != policy)
        {
            error!(
                group_id = %group_id,
                queued = %queued.postpone_policy(),
                incoming = %policy,
                "postpone policies of a group disagree"
            );
            return Err(SchedulerError::PostponePolicyMismatch {
                group_id,
                queued: queued.postpone_policy().to_string(),
                incoming: policy.to_string(),
            });
        }

        let mut reports = Vec::new();
        match policy {
            PostponePolicy::KeepLast => {
                let (dropped, kept): (VecDeque<_>, VecDeque<_>) =
                    records.drain(..).partition(|r| same_group(r));
                *records = kept;
                reports.extend(dropped.into_iter().map(Report::Dropped));
                records.push_back(Arc::clone(&record));
                reports.push(Report::Postponed(record));
            }
            PostponePolicy::KeepFirst if records.iter().any(|r| same_group(r)) => {
                reports.push(Report::Dropped(record));
            }
            _ => {
                records.push_back(Arc::clone(&record));
                reports.push(Report::Postponed(record));
            }
        }
        Ok(reports)
    }

    /// Remove and return the oldest record passing `filter`. Expired records
    /// met on the way are removed and reported.
    pub fn next_record<F>(&self, mut filter: F) -> Option<SharedRecord>
    where
        F: FnMut(&ScheduleRecord) -> bool,
    {
        let now = now_secs();
        let mut reports = Vec::new();
        let found = {
            let mut records = self.records.lock();
            let mut index = 0;
            let mut found = None;
            while index < records.len() {
                if records[index].is_expired_at(now) {
                    if let Some(expired) = records.remove(index) {
                        reports.push(Report::Expired(expired));
                    }
                    continue;
                }
                if filter(&*records[index]) {
                    found = records.remove(index);
                    break;
                }
                index += 1;
            }
            found
        };
        self.report(reports);
        found
    }

    /// Number of queued records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Snapshot of the queued records, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<SharedRecord> {
        self.records.lock().iter().cloned().collect()
    }
}

impl SignalSource for PostponeQueue {
    fn emitter(&self) -> &Emitter {
        &self.emitter
    }
}

impl fmt::Debug for PostponeQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostponeQueue")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::FnTask;

    fn record(group: Option<&str>, policy: PostponePolicy) -> SharedRecord {
        let mut r = ScheduleRecord::new(Arc::new(FnTask::new(|| Ok(Payload::none()))))
            .with_postpone_policy(policy);
        if let Some(group) = group {
            r = r.with_group_id(group);
        }
        r.into_shared()
    }

    #[test]
    fn test_wait_is_fifo() {
        let queue = PostponeQueue::new();
        let a = record(None, PostponePolicy::Wait);
        let b = record(None, PostponePolicy::Wait);
        queue.postpone(Arc::clone(&a)).unwrap();
        queue.postpone(Arc::clone(&b)).unwrap();
        assert_eq!(queue.next_record(|_| true).unwrap().id(), a.id());
        assert_eq!(queue.next_record(|_| true).unwrap().id(), b.id());
        assert!(queue.next_record(|_| true).is_none());
    }

    #[test]
    fn test_filter_skips_without_removing() {
        let queue = PostponeQueue::new();
        let a = record(Some("x"), PostponePolicy::Wait);
        let b = record(Some("y"), PostponePolicy::Wait);
        queue.postpone(Arc::clone(&a)).unwrap();
        queue.postpone(Arc::clone(&b)).unwrap();
        let next = queue.next_record(|r| r.group_id() == Some("y")).unwrap();
        assert_eq!(next.id(), b.id());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_policy_mismatch_is_fatal() {
        let queue = PostponeQueue::new();
        queue.postpone(record(Some("g"), PostponePolicy::Wait)).unwrap();
        let err = queue
            .postpone(record(Some("g"), PostponePolicy::KeepLast))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "group `g` mixes postpone policies (wait queued, keep_last incoming)"
        );
        assert_eq!(queue.len(), 1);
    }
}
