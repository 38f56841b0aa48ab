//! Audit sinks: record bus events for monitoring and tests.
//!
//! A sink is attached to an emitter with [`watch`], which subscribes it to
//! every signal the emitter declares.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::info;
use uuid::Uuid;

use crate::core::error::BusError;
use crate::core::record::{ScheduledTaskResult, SharedRecord};
use crate::core::signal::{Callback, Emitter, Event, SubscriptionId};
use crate::core::task::TaskResult;
use crate::util::clock::now_ms;

/// Audit event structure.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: Uuid,
    /// Emitting object.
    pub source: String,
    /// Signal name.
    pub signal: &'static str,
    /// Record the event is about, if any.
    pub record_id: Option<Uuid>,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Failure text for unsuccessful results.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send + Sync {
    /// Record an audit event.
    fn record(&self, event: AuditEvent);
}

/// Build an audit event from a bus event.
#[must_use]
pub fn build_audit_event(event: &Event) -> AuditEvent {
    let (record_id, detail) = if let Some(record) = event.value::<SharedRecord>() {
        (Some(record.id()), None)
    } else if let Some(completed) = event.value::<ScheduledTaskResult>() {
        (
            Some(completed.record.id()),
            completed.result.failure().map(ToString::to_string),
        )
    } else if let Some(result) = event.value::<TaskResult>() {
        (None, result.failure().map(ToString::to_string))
    } else {
        (None, None)
    };
    AuditEvent {
        event_id: Uuid::new_v4(),
        source: event.source.to_string(),
        signal: event.signal.name(),
        record_id,
        created_at_ms: now_ms(),
        detail,
    }
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: Mutex<VecDeque<AuditEvent>>,
    changed: Condvar,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events)),
            changed: Condvar::new(),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Signal names in arrival order.
    #[must_use]
    pub fn signals(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.signal).collect()
    }

    /// Number of stored events of `signal`.
    #[must_use]
    pub fn count(&self, signal: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.signal == signal)
            .count()
    }

    /// Records referenced by events of `signal`, in arrival order.
    #[must_use]
    pub fn records(&self, signal: &str) -> Vec<Uuid> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.signal == signal)
            .filter_map(|e| e.record_id)
            .collect()
    }

    /// Block until at least `count` events of `signal` are stored. Returns
    /// `false` on timeout.
    pub fn wait_for(&self, signal: &str, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        loop {
            if events.iter().filter(|e| e.signal == signal).count() >= count {
                return true;
            }
            if self.changed.wait_until(&mut events, deadline).timed_out() {
                return events.iter().filter(|e| e.signal == signal).count() >= count;
            }
        }
    }

    /// Forget every stored event.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        {
            let mut events = self.events.lock();
            if events.len() >= self.max_events {
                events.pop_front();
            }
            events.push_back(event);
        }
        self.changed.notify_all();
    }
}

impl Callback for InMemoryAuditSink {
    fn on_event(&self, event: &Event) {
        self.record(build_audit_event(event));
    }
}

/// Sink that writes every event to the `tracing` log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        info!(
            source = %event.source,
            signal = event.signal,
            record_id = ?event.record_id,
            detail = ?event.detail,
            "audit"
        );
    }
}

impl Callback for TracingAuditSink {
    fn on_event(&self, event: &Event) {
        self.record(build_audit_event(event));
    }
}

/// Subscribe `sink` (weakly) to every signal `emitter` declares.
///
/// # Errors
///
/// Never for a well-formed emitter; kept for bus misuse.
pub fn watch<S>(emitter: &Emitter, sink: &Arc<S>) -> Result<Vec<SubscriptionId>, BusError>
where
    S: Callback + 'static,
{
    emitter
        .signals()
        .iter()
        .map(|signal| emitter.subscribe(signal, sink))
        .collect()
}
