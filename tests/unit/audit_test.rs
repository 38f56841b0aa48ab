//! Tests for audit sinks

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;

use prometheus_orchestrator::core::{
    build_audit_event, watch, AuditEvent, AuditSink, Event, FnTask, InMemoryAuditSink, Payload,
    PostponePolicy, PostponeQueue, ScheduleRecord, ScheduledTaskResult, SignalSource, SourceId,
    TaskFailure, TaskResult, TracingAuditSink, RECORD_DROPPED, SCHEDULED_TASK_CRASHED,
    TASK_STOPPED,
};

fn record() -> ScheduleRecord {
    ScheduleRecord::new(Arc::new(FnTask::new(|| Ok(Payload::none()))))
}

#[test]
fn test_audit_event_from_record_payload() {
    let r = record().into_shared();
    let source = SourceId::new("sensor");
    let event = Event {
        source: source.clone(),
        signal: &RECORD_DROPPED,
        payload: Payload::new(Arc::clone(&r)),
    };
    let audit = build_audit_event(&event);
    assert_eq!(audit.signal, "record_dropped");
    assert_eq!(audit.record_id, Some(r.id()));
    assert_eq!(audit.source, source.to_string());
    assert!(audit.source.starts_with("sensor#"));
    assert_eq!(audit.detail, None);
}

#[test]
fn test_audit_event_carries_failure_detail() {
    let r = record().into_shared();
    let event = Event {
        source: SourceId::new("scheduler"),
        signal: &SCHEDULED_TASK_CRASHED,
        payload: Payload::new(ScheduledTaskResult {
            record: Arc::clone(&r),
            result: TaskResult::Failed(TaskFailure::new(anyhow!("disk full"))),
        }),
    };
    let audit = build_audit_event(&event);
    assert_eq!(audit.record_id, Some(r.id()));
    assert_eq!(audit.detail.as_deref(), Some("disk full"));

    let unit = build_audit_event(&Event {
        source: SourceId::new("task"),
        signal: &TASK_STOPPED,
        payload: Payload::none(),
    });
    assert_eq!(unit.record_id, None);
    assert_eq!(unit.detail, None);
}

#[test]
fn test_in_memory_sink_is_bounded() {
    let sink = InMemoryAuditSink::new(2);
    for signal in ["first", "second", "third"] {
        sink.record(AuditEvent {
            event_id: uuid::Uuid::new_v4(),
            source: "sensor".into(),
            signal,
            record_id: None,
            created_at_ms: 0,
            detail: None,
        });
    }
    assert_eq!(sink.signals(), vec!["second", "third"]);
    assert!(!sink.wait_for("first", 1, Duration::from_millis(10)));
    sink.clear();
    assert!(sink.events().is_empty());
}

#[test]
fn test_watch_subscribes_every_declared_signal() {
    let queue = PostponeQueue::new();
    let sink = Arc::new(InMemoryAuditSink::new(16));
    let ids = watch(queue.emitter(), &sink).unwrap();
    assert_eq!(ids.len(), 3);

    let tracing_sink = Arc::new(TracingAuditSink);
    watch(queue.emitter(), &tracing_sink).unwrap();

    queue
        .postpone(record().with_postpone_policy(PostponePolicy::Drop).into_shared())
        .unwrap();
    assert_eq!(sink.signals(), vec!["record_dropped"]);
}
