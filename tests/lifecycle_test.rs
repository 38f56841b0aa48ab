//! Integration tests for the task lifecycle state machine
//!
//! - blocking bodies complete inside `start`
//! - detachable bodies complete through their handle
//! - concurrent control calls fail fast with a busy error
//! - every transition is reported on the bus

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use prometheus_orchestrator::core::{
    is_capable, Capability, CapabilitySet, CompletionHandle, DetachableTask, Event, FnTask,
    InMemoryAuditSink, Payload, SignalSource, StatefulTask, Task, TaskError, TaskFailure,
    TaskResult, TaskState,
};

/// Detachable body that parks its completion handle for the test to use.
#[derive(Default)]
struct Download {
    handle: Mutex<Option<CompletionHandle>>,
}

impl DetachableTask for Download {
    fn begin(&self, completion: CompletionHandle) -> anyhow::Result<()> {
        *self.handle.lock() = Some(completion);
        Ok(())
    }

    fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn terminate(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::ALL
    }
}

/// Blocking body that signals entry, then waits for release.
struct Slow {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl Task for Slow {
    fn start(&self) -> anyhow::Result<Payload> {
        let _ = self.entered.send(());
        self.release
            .recv_timeout(Duration::from_secs(10))
            .map_err(|_| anyhow!("never released"))?;
        Ok(Payload::none())
    }

    fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::STOP
    }
}

fn audited(task: &StatefulTask) -> Arc<InMemoryAuditSink> {
    let sink = Arc::new(InMemoryAuditSink::new(64));
    prometheus_orchestrator::core::watch(task.emitter(), &sink).unwrap();
    sink
}

#[test]
fn test_blocking_cycle_reports_every_transition() {
    let body = Arc::new(FnTask::new(|| Ok(Payload::new(1_u8))));
    let task = StatefulTask::blocking(body);
    let sink = audited(&task);

    task.start().unwrap();
    assert_eq!(task.task_state(), TaskState::Completed);
    assert_eq!(sink.signals(), vec!["task_started", "task_completed"]);

    // FnTask declares no stop capability.
    let err = task.stop().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TaskError>(),
        Some(TaskError::NotCapable(Capability::Stop))
    ));
    assert_eq!(task.task_state(), TaskState::Completed);
}

#[test]
fn test_blocking_failure_reaches_caller_and_event() {
    let task = StatefulTask::blocking(Arc::new(FnTask::new(|| Err(anyhow!("bad input")))));
    let results = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&results);
    task.emitter()
        .subscribe_strong(&prometheus_orchestrator::core::TASK_COMPLETED, move |e: &Event| {
            seen.lock().push(e.value::<TaskResult>().cloned());
        })
        .unwrap();

    let err = task.start().unwrap_err();
    assert_eq!(err.to_string(), "bad input");
    assert!(err.downcast_ref::<TaskFailure>().is_some());

    let results = results.lock();
    let failure = results[0].as_ref().and_then(TaskResult::failure).unwrap();
    assert_eq!(failure.to_string(), "bad input");
}

#[test]
fn test_detachable_completes_later() {
    let body = Arc::new(Download::default());
    let task = StatefulTask::detachable(Arc::clone(&body) as Arc<dyn DetachableTask>);
    let sink = audited(&task);
    assert!(task.is_detachable());

    let value = task.start().unwrap();
    assert!(value.is_none());
    assert_eq!(task.task_state(), TaskState::Started);

    let handle = body.handle.lock().clone().unwrap();
    assert!(handle.complete(TaskResult::Value(Payload::new(5_i64))));
    assert_eq!(task.task_state(), TaskState::Completed);
    assert!(!handle.complete(TaskResult::Value(Payload::none())), "completes once");

    task.terminate().unwrap();
    assert_eq!(task.task_state(), TaskState::Terminated);
    assert_eq!(
        sink.signals(),
        vec!["task_started", "task_completed", "task_terminated"]
    );
}

#[test]
fn test_lifecycle_is_reusable() {
    let body = Arc::new(Download::default());
    let task = StatefulTask::detachable(Arc::clone(&body) as Arc<dyn DetachableTask>);
    for _ in 0..2 {
        task.start().unwrap();
        task.stop().unwrap();
        assert_eq!(task.task_state(), TaskState::Stopped);
    }
    assert!(is_capable(&task, Capability::Terminate));
}

#[test]
fn test_concurrent_control_call_is_busy() {
    let (entered_tx, entered) = bounded(1);
    let (release, release_rx) = bounded(1);
    let task = Arc::new(StatefulTask::blocking(Arc::new(Slow {
        entered: entered_tx,
        release: release_rx,
    })));

    let runner = Arc::clone(&task);
    let first = thread::spawn(move || runner.start());
    entered.recv_timeout(Duration::from_secs(10)).unwrap();

    for attempt in [task.start().map(|_| ()), task.stop(), task.terminate()] {
        let err = attempt.unwrap_err();
        assert!(
            matches!(err.downcast_ref::<TaskError>(), Some(TaskError::Busy { .. })),
            "unexpected error: {err}"
        );
    }

    release.send(()).unwrap();
    assert!(first.join().unwrap().is_ok(), "first call is unaffected");
    assert_eq!(task.task_state(), TaskState::Completed);
    task.stop().unwrap();
    assert_eq!(task.task_state(), TaskState::Stopped);
}

#[test]
fn test_completion_after_task_dropped_is_ignored() {
    let body = Arc::new(Download::default());
    let task = StatefulTask::detachable(Arc::clone(&body) as Arc<dyn DetachableTask>);
    task.start().unwrap();
    drop(task);
    let handle = body.handle.lock().clone().unwrap();
    assert!(!handle.complete(TaskResult::Value(Payload::none())));
}
