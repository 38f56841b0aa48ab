//! Task abstraction, results and the lifecycle state machine.
//!
//! A [`Task`] only has to know how to start. Stopping and terminating are
//! optional capabilities (see [`crate::core::capability`]).
//!
//! [`StatefulTask`] wraps a task body with a lifecycle:
//!
//! ```text
//! stopped --start--> started --(completion)--> completed --stop--> stopped
//!                                                      \--terminate--> terminated
//! ```
//!
//! Two body variants exist. A blocking body ([`TaskBody::Blocking`]) runs to
//! completion inside `start`, so `start` returns the final result or
//! re-raises the failure. A detachable body ([`DetachableTask`]) only begins
//! its work in `start`; completion is reported later through the
//! [`CompletionHandle`] it receives.
//!
//! One non-blocking control lock guards `start`, `stop` and `terminate`: a
//! second concurrent control call fails at once with [`TaskError::Busy`].

use std::fmt;
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::core::capability::{Capability, CapabilitySet};
use crate::core::error::TaskError;
use crate::core::event_loop::panic_message;
use crate::core::signal::{Emitter, Payload, Signal, SignalSet, SignalSource};

/// A controllable unit of work.
pub trait Task: Send + Sync + 'static {
    /// Run (or begin) the work.
    ///
    /// # Errors
    ///
    /// Any failure of the task body.
    fn start(&self) -> anyhow::Result<Payload>;

    /// Gracefully stop. Only meaningful if [`Capability::Stop`] is declared.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotCapable`] unless overridden.
    fn stop(&self) -> anyhow::Result<()> {
        Err(TaskError::NotCapable(Capability::Stop).into())
    }

    /// Stop at all costs. Only meaningful if [`Capability::Terminate`] is
    /// declared.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotCapable`] unless overridden.
    fn terminate(&self) -> anyhow::Result<()> {
        Err(TaskError::NotCapable(Capability::Terminate).into())
    }

    /// Optional operations this type really implements.
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::EMPTY
    }
}

/// A captured task failure, shareable between event subscribers.
#[derive(Clone)]
pub struct TaskFailure(Arc<anyhow::Error>);

impl TaskFailure {
    /// Capture an error.
    #[must_use]
    pub fn new(error: anyhow::Error) -> Self {
        Self(Arc::new(error))
    }

    /// Capture a panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        Self::new(anyhow::anyhow!("task panicked: {}", panic_message(payload)))
    }

    /// The captured error.
    #[must_use]
    pub fn error(&self) -> &anyhow::Error {
        &self.0
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskFailure({:#})", self.0)
    }
}

impl std::error::Error for TaskFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Outcome of one task run, produced once at completion.
#[derive(Debug, Clone)]
pub enum TaskResult {
    /// The task returned a value.
    Value(Payload),
    /// The task failed or panicked.
    Failed(TaskFailure),
}

impl TaskResult {
    /// Capture a start outcome.
    #[must_use]
    pub fn from_outcome(outcome: anyhow::Result<Payload>) -> Self {
        match outcome {
            Ok(value) => Self::Value(value),
            Err(e) => Self::Failed(TaskFailure::new(e)),
        }
    }

    /// True for [`TaskResult::Value`].
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Value(_))
    }

    /// The returned value, if any.
    #[must_use]
    pub const fn value(&self) -> Option<&Payload> {
        match self {
            Self::Value(v) => Some(v),
            Self::Failed(_) => None,
        }
    }

    /// The failure, if any.
    #[must_use]
    pub const fn failure(&self) -> Option<&TaskFailure> {
        match self {
            Self::Value(_) => None,
            Self::Failed(f) => Some(f),
        }
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Initial state, and the state after `stop`.
    #[default]
    Stopped,
    /// Work is in progress.
    Started,
    /// Work finished (successfully or not).
    Completed,
    /// The task was terminated.
    Terminated,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stopped => "stopped",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
        })
    }
}

/// Emitted when a task enters [`TaskState::Started`].
pub static TASK_STARTED: LazyLock<Signal> = LazyLock::new(|| Signal::unit("task_started"));
/// Emitted with the [`TaskResult`] when a task completes.
pub static TASK_COMPLETED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<TaskResult>("task_completed"));
/// Emitted when a task is stopped.
pub static TASK_STOPPED: LazyLock<Signal> = LazyLock::new(|| Signal::unit("task_stopped"));
/// Emitted when a task is terminated.
pub static TASK_TERMINATED: LazyLock<Signal> = LazyLock::new(|| Signal::unit("task_terminated"));

/// Lifecycle signals shared by every stateful task type.
pub static TASK_SIGNALS: LazyLock<SignalSet> = LazyLock::new(|| {
    SignalSet::declare(&[
        &*TASK_STARTED,
        &*TASK_COMPLETED,
        &*TASK_STOPPED,
        &*TASK_TERMINATED,
    ])
});

/// A task whose `start` only begins asynchronous work.
pub trait DetachableTask: Send + Sync + 'static {
    /// Begin the work; report completion through `completion` later.
    ///
    /// # Errors
    ///
    /// Failure to begin.
    fn begin(&self, completion: CompletionHandle) -> anyhow::Result<()>;

    /// See [`Task::stop`].
    ///
    /// # Errors
    ///
    /// [`TaskError::NotCapable`] unless overridden.
    fn stop(&self) -> anyhow::Result<()> {
        Err(TaskError::NotCapable(Capability::Stop).into())
    }

    /// See [`Task::terminate`].
    ///
    /// # Errors
    ///
    /// [`TaskError::NotCapable`] unless overridden.
    fn terminate(&self) -> anyhow::Result<()> {
        Err(TaskError::NotCapable(Capability::Terminate).into())
    }

    /// See [`Task::capabilities`].
    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::EMPTY
    }
}

/// The two body variants of a [`StatefulTask`].
#[derive(Clone)]
pub enum TaskBody {
    /// `start` returns the final result.
    Blocking(Arc<dyn Task>),
    /// `start` only begins work.
    Detachable(Arc<dyn DetachableTask>),
}

impl TaskBody {
    fn capabilities(&self) -> CapabilitySet {
        match self {
            Self::Blocking(t) => t.capabilities(),
            Self::Detachable(t) => t.capabilities(),
        }
    }

    fn stop(&self) -> anyhow::Result<()> {
        match self {
            Self::Blocking(t) => t.stop(),
            Self::Detachable(t) => t.stop(),
        }
    }

    fn terminate(&self) -> anyhow::Result<()> {
        match self {
            Self::Blocking(t) => t.terminate(),
            Self::Detachable(t) => t.terminate(),
        }
    }
}

struct Lifecycle {
    state: Mutex<TaskState>,
    emitter: Emitter,
}

impl Lifecycle {
    /// Move to `next`, emitting the matching event. Re-entering the current
    /// state is a no-op.
    fn switch(&self, next: TaskState, result: Option<TaskResult>) -> bool {
        {
            let mut state = self.state.lock();
            if *state == next {
                return false;
            }
            debug!(source = %self.emitter.source_id(), from = %*state, to = %next, "task state switch");
            *state = next;
        }
        let emitted = match next {
            TaskState::Started => self.emitter.emit(&TASK_STARTED, Payload::none()),
            TaskState::Completed => self.emitter.emit(
                &TASK_COMPLETED,
                Payload::new(result.unwrap_or(TaskResult::Value(Payload::none()))),
            ),
            TaskState::Stopped => self.emitter.emit(&TASK_STOPPED, Payload::none()),
            TaskState::Terminated => self.emitter.emit(&TASK_TERMINATED, Payload::none()),
        };
        if let Err(e) = emitted {
            error!(source = %self.emitter.source_id(), error = %e, "failed to emit lifecycle event");
        }
        true
    }
}

/// Completion callback handed to a [`DetachableTask`].
#[derive(Clone)]
pub struct CompletionHandle {
    lifecycle: Weak<Lifecycle>,
}

impl CompletionHandle {
    /// Mark the task completed with `result`. Returns `false` if the task is
    /// gone or no longer in the started state.
    pub fn complete(&self, result: TaskResult) -> bool {
        let Some(lifecycle) = self.lifecycle.upgrade() else {
            return false;
        };
        if *lifecycle.state.lock() != TaskState::Started {
            return false;
        }
        lifecycle.switch(TaskState::Completed, Some(result))
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle").finish_non_exhaustive()
    }
}

/// Lifecycle state machine around a task body.
pub struct StatefulTask {
    body: TaskBody,
    control: Mutex<()>,
    lifecycle: Arc<Lifecycle>,
}

impl StatefulTask {
    /// Wrap a body.
    #[must_use]
    pub fn new(body: TaskBody) -> Self {
        Self {
            body,
            control: Mutex::new(()),
            lifecycle: Arc::new(Lifecycle {
                state: Mutex::new(TaskState::Stopped),
                emitter: Emitter::new("stateful_task", &TASK_SIGNALS),
            }),
        }
    }

    /// Wrap a blocking task.
    #[must_use]
    pub fn blocking(task: Arc<dyn Task>) -> Self {
        Self::new(TaskBody::Blocking(task))
    }

    /// Wrap a detachable task.
    #[must_use]
    pub fn detachable(task: Arc<dyn DetachableTask>) -> Self {
        Self::new(TaskBody::Detachable(task))
    }

    /// Current state.
    #[must_use]
    pub fn task_state(&self) -> TaskState {
        *self.lifecycle.state.lock()
    }

    /// True for detachable bodies.
    #[must_use]
    pub const fn is_detachable(&self) -> bool {
        matches!(self.body, TaskBody::Detachable(_))
    }

    fn control(&self, operation: &'static str) -> Result<parking_lot::MutexGuard<'_, ()>, TaskError> {
        self.control
            .try_lock()
            .ok_or(TaskError::Busy { operation })
    }
}

impl Task for StatefulTask {
    fn start(&self) -> anyhow::Result<Payload> {
        let _guard = self.control("start")?;
        self.lifecycle.switch(TaskState::Started, None);
        match &self.body {
            TaskBody::Blocking(task) => match task.start() {
                Ok(value) => {
                    self.lifecycle
                        .switch(TaskState::Completed, Some(TaskResult::Value(value.clone())));
                    Ok(value)
                }
                Err(e) => {
                    let failure = TaskFailure::new(e);
                    self.lifecycle
                        .switch(TaskState::Completed, Some(TaskResult::Failed(failure.clone())));
                    Err(anyhow::Error::new(failure))
                }
            },
            TaskBody::Detachable(task) => {
                task.begin(CompletionHandle {
                    lifecycle: Arc::downgrade(&self.lifecycle),
                })?;
                Ok(Payload::none())
            }
        }
    }

    fn stop(&self) -> anyhow::Result<()> {
        let _guard = self.control("stop")?;
        if !self.body.capabilities().supports(Capability::Stop) {
            return Err(TaskError::NotCapable(Capability::Stop).into());
        }
        self.body.stop()?;
        self.lifecycle.switch(TaskState::Stopped, None);
        Ok(())
    }

    fn terminate(&self) -> anyhow::Result<()> {
        let _guard = self.control("terminate")?;
        if !self.body.capabilities().supports(Capability::Terminate) {
            return Err(TaskError::NotCapable(Capability::Terminate).into());
        }
        self.body.terminate()?;
        self.lifecycle.switch(TaskState::Terminated, None);
        Ok(())
    }

    fn capabilities(&self) -> CapabilitySet {
        self.body.capabilities()
    }
}

impl SignalSource for StatefulTask {
    fn emitter(&self) -> &Emitter {
        &self.lifecycle.emitter
    }
}

/// A task built from a closure. Handy for schedule records and tests.
pub struct FnTask<F> {
    body: F,
}

impl<F> FnTask<F>
where
    F: Fn() -> anyhow::Result<Payload> + Send + Sync + 'static,
{
    /// Wrap `body`.
    pub const fn new(body: F) -> Self {
        Self { body }
    }
}

impl<F> Task for FnTask<F>
where
    F: Fn() -> anyhow::Result<Payload> + Send + Sync + 'static,
{
    fn start(&self) -> anyhow::Result<Payload> {
        (self.body)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn test_blocking_task_completes_within_start() {
        let task = StatefulTask::blocking(Arc::new(FnTask::new(|| Ok(Payload::new(3_i32)))));
        let value = task.start().unwrap();
        assert_eq!(value.get::<i32>(), Some(&3));
        assert_eq!(task.task_state(), TaskState::Completed);
    }

    #[test]
    fn test_blocking_failure_is_reraised() {
        let task = StatefulTask::blocking(Arc::new(FnTask::new(|| Err(anyhow!("broken")))));
        let err = task.start().unwrap_err();
        assert_eq!(err.to_string(), "broken");
        assert!(err.downcast_ref::<TaskFailure>().is_some());
        assert_eq!(task.task_state(), TaskState::Completed);
    }

    #[test]
    fn test_stop_requires_capability() {
        let task = StatefulTask::blocking(Arc::new(FnTask::new(|| Ok(Payload::none()))));
        let err = task.stop().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TaskError>(),
            Some(TaskError::NotCapable(Capability::Stop))
        ));
    }

    #[test]
    fn test_task_result_accessors() {
        let ok = TaskResult::from_outcome(Ok(Payload::new("x")));
        assert!(ok.is_ok());
        assert!(ok.failure().is_none());
        let failed = TaskResult::from_outcome(Err(anyhow!("nope")));
        assert!(!failed.is_ok());
        assert_eq!(failed.failure().map(ToString::to_string).as_deref(), Some("nope"));
    }
}
