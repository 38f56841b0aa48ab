//! Run a task's blocking `start` on a dedicated thread.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::capability::{is_capable, Capability, CapabilitySet};
use crate::core::error::TaskError;
use crate::core::signal::{Emitter, Payload, Signal, SignalSet, SignalSource};
use crate::core::task::{
    Task, TaskFailure, TaskResult, TaskState, TASK_COMPLETED, TASK_SIGNALS, TASK_STARTED,
    TASK_STOPPED,
};

/// The worker thread began running the inner task.
pub static THREADED_TASK_STARTED: LazyLock<Signal> =
    LazyLock::new(|| Signal::unit("threaded_task_started"));
/// The inner task returned; carries its [`TaskResult`].
pub static THREADED_TASK_COMPLETED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<TaskResult>("threaded_task_completed"));
/// The worker thread did not exit within the join timeout.
pub static THREADED_TASK_FROZE: LazyLock<Signal> =
    LazyLock::new(|| Signal::unit("threaded_task_froze"));

/// Signals of [`ThreadedTask`].
pub static THREADED_TASK_SIGNALS: LazyLock<SignalSet> = LazyLock::new(|| {
    SignalSet::inherit(
        &TASK_SIGNALS,
        &[
            &*THREADED_TASK_STARTED,
            &*THREADED_TASK_COMPLETED,
            &*THREADED_TASK_FROZE,
        ],
    )
});

struct Worker {
    handle: JoinHandle<()>,
    // Disconnects when the thread body returns.
    done: Receiver<()>,
    // Set once the inner `start` has returned.
    returned: Arc<AtomicBool>,
}

struct Shared {
    emitter: Emitter,
    state: Mutex<TaskState>,
    last_result: Mutex<Option<TaskResult>>,
}

impl Shared {
    fn emit(&self, signal: &'static Signal, payload: Payload) {
        if let Err(e) = self.emitter.emit(signal, payload) {
            error!(source = %self.emitter.source_id(), signal = signal.name(), error = %e, "failed to emit");
        }
    }

    fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }
}

/// Wrapper that runs the inner task on its own thread.
///
/// Callbacks subscribed synchronously run on the worker thread (for the
/// `threaded_task_*` and completion events) and must not call `start`/`stop`
/// on the same wrapper.
pub struct ThreadedTask {
    task: Arc<dyn Task>,
    thread_name: String,
    join_timeout: Option<Duration>,
    worker: Mutex<Option<Worker>>,
    shared: Arc<Shared>,
}

impl ThreadedTask {
    /// Wrap `task`. Without a join timeout `stop` waits indefinitely.
    #[must_use]
    pub fn new(task: Arc<dyn Task>) -> Self {
        Self {
            task,
            thread_name: "threaded-task".to_string(),
            join_timeout: None,
            worker: Mutex::new(None),
            shared: Arc::new(Shared {
                emitter: Emitter::new("threaded_task", &THREADED_TASK_SIGNALS),
                state: Mutex::new(TaskState::Stopped),
                last_result: Mutex::new(None),
            }),
        }
    }

    /// Set the worker thread name.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Bound the join in `stop`.
    #[must_use]
    pub const fn with_join_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// The wrapped task.
    #[must_use]
    pub const fn inner(&self) -> &Arc<dyn Task> {
        &self.task
    }

    /// Worker thread name.
    #[must_use]
    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// True while a worker thread exists (running or frozen).
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.worker.lock().is_some()
    }

    /// Result of the most recent completed run.
    #[must_use]
    pub fn last_result(&self) -> Option<TaskResult> {
        self.shared.last_result.lock().clone()
    }

    /// Current state.
    #[must_use]
    pub fn task_state(&self) -> TaskState {
        *self.shared.state.lock()
    }

    fn wait_finished(&self, worker: &Worker) -> bool {
        match self.join_timeout {
            Some(timeout) => !matches!(
                worker.done.recv_timeout(timeout),
                Err(RecvTimeoutError::Timeout)
            ),
            None => {
                let _ = worker.done.recv();
                true
            }
        }
    }
}

impl Task for ThreadedTask {
    fn start(&self) -> anyhow::Result<Payload> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(TaskError::Started(format!("thread `{}`", self.thread_name)).into());
        }

        self.shared.set_state(TaskState::Started);
        self.shared.emit(&TASK_STARTED, Payload::none());

        let (done_tx, done) = bounded::<()>(0);
        let task = Arc::clone(&self.task);
        let shared = Arc::clone(&self.shared);
        let returned = Arc::new(AtomicBool::new(false));
        let body_returned = Arc::clone(&returned);
        let handle = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                let _done = done_tx;
                shared.emit(&THREADED_TASK_STARTED, Payload::none());
                let result = match panic::catch_unwind(AssertUnwindSafe(|| task.start())) {
                    Ok(outcome) => TaskResult::from_outcome(outcome),
                    Err(p) => TaskResult::Failed(TaskFailure::from_panic(&*p)),
                };
                body_returned.store(true, Ordering::Release);
                if let TaskResult::Failed(failure) = &result {
                    warn!(error = %failure, "threaded task failed");
                }
                *shared.last_result.lock() = Some(result.clone());
                shared.emit(&THREADED_TASK_COMPLETED, Payload::new(result.clone()));
                shared.set_state(TaskState::Completed);
                shared.emit(&TASK_COMPLETED, Payload::new(result));
            })
            .map_err(|e| {
                self.shared.set_state(TaskState::Stopped);
                TaskError::Spawn(e.to_string())
            })?;

        debug!(thread = %self.thread_name, "worker thread spawned");
        *worker = Some(Worker {
            handle,
            done,
            returned,
        });
        Ok(Payload::none())
    }

    fn stop(&self) -> anyhow::Result<()> {
        let mut guard = self.worker.lock();
        let Some(worker) = guard.as_ref() else {
            return Err(TaskError::Stopped(format!("thread `{}` is not running", self.thread_name)).into());
        };

        // A finished body has nothing left to cancel.
        if worker.returned.load(Ordering::Acquire) {
            debug!(thread = %self.thread_name, "inner task already returned, joining");
        } else if is_capable(&*self.task, Capability::Stop) {
            self.task.stop()?;
        }

        if !self.wait_finished(worker) {
            let timeout = self.join_timeout.unwrap_or_default();
            warn!(thread = %self.thread_name, ?timeout, "worker thread froze");
            drop(guard);
            self.shared.emit(&THREADED_TASK_FROZE, Payload::none());
            return Err(TaskError::JoiningTimeout {
                thread: self.thread_name.clone(),
                timeout,
            }
            .into());
        }

        if let Some(worker) = guard.take() {
            if worker.handle.join().is_err() {
                error!(thread = %self.thread_name, "worker thread panicked outside the task body");
            }
        }
        drop(guard);

        self.shared.set_state(TaskState::Stopped);
        self.shared.emit(&TASK_STOPPED, Payload::none());
        info!(thread = %self.thread_name, "threaded task stopped");
        Ok(())
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::STOP
    }
}

impl SignalSource for ThreadedTask {
    fn emitter(&self) -> &Emitter {
        &self.shared.emitter
    }
}

impl fmt::Debug for ThreadedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadedTask")
            .field("thread_name", &self.thread_name)
            .field("join_timeout", &self.join_timeout)
            .field("state", &self.task_state())
            .finish_non_exhaustive()
    }
}
