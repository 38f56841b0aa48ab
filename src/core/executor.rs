//! Thread-per-record executor.
//!
//! [`ThreadExecutor::execute`] runs a record's task in a [`ThreadedTask`] and
//! bridges the wrapper's events, through the owning [`EventLoop`], into record
//! level events:
//!
//! | wrapper event             | executor event                            |
//! |---------------------------|-------------------------------------------|
//! | `threaded_task_started`   | `record_started`                          |
//! | `threaded_task_completed` | `record_completed` (then the thread stops)|
//! | `task_stopped`            | `record_stopped`, then `record_processed` |
//!
//! `record_processed` marks the moment the record's slot may be reused.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::error::SchedulerError;
use crate::core::event_loop::{EventLoop, LoopCallbacks};
use crate::core::record::{ScheduledTaskResult, SharedRecord};
use crate::core::signal::{Emitter, Payload, Signal, SignalSet, SignalSource, SubscriptionId};
use crate::core::task::{Task, TaskResult, TASK_STOPPED};
use crate::core::thread::{ThreadedTask, THREADED_TASK_COMPLETED, THREADED_TASK_STARTED};

/// The record's thread began running its task.
pub static RECORD_STARTED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<SharedRecord>("record_started"));
/// The record's task returned.
pub static RECORD_COMPLETED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<ScheduledTaskResult>("record_completed"));
/// The record's thread was joined.
pub static RECORD_STOPPED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<SharedRecord>("record_stopped"));
/// The record left the executor; its slot is free.
pub static RECORD_PROCESSED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<SharedRecord>("record_processed"));

/// Signals of [`ThreadExecutor`].
pub static EXECUTOR_SIGNALS: LazyLock<SignalSet> = LazyLock::new(|| {
    SignalSet::declare(&[
        &*RECORD_STARTED,
        &*RECORD_COMPLETED,
        &*RECORD_STOPPED,
        &*RECORD_PROCESSED,
    ])
});

struct Running {
    record: SharedRecord,
    threaded: Arc<ThreadedTask>,
    subscriptions: Vec<(&'static Signal, SubscriptionId)>,
}

/// Runs schedule records on dedicated threads.
pub struct ThreadExecutor {
    callbacks: LoopCallbacks,
    running: Mutex<HashMap<Uuid, Running>>,
    emitter: Emitter,
    thread_name: String,
    join_timeout: Option<Duration>,
}

impl ThreadExecutor {
    /// Executor bridging events through `event_loop`.
    #[must_use]
    pub fn new(event_loop: Arc<EventLoop>) -> Self {
        Self {
            callbacks: LoopCallbacks::new(event_loop),
            running: Mutex::new(HashMap::new()),
            emitter: Emitter::new("thread_executor", &EXECUTOR_SIGNALS),
            thread_name: "scheduled-task".to_string(),
            join_timeout: None,
        }
    }

    /// Prefix of record thread names.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Bound the join when a record thread is stopped.
    #[must_use]
    pub const fn with_join_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Start `record` on its own thread.
    ///
    /// # Errors
    ///
    /// Fails if the thread cannot be spawned; the record is not tracked then.
    pub fn execute(self: &Arc<Self>, record: SharedRecord) -> Result<(), SchedulerError> {
        let id = record.id();
        let threaded = Arc::new(
            ThreadedTask::new(Arc::clone(record.task()))
                .with_thread_name(format!("{}-{}", self.thread_name, id.simple()))
                .with_join_timeout(self.join_timeout),
        );
        let subscriptions = self.bridge(&record, &threaded)?;
        self.running.lock().insert(
            id,
            Running {
                record: Arc::clone(&record),
                threaded: Arc::clone(&threaded),
                subscriptions,
            },
        );

        if let Err(e) = threaded.start() {
            if let Some(running) = self.running.lock().remove(&id) {
                self.release(&running);
            }
            warn!(record_id = %id, error = %e, "unable to start record thread");
            return Err(SchedulerError::from_task_control(e));
        }
        info!(record_id = %id, group_id = ?record.group_id(), "record executing");
        Ok(())
    }

    fn bridge(
        self: &Arc<Self>,
        record: &SharedRecord,
        threaded: &Arc<ThreadedTask>,
    ) -> Result<Vec<(&'static Signal, SubscriptionId)>, SchedulerError> {
        let emitter = threaded.emitter();
        let mut subscriptions = Vec::with_capacity(3);

        let executor = Arc::downgrade(self);
        let rec = Arc::clone(record);
        subscriptions.push((
            &*THREADED_TASK_STARTED,
            self.callbacks.register(emitter, &THREADED_TASK_STARTED, move |_| {
                if let Some(executor) = executor.upgrade() {
                    executor.emitter.emit(&RECORD_STARTED, Payload::new(Arc::clone(&rec)))?;
                }
                Ok(())
            })?,
        ));

        let executor = Arc::downgrade(self);
        let rec = Arc::clone(record);
        let thread = Arc::downgrade(threaded);
        subscriptions.push((
            &*THREADED_TASK_COMPLETED,
            self.callbacks.register(emitter, &THREADED_TASK_COMPLETED, move |event| {
                let result = event
                    .value::<TaskResult>()
                    .cloned()
                    .unwrap_or(TaskResult::Value(Payload::none()));
                Self::on_completed(&executor, &thread, Arc::clone(&rec), result)
            })?,
        ));

        let executor = Arc::downgrade(self);
        let id = record.id();
        subscriptions.push((
            &*TASK_STOPPED,
            self.callbacks.register(emitter, &TASK_STOPPED, move |_| {
                if let Some(executor) = executor.upgrade() {
                    executor.on_stopped(id)?;
                }
                Ok(())
            })?,
        ));

        Ok(subscriptions)
    }

    fn on_completed(
        executor: &Weak<Self>,
        thread: &Weak<ThreadedTask>,
        record: SharedRecord,
        result: TaskResult,
    ) -> anyhow::Result<()> {
        let Some(executor) = executor.upgrade() else {
            return Ok(());
        };
        let id = record.id();
        debug!(record_id = %id, ok = result.is_ok(), "record completed");
        executor.emitter.emit(
            &RECORD_COMPLETED,
            Payload::new(ScheduledTaskResult { record, result }),
        )?;
        if let Some(thread) = thread.upgrade() {
            if thread.is_active() {
                if let Err(e) = thread.stop() {
                    // No task_stopped will follow; free the slot here.
                    warn!(record_id = %id, error = %e, "completed record did not stop cleanly");
                    executor.on_stopped(id)?;
                }
            }
        }
        Ok(())
    }

    fn on_stopped(&self, id: Uuid) -> anyhow::Result<()> {
        let Some(running) = self.running.lock().remove(&id) else {
            return Ok(());
        };
        self.release(&running);
        let record = Payload::new(Arc::clone(&running.record));
        self.emitter.emit(&RECORD_STOPPED, record.clone())?;
        self.emitter.emit(&RECORD_PROCESSED, record)?;
        Ok(())
    }

    fn release(&self, running: &Running) {
        let emitter = running.threaded.emitter();
        for (signal, subscription) in &running.subscriptions {
            if let Err(e) = self.callbacks.unregister(emitter, signal, *subscription) {
                warn!(record_id = %running.record.id(), error = %e, "stale record subscription");
            }
        }
    }

    /// Force-stop a running record. Only valid while the event loop is
    /// paused, so no completion callback can race with it. No
    /// `record_processed` event follows.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::LoopRunning`], [`SchedulerError::NoSuchRecord`], or
    /// the join timeout of a frozen thread.
    pub fn stop_record(&self, record_id: Uuid) -> Result<SharedRecord, SchedulerError> {
        if self.callbacks.event_loop().is_running() {
            return Err(SchedulerError::LoopRunning);
        }
        let running = self
            .running
            .lock()
            .remove(&record_id)
            .ok_or(SchedulerError::NoSuchRecord(record_id))?;
        self.release(&running);
        if running.threaded.is_active() {
            running
                .threaded
                .stop()
                .map_err(SchedulerError::from_task_control)?;
        }
        info!(record_id = %record_id, "record force-stopped");
        Ok(running.record)
    }

    /// Records currently executing.
    #[must_use]
    pub fn running_records(&self) -> Vec<SharedRecord> {
        self.running
            .lock()
            .values()
            .map(|r| Arc::clone(&r.record))
            .collect()
    }

    /// Number of executing records in `group_id`.
    #[must_use]
    pub fn running_in_group(&self, group_id: &str) -> usize {
        self.running
            .lock()
            .values()
            .filter(|r| r.record.group_id() == Some(group_id))
            .count()
    }

    /// Number of executing records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.running.lock().len()
    }

    /// True if nothing executes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.running.lock().is_empty()
    }
}

impl SignalSource for ThreadExecutor {
    fn emitter(&self) -> &Emitter {
        &self.emitter
    }
}

impl fmt::Debug for ThreadExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadExecutor")
            .field("running", &self.len())
            .field("thread_name", &self.thread_name)
            .finish_non_exhaustive()
    }
}
