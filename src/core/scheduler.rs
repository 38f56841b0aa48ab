//! Slot-bounded scheduler.
//!
//! Records arrive from subscribed [`ScheduleSource`]s. Every admission
//! decision, postpone-queue change and slot release happens on the
//! scheduler's own [`EventLoop`], which `start` runs on the calling thread;
//! worker threads only post messages to it. The free-slot counter is the one
//! value shared with other threads, and it never leaves `0..=max_threads`.
//!
//! Admission of an incoming record:
//!
//! 1. if its group already runs `simultaneous_policy` records, postpone it;
//! 2. else take a slot, or postpone it if none is free;
//! 3. else execute it now.
//!
//! When a record finishes, its slot goes to the oldest postponed record that
//! passes the same group check, or is released.
//!
//! Monitoring events: `task_scheduled`, `task_dropped`, `task_postponed`,
//! `task_expired`, `task_started`, `task_completed`, `task_crashed`,
//! `task_stopped`. Task failures are only reported through these events.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::core::capability::CapabilitySet;
use crate::core::counter::BoundedCounter;
use crate::core::error::{BusError, SchedulerError, TaskError};
use crate::core::event_loop::{ErrorHandler, EventLoop, LoopCallbacks};
use crate::core::executor::{
    ThreadExecutor, RECORD_COMPLETED, RECORD_PROCESSED, RECORD_STARTED, RECORD_STOPPED,
};
use crate::core::postpone::{PostponeQueue, RECORD_DROPPED, RECORD_EXPIRED, RECORD_POSTPONED};
use crate::core::record::{RecordInfo, ScheduleRecord, ScheduledTaskResult, SharedRecord};
use crate::core::signal::{Emitter, Event, Payload, Signal, SignalSet, SignalSource, SubscriptionId};
use crate::core::source::{ScheduleSource, TASK_SCHEDULED};
use crate::core::task::Task;

/// A record was refused by its postpone policy, or discarded at shutdown.
pub static SCHEDULED_TASK_DROPPED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<SharedRecord>("task_dropped"));
/// A record was queued until a slot frees.
pub static SCHEDULED_TASK_POSTPONED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<SharedRecord>("task_postponed"));
/// A record's TTL passed before it could run.
pub static SCHEDULED_TASK_EXPIRED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<SharedRecord>("task_expired"));
/// A record's task began running.
pub static SCHEDULED_TASK_STARTED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<SharedRecord>("task_started"));
/// A record's task returned (successfully or not).
pub static SCHEDULED_TASK_COMPLETED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<ScheduledTaskResult>("task_completed"));
/// A record's task failed; follows `task_completed`.
pub static SCHEDULED_TASK_CRASHED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<ScheduledTaskResult>("task_crashed"));
/// A record's thread was stopped.
pub static SCHEDULED_TASK_STOPPED: LazyLock<Signal> =
    LazyLock::new(|| Signal::typed::<SharedRecord>("task_stopped"));

/// Signals of [`Scheduler`].
pub static SCHEDULER_SIGNALS: LazyLock<SignalSet> = LazyLock::new(|| {
    SignalSet::declare(&[
        &*TASK_SCHEDULED,
        &*SCHEDULED_TASK_DROPPED,
        &*SCHEDULED_TASK_POSTPONED,
        &*SCHEDULED_TASK_EXPIRED,
        &*SCHEDULED_TASK_STARTED,
        &*SCHEDULED_TASK_COMPLETED,
        &*SCHEDULED_TASK_CRASHED,
        &*SCHEDULED_TASK_STOPPED,
    ])
});

/// Point-in-time view of a scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    /// Slot budget.
    pub max_threads: usize,
    /// Free slots.
    pub free_slots: usize,
    /// Executing records.
    pub running: Vec<RecordInfo>,
    /// Postponed records, oldest first.
    pub postponed: Vec<RecordInfo>,
}

struct SourceEntry {
    source: Arc<dyn ScheduleSource>,
    subscription: SubscriptionId,
}

struct Inner {
    max_threads: usize,
    lock_timeout: Duration,
    event_loop: Arc<EventLoop>,
    callbacks: LoopCallbacks,
    slots: BoundedCounter,
    executor: Arc<ThreadExecutor>,
    queue: PostponeQueue,
    sources: Mutex<Vec<SourceEntry>>,
    emitter: Arc<Emitter>,
    // Set while leftover loop jobs are flushed at shutdown.
    closing: AtomicBool,
}

/// Slot-bounded scheduler. Run it with [`Task::start`], usually inside a
/// [`crate::core::ThreadedTask`].
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Scheduler whose loop ends at the first bookkeeping failure.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Config`] for an invalid configuration.
    pub fn new(config: &SchedulerConfig) -> Result<Self, SchedulerError> {
        Self::build(config, EventLoop::new("scheduler"))
    }

    /// Scheduler whose loop reports bookkeeping failures to `handler` and
    /// keeps going.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Config`] for an invalid configuration.
    pub fn with_error_handler(
        config: &SchedulerConfig,
        handler: ErrorHandler,
    ) -> Result<Self, SchedulerError> {
        Self::build(config, EventLoop::new("scheduler").with_error_handler(handler))
    }

    fn build(config: &SchedulerConfig, event_loop: EventLoop) -> Result<Self, SchedulerError> {
        config
            .validate()
            .map_err(crate::core::error::ConfigError::Invalid)?;
        let event_loop = Arc::new(event_loop);
        let executor = Arc::new(
            ThreadExecutor::new(Arc::clone(&event_loop))
                .with_thread_name(config.thread_name.clone())
                .with_join_timeout(config.join_timeout()),
        );
        let inner = Arc::new(Inner {
            max_threads: config.max_threads,
            lock_timeout: config.critical_section_timeout(),
            callbacks: LoopCallbacks::new(Arc::clone(&event_loop)),
            event_loop,
            slots: BoundedCounter::new(config.max_threads),
            executor,
            queue: PostponeQueue::new(),
            sources: Mutex::new(Vec::new()),
            emitter: Arc::new(Emitter::new("scheduler", &SCHEDULER_SIGNALS)),
            closing: AtomicBool::new(false),
        });
        Inner::wire(&inner)?;
        info!(max_threads = config.max_threads, "scheduler created");
        Ok(Self { inner })
    }

    /// Feed records emitted by `source` into this scheduler.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Subscription`] if subscribed already,
    /// [`SchedulerError::LockTimeout`], or a bus error if `source` does not
    /// declare `task_scheduled`.
    pub fn subscribe<S>(&self, source: Arc<S>) -> Result<(), SchedulerError>
    where
        S: ScheduleSource + 'static,
    {
        let mut sources = self.inner.lock_sources()?;
        let source_id = source.source_id().clone();
        if sources.iter().any(|e| *e.source.source_id() == source_id) {
            return Err(SchedulerError::Subscription(format!(
                "{source_id} is subscribed already"
            )));
        }
        let weak = Arc::downgrade(&self.inner);
        let subscription =
            self.inner
                .callbacks
                .register(source.emitter(), &TASK_SCHEDULED, move |event| {
                    Inner::on_task_scheduled(&weak, event)
                })?;
        debug!(source = %source_id, "schedule source subscribed");
        sources.push(SourceEntry {
            source,
            subscription,
        });
        Ok(())
    }

    /// Stop feeding records from `source`.
    ///
    /// # Errors
    ///
    /// [`SchedulerError::Subscription`] if not subscribed, or
    /// [`SchedulerError::LockTimeout`].
    pub fn unsubscribe(&self, source: &dyn ScheduleSource) -> Result<(), SchedulerError> {
        let mut sources = self.inner.lock_sources()?;
        let position = sources
            .iter()
            .position(|e| e.source.source_id() == source.source_id())
            .ok_or_else(|| {
                SchedulerError::Subscription(format!("{} is not subscribed", source.source_id()))
            })?;
        let entry = sources.remove(position);
        drop(sources);
        self.inner.release_source(&entry)?;
        Ok(())
    }

    /// Slot budget.
    #[must_use]
    pub fn max_threads(&self) -> usize {
        self.inner.max_threads
    }

    /// Currently free slots.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.inner.slots.get()
    }

    /// Executing records.
    #[must_use]
    pub fn running_records(&self) -> Vec<SharedRecord> {
        self.inner.executor.running_records()
    }

    /// Postponed records, oldest first.
    #[must_use]
    pub fn postponed_records(&self) -> Vec<SharedRecord> {
        self.inner.queue.records()
    }

    /// True while the bookkeeping loop runs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.event_loop.is_running()
    }

    /// Wait until the bookkeeping loop runs.
    pub fn await_start(&self, timeout: Duration) -> bool {
        self.inner.event_loop.wait_running(true, timeout)
    }

    /// Point-in-time view for introspection.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerSnapshot {
        let info = |records: Vec<SharedRecord>| {
            records
                .iter()
                .map(|r| RecordInfo::from(&**r))
                .collect::<Vec<_>>()
        };
        SchedulerSnapshot {
            max_threads: self.inner.max_threads,
            free_slots: self.inner.slots.get(),
            running: info(self.inner.executor.running_records()),
            postponed: info(self.inner.queue.records()),
        }
    }
}

impl Inner {
    fn wire(inner: &Arc<Self>) -> Result<(), BusError> {
        let queue = inner.queue.emitter();
        queue.proxy(&RECORD_DROPPED, Arc::clone(&inner.emitter), &SCHEDULED_TASK_DROPPED)?;
        queue.proxy(&RECORD_POSTPONED, Arc::clone(&inner.emitter), &SCHEDULED_TASK_POSTPONED)?;
        queue.proxy(&RECORD_EXPIRED, Arc::clone(&inner.emitter), &SCHEDULED_TASK_EXPIRED)?;

        let executor = inner.executor.emitter();
        executor.proxy(&RECORD_STARTED, Arc::clone(&inner.emitter), &SCHEDULED_TASK_STARTED)?;
        executor.proxy(&RECORD_STOPPED, Arc::clone(&inner.emitter), &SCHEDULED_TASK_STOPPED)?;

        let emitter = Arc::clone(&inner.emitter);
        executor.subscribe_strong(&RECORD_COMPLETED, move |event: &Event| {
            Self::report_completion(&emitter, event);
        })?;

        let weak = Arc::downgrade(inner);
        inner
            .callbacks
            .register(executor, &RECORD_PROCESSED, move |_| {
                match weak.upgrade() {
                    Some(inner) => inner.on_record_processed().map_err(Into::into),
                    None => Ok(()),
                }
            })?;
        Ok(())
    }

    fn report_completion(emitter: &Emitter, event: &Event) {
        let Some(completed) = event.value::<ScheduledTaskResult>() else {
            return;
        };
        let mut outcome = emitter.emit(&SCHEDULED_TASK_COMPLETED, event.payload.clone());
        if let Some(failure) = completed.result.failure() {
            warn!(record_id = %completed.record.id(), error = %failure, "scheduled task crashed");
            outcome = outcome.and(emitter.emit(&SCHEDULED_TASK_CRASHED, event.payload.clone()));
        }
        if let Err(e) = outcome {
            error!(error = %e, "failed to report task completion");
        }
    }

    fn lock_sources(&self) -> Result<parking_lot::MutexGuard<'_, Vec<SourceEntry>>, SchedulerError> {
        self.sources
            .try_lock_for(self.lock_timeout)
            .ok_or(SchedulerError::LockTimeout(self.lock_timeout))
    }

    fn release_source(&self, entry: &SourceEntry) -> Result<(), SchedulerError> {
        self.callbacks
            .unregister(entry.source.emitter(), &TASK_SCHEDULED, entry.subscription)?;
        debug!(source = %entry.source.source_id(), "schedule source unsubscribed");
        Ok(())
    }

    fn on_task_scheduled(weak: &Weak<Self>, event: &Event) -> anyhow::Result<()> {
        let Some(inner) = weak.upgrade() else {
            return Ok(());
        };
        let Some(record) = event.value::<SharedRecord>() else {
            return Ok(());
        };
        if inner.closing.load(Ordering::Acquire) {
            warn!(record_id = %record.id(), "record arrived after shutdown, dropped");
            inner
                .emitter
                .emit(&SCHEDULED_TASK_DROPPED, Payload::new(Arc::clone(record)))?;
            return Ok(());
        }
        inner.admit(Arc::clone(record))?;
        Ok(())
    }

    fn within_group_limit(&self, record: &ScheduleRecord) -> bool {
        match (record.group_id(), record.simultaneous_policy()) {
            (Some(group_id), limit) if limit > 0 => {
                self.executor.running_in_group(group_id) < limit
            }
            _ => true,
        }
    }

    fn admit(&self, record: SharedRecord) -> Result<(), SchedulerError> {
        self.emitter
            .emit(&TASK_SCHEDULED, Payload::new(Arc::clone(&record)))?;

        if !self.within_group_limit(&record) {
            debug!(record_id = %record.id(), group_id = ?record.group_id(), "group limit reached");
            return self.queue.postpone(record);
        }
        match self.slots.decrement() {
            Ok(_) => self.run(record),
            Err(SchedulerError::SlotUnderflow) => {
                debug!(record_id = %record.id(), "no free slot");
                self.queue.postpone(record)
            }
            Err(e) => Err(e),
        }
    }

    /// Execute `record` on a slot that is already taken.
    fn run(&self, record: SharedRecord) -> Result<(), SchedulerError> {
        let record_id = record.id();
        if let Err(e) = self.executor.execute(record) {
            self.slots.increment()?;
            return Err(e);
        }
        debug!(record_id = %record_id, free_slots = self.slots.get(), "record admitted");
        Ok(())
    }

    fn on_record_processed(&self) -> Result<(), SchedulerError> {
        if self.closing.load(Ordering::Acquire) {
            return Ok(());
        }
        match self.queue.next_record(|candidate| self.within_group_limit(candidate)) {
            Some(next) => {
                debug!(record_id = %next.id(), "postponed record resumed");
                self.run(next)
            }
            None => {
                let free = self.slots.increment()?;
                debug!(free_slots = free, "slot released");
                Ok(())
            }
        }
    }

    fn unsubscribe_all(&self) -> Result<(), SchedulerError> {
        let entries = std::mem::take(&mut *self.lock_sources()?);
        for entry in &entries {
            if let Err(e) = self.release_source(entry) {
                warn!(source = %entry.source.source_id(), error = %e, "unable to unsubscribe source");
            }
        }
        Ok(())
    }

    /// Flush leftover loop jobs (late arrivals are reported dropped), drop
    /// postponed records, then force-stop running ones. Runs after the loop
    /// has returned.
    fn finalize(&self) {
        self.closing.store(true, Ordering::Release);
        let flushed = self.event_loop.run_pending();

        while let Some(record) = self.queue.next_record(|_| true) {
            warn!(record_id = %record.id(), "postponed record dropped at shutdown");
            if let Err(e) = self.emitter.emit(&SCHEDULED_TASK_DROPPED, Payload::new(record)) {
                error!(error = %e, "failed to report dropped record");
            }
        }

        for record in self.executor.running_records() {
            if let Err(e) = self.executor.stop_record(record.id()) {
                warn!(record_id = %record.id(), error = %e, "running record did not stop cleanly");
            }
            if let Err(e) = self.emitter.emit(&SCHEDULED_TASK_STOPPED, Payload::new(record)) {
                error!(error = %e, "failed to report stopped record");
            }
        }

        self.slots.reset();
        self.closing.store(false, Ordering::Release);
        info!(flushed, "scheduler finalized");
    }
}

impl Task for Scheduler {
    fn start(&self) -> anyhow::Result<Payload> {
        let outcome = self.inner.event_loop.run();
        // Another thread owns the loop; leave its state alone.
        let refused = matches!(
            &outcome,
            Err(e) if matches!(e.downcast_ref::<TaskError>(), Some(TaskError::Started(_)))
        );
        if refused {
            return outcome.map(|()| Payload::none());
        }
        self.inner.finalize();
        outcome?;
        Ok(Payload::none())
    }

    fn stop(&self) -> anyhow::Result<()> {
        self.inner.unsubscribe_all()?;
        self.inner.event_loop.stop();
        info!("scheduler stop requested");
        Ok(())
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::STOP
    }
}

impl SignalSource for Scheduler {
    fn emitter(&self) -> &Emitter {
        &self.inner.emitter
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("max_threads", &self.inner.max_threads)
            .field("free_slots", &self.inner.slots.get())
            .field("running", &self.inner.executor.len())
            .field("postponed", &self.inner.queue.len())
            .finish_non_exhaustive()
    }
}
