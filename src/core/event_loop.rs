//! Single-threaded job loop and loop-marshalled callbacks.
//!
//! [`EventLoop::run`] processes posted jobs one at a time on the calling
//! thread until [`EventLoop::stop`] is requested. Jobs posted from any thread
//! are processed in FIFO order. A [`LoopCallback`] turns an event-bus delivery
//! into a posted job, so bookkeeping that reacts to events from many threads
//! is serialized on the loop.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::core::capability::CapabilitySet;
use crate::core::error::{BusError, TaskError};
use crate::core::signal::{Callback, Emitter, Event, Payload, Signal, SourceId, SubscriptionId};
use crate::core::task::Task;

/// A unit of work processed on the loop thread.
pub type Job = Box<dyn FnOnce() -> anyhow::Result<()> + Send>;

/// Handler for job failures. Without one, the first failure ends `run`.
pub type ErrorHandler = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

enum Message {
    Job(Job),
    Stop,
}

/// FIFO job loop.
pub struct EventLoop {
    name: String,
    sender: Sender<Message>,
    receiver: Receiver<Message>,
    running: Mutex<bool>,
    changed: Condvar,
    error_handler: Option<ErrorHandler>,
}

impl EventLoop {
    /// Create a loop. `name` is used in logs.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            name: name.into(),
            sender,
            receiver,
            running: Mutex::new(false),
            changed: Condvar::new(),
            error_handler: None,
        }
    }

    /// Install a failure handler; failing jobs are reported and the loop
    /// keeps going.
    #[must_use]
    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.error_handler = Some(handler);
        self
    }

    /// Loop name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Post a job. Never blocks.
    pub fn notify<F>(&self, job: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        // The loop owns a receiver, so the channel is never disconnected.
        let _ = self.sender.send(Message::Job(Box::new(job)));
    }

    /// Number of posted messages not yet processed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// True while `run` is processing jobs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        *self.running.lock()
    }

    fn set_running(&self, value: bool) {
        *self.running.lock() = value;
        self.changed.notify_all();
    }

    /// Wait until the loop reports the given running state.
    pub fn wait_running(&self, running: bool, timeout: Duration) -> bool {
        let mut state = self.running.lock();
        if *state == running {
            return true;
        }
        let result = self
            .changed
            .wait_while_for(&mut state, |s| *s != running, timeout);
        !result.timed_out()
    }

    /// Process jobs on the current thread until stopped.
    ///
    /// # Errors
    ///
    /// Fails if the loop runs already, or with the first job failure when no
    /// error handler is installed.
    pub fn run(&self) -> anyhow::Result<()> {
        {
            let mut running = self.running.lock();
            if *running {
                return Err(TaskError::Started(format!("event loop `{}`", self.name)).into());
            }
            *running = true;
        }
        self.changed.notify_all();
        info!(event_loop = %self.name, "event loop started");

        let result = self.process();

        self.set_running(false);
        match &result {
            Ok(()) => info!(event_loop = %self.name, "event loop stopped"),
            Err(e) => error!(event_loop = %self.name, error = %e, "event loop failed"),
        }
        result
    }

    fn process(&self) -> anyhow::Result<()> {
        while let Ok(message) = self.receiver.recv() {
            let job = match message {
                Message::Job(job) => job,
                Message::Stop => return Ok(()),
            };
            if let Err(e) = Self::execute(job) {
                match &self.error_handler {
                    Some(handler) => handler(&e),
                    None => return Err(e),
                }
            }
        }
        Ok(())
    }

    fn execute(job: Job) -> anyhow::Result<()> {
        panic::catch_unwind(AssertUnwindSafe(job))
            .unwrap_or_else(|p| Err(anyhow!("loop job panicked: {}", panic_message(&*p))))
    }

    /// Request the loop to stop after the jobs posted before this call.
    pub fn stop(&self) {
        let _ = self.sender.send(Message::Stop);
    }

    /// Run the jobs left behind by a finished `run` on the calling thread,
    /// including jobs they post in turn. Stop requests are skipped and a
    /// failing job does not end the flush. Returns the number of jobs run.
    ///
    /// Does nothing while the loop is running.
    pub fn run_pending(&self) -> usize {
        if self.is_running() {
            return 0;
        }
        let mut ran = 0;
        for message in self.receiver.try_iter() {
            let Message::Job(job) = message else {
                continue;
            };
            ran += 1;
            if let Err(e) = Self::execute(job) {
                match &self.error_handler {
                    Some(handler) => handler(&e),
                    None => error!(event_loop = %self.name, error = %e, "pending job failed"),
                }
            }
        }
        if ran > 0 {
            debug!(event_loop = %self.name, ran, "pending jobs flushed");
        }
        ran
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Render a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

type LoopHandler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Event-bus callback that defers its handler to an [`EventLoop`].
pub struct LoopCallback {
    event_loop: Arc<EventLoop>,
    handler: LoopHandler,
}

impl Callback for LoopCallback {
    fn on_event(&self, event: &Event) {
        let handler = Arc::clone(&self.handler);
        let event = event.clone();
        self.event_loop.notify(move || handler(&event));
    }
}

struct Registration {
    source: SourceId,
    signal: &'static Signal,
    subscription: SubscriptionId,
    _callback: Arc<LoopCallback>,
}

/// Owner of loop-marshalled subscriptions.
///
/// Emitters hold the callbacks weakly, so dropping a registration (or the
/// whole set) silently ends the subscription.
pub struct LoopCallbacks {
    event_loop: Arc<EventLoop>,
    registrations: Mutex<Vec<Registration>>,
}

impl LoopCallbacks {
    /// Callbacks for `event_loop`.
    #[must_use]
    pub fn new(event_loop: Arc<EventLoop>) -> Self {
        Self {
            event_loop,
            registrations: Mutex::new(Vec::new()),
        }
    }

    /// The loop handlers are posted to.
    #[must_use]
    pub const fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    /// Subscribe `handler` to `signal` of `emitter`; it runs on the loop.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownSignal`] if `emitter` does not declare `signal`.
    pub fn register<H>(
        &self,
        emitter: &Emitter,
        signal: &'static Signal,
        handler: H,
    ) -> Result<SubscriptionId, BusError>
    where
        H: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let callback = Arc::new(LoopCallback {
            event_loop: Arc::clone(&self.event_loop),
            handler: Arc::new(handler),
        });
        let subscription = emitter.subscribe(signal, &callback)?;
        self.registrations.lock().push(Registration {
            source: emitter.source_id().clone(),
            signal,
            subscription,
            _callback: callback,
        });
        Ok(subscription)
    }

    /// Re-emit `signal` of `emitter` on `target` as `target_signal`, from the
    /// loop thread.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownSignal`] if either side does not declare its signal.
    pub fn proxy(
        &self,
        emitter: &Emitter,
        signal: &'static Signal,
        target: Arc<Emitter>,
        target_signal: &'static Signal,
    ) -> Result<SubscriptionId, BusError> {
        if !target.signals().contains(target_signal) {
            return Err(BusError::UnknownSignal(target_signal.name()));
        }
        self.register(emitter, signal, move |event| {
            target.emit(target_signal, event.payload.clone())?;
            Ok(())
        })
    }

    /// Remove one registration.
    ///
    /// # Errors
    ///
    /// [`BusError::NoSuchSubscription`] if it was not registered here.
    pub fn unregister(
        &self,
        emitter: &Emitter,
        signal: &'static Signal,
        subscription: SubscriptionId,
    ) -> Result<(), BusError> {
        let registration = {
            let mut registrations = self.registrations.lock();
            let position = registrations
                .iter()
                .position(|r| {
                    r.subscription == subscription
                        && r.signal == signal
                        && r.source == *emitter.source_id()
                })
                .ok_or(BusError::NoSuchSubscription {
                    signal: signal.name(),
                    id: subscription.get(),
                })?;
            registrations.remove(position)
        };
        emitter.unsubscribe(signal, subscription)?;
        drop(registration);
        Ok(())
    }

    /// Drop every registration.
    pub fn clear(&self) {
        let dropped = std::mem::take(&mut *self.registrations.lock());
        debug!(
            event_loop = %self.event_loop.name(),
            dropped = dropped.len(),
            "cleared loop callbacks"
        );
    }

    /// Number of live registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A task whose body is an [`EventLoop`]: `start` runs the loop until `stop`.
pub struct EventLoopTask {
    event_loop: Arc<EventLoop>,
}

impl EventLoopTask {
    /// Wrap a loop.
    #[must_use]
    pub const fn new(event_loop: Arc<EventLoop>) -> Self {
        Self { event_loop }
    }

    /// The wrapped loop.
    #[must_use]
    pub const fn event_loop(&self) -> &Arc<EventLoop> {
        &self.event_loop
    }

    /// Wait until the loop is processing jobs.
    pub fn await_start(&self, timeout: Duration) -> bool {
        self.event_loop.wait_running(true, timeout)
    }
}

impl Task for EventLoopTask {
    fn start(&self) -> anyhow::Result<Payload> {
        self.event_loop.run()?;
        Ok(Payload::none())
    }

    fn stop(&self) -> anyhow::Result<()> {
        self.event_loop.stop();
        Ok(())
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::STOP
    }
}
