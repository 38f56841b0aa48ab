//! Async jobs as blocking tasks.
//!
//! A [`FutureTask`] owns an [`AsyncJob`] and runs it to completion on a
//! private current-thread tokio runtime built inside [`Task::start`]. Wrap it
//! in a [`crate::core::ThreadedTask`] or schedule it like any other task.
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use prometheus_orchestrator::core::{Payload, ScheduleRecord};
//! use prometheus_orchestrator::runtime::{AsyncJob, FutureTask};
//!
//! struct Fetch;
//!
//! #[async_trait]
//! impl AsyncJob for Fetch {
//!     async fn run(&self) -> anyhow::Result<Payload> {
//!         tokio::time::sleep(std::time::Duration::from_millis(5)).await;
//!         Ok(Payload::new("done"))
//!     }
//! }
//!
//! let record = ScheduleRecord::new(std::sync::Arc::new(FutureTask::new("fetch", Fetch)));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use crate::core::{CapabilitySet, Payload, Task, TaskError};

/// Asynchronous task body.
#[async_trait]
pub trait AsyncJob: Send + Sync + 'static {
    /// Run the job to completion.
    async fn run(&self) -> anyhow::Result<Payload>;
}

/// Blocking [`Task`] adapter for an [`AsyncJob`]. Stopping it cancels the
/// pending future at its next await point.
pub struct FutureTask<J> {
    name: String,
    job: J,
    cancel: watch::Sender<bool>,
    running: AtomicBool,
}

impl<J: AsyncJob> FutureTask<J> {
    /// Adapter for `job`; `name` shows up in logs and cancellation errors.
    pub fn new(name: impl Into<String>, job: J) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            name: name.into(),
            job,
            cancel,
            running: AtomicBool::new(false),
        }
    }

    /// Job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wrapped job.
    #[must_use]
    pub const fn job(&self) -> &J {
        &self.job
    }

    /// True while `start` is blocked on the job.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl<J: AsyncJob> Task for FutureTask<J> {
    fn start(&self) -> anyhow::Result<Payload> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(TaskError::Started(self.name.clone()).into());
        }
        let mut cancelled = self.cancel.subscribe();
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                self.cancel.send_replace(false);
                self.running.store(false, Ordering::Release);
                return Err(TaskError::Spawn(e.to_string()).into());
            }
        };
        debug!(job = %self.name, "async job starting");
        let result = runtime.block_on(async {
            tokio::select! {
                result = self.job.run() => result,
                _ = cancelled.wait_for(|c| *c) => {
                    Err(TaskError::Cancelled(self.name.clone()).into())
                }
            }
        });
        self.cancel.send_replace(false);
        self.running.store(false, Ordering::Release);
        debug!(job = %self.name, ok = result.is_ok(), "async job finished");
        result
    }

    fn stop(&self) -> anyhow::Result<()> {
        if !self.is_running() {
            debug!(job = %self.name, "async job idle, nothing to cancel");
            return Ok(());
        }
        self.cancel.send_replace(true);
        Ok(())
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::STOP
    }
}

impl<J> fmt::Debug for FutureTask<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureTask")
            .field("name", &self.name)
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
