//! Error types for orchestrator components.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::core::capability::Capability;

/// Errors produced by task control calls (lifecycle, threaded wrapper).
#[derive(Debug, Error)]
pub enum TaskError {
    /// Another start/stop/terminate request holds the lifecycle lock.
    #[error("task is busy: another start/stop/terminate request is in progress ({operation})")]
    Busy {
        /// Operation that was refused.
        operation: &'static str,
    },
    /// The task (or its thread) is running already.
    #[error("task started already: {0}")]
    Started(String),
    /// The task (or its thread) is stopped already.
    #[error("task stopped already: {0}")]
    Stopped(String),
    /// The optional operation is not implemented by the task.
    #[error("task is not capable of `{0}`")]
    NotCapable(Capability),
    /// A thread did not exit in time; it keeps running.
    #[error("thread `{thread}` is still alive after {timeout:?}")]
    JoiningTimeout {
        /// Name of the thread that froze.
        thread: String,
        /// Timeout that expired.
        timeout: Duration,
    },
    /// The OS refused to spawn a thread.
    #[error("unable to spawn thread: {0}")]
    Spawn(String),
    /// A stop request cancelled the running body.
    #[error("task cancelled: {0}")]
    Cancelled(String),
}

/// Errors produced by the event bus.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    /// The signal is not declared by the emitting source.
    #[error("unknown signal `{0}`")]
    UnknownSignal(&'static str),
    /// A signal with the same name but a different identity is already declared.
    #[error("signal `{0}` may not be redeclared with a different identity")]
    SignalRedeclared(&'static str),
    /// The signal does not accept a payload.
    #[error("signal `{0}` does not accept a payload")]
    UnexpectedPayload(&'static str),
    /// The payload has the wrong type.
    #[error("signal `{signal}` expects a payload of type `{expected}`")]
    PayloadType {
        /// Signal name.
        signal: &'static str,
        /// Expected type name.
        expected: &'static str,
    },
    /// The payload did not pass the signal's predicate.
    #[error("signal `{0}` rejected the payload value")]
    PayloadRejected(&'static str),
    /// No subscription with this id exists for the signal.
    #[error("no subscription {id} for signal `{signal}`")]
    NoSuchSubscription {
        /// Signal name.
        signal: &'static str,
        /// Subscription id.
        id: u64,
    },
}

/// Errors produced by task registries.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Tags must be non-empty.
    #[error("task tag must not be empty")]
    EmptyTag,
    /// The tag is bound to a different task class.
    #[error("tag `{tag}` is bound to `{existing}` already (attempted `{attempted}`)")]
    DuplicateTag {
        /// Tag that was rebound.
        tag: String,
        /// Class currently bound.
        existing: &'static str,
        /// Class that was rejected.
        attempted: &'static str,
    },
    /// The tag is not known to this registry or its fallbacks.
    #[error("no task registered with tag `{0}`")]
    NoSuchTag(String),
}

/// Errors produced by the dependency-aware launcher.
#[derive(Debug, Error)]
pub enum LauncherError {
    /// Unknown tag (not registered or not running).
    #[error("no such task `{0}`")]
    NoSuchTask(String),
    /// Unknown instance of a running tag.
    #[error("no instance {instance_id} of task `{tag}`")]
    NoSuchInstance {
        /// Tag that was looked up.
        tag: String,
        /// Instance that was not found.
        instance_id: Uuid,
    },
    /// The requirement graph contains a cycle; nothing was started.
    #[error("requirements loop detected: {}", .0.join(" -> "))]
    RequirementsLoop(Vec<String>),
    /// Running dependents require each other; nothing was stopped.
    #[error("dependencies loop detected between: {}", .0.join(", "))]
    DependenciesLoop(Vec<String>),
    /// The launcher lock could not be acquired in time.
    #[error("launcher lock was not acquired within {0:?}")]
    LockTimeout(Duration),
    /// Task construction or start failed.
    #[error("unable to start task `{tag}`: {source}")]
    TaskStart {
        /// Tag of the failing task.
        tag: String,
        /// Underlying failure.
        source: anyhow::Error,
    },
    /// A stop/terminate capability call failed.
    #[error("unable to stop task `{tag}`: {source}")]
    TaskStop {
        /// Tag of the failing task.
        tag: String,
        /// Underlying failure.
        source: anyhow::Error,
    },
}

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Two records of one group were postponed with different policies.
    #[error("group `{group_id}` mixes postpone policies ({queued} queued, {incoming} incoming)")]
    PostponePolicyMismatch {
        /// Group of the records.
        group_id: String,
        /// Policy of the queued record.
        queued: String,
        /// Policy of the incoming record.
        incoming: String,
    },
    /// Releasing a slot would exceed the configured limit.
    #[error("slot counter overflow (limit {0})")]
    SlotOverflow(usize),
    /// Taking a slot that is not available.
    #[error("slot counter underflow")]
    SlotUnderflow,
    /// A running record was forcibly stopped while the bookkeeping loop runs.
    #[error("unable to stop a record while the scheduler loop is running")]
    LoopRunning,
    /// The record is not running.
    #[error("record {0} is not running")]
    NoSuchRecord(Uuid),
    /// The source is already subscribed / not subscribed.
    #[error("schedule source subscription error: {0}")]
    Subscription(String),
    /// The scheduler control lock could not be acquired in time.
    #[error("scheduler lock was not acquired within {0:?}")]
    LockTimeout(Duration),
    /// Task-level failure while executing or stopping a record.
    #[error(transparent)]
    Task(#[from] TaskError),
    /// A task's own stop capability failed.
    #[error("task control call failed: {0}")]
    TaskControl(anyhow::Error),
    /// Event bus failure.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// The scheduler was built from an invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SchedulerError {
    /// Classify a failure returned by a task control call.
    pub(crate) fn from_task_control(error: anyhow::Error) -> Self {
        match error.downcast::<TaskError>() {
            Ok(task_error) => Self::Task(task_error),
            Err(other) => Self::TaskControl(other),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Values failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Source could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
    /// An environment variable holds an unusable value.
    #[error("environment variable `{var}` has invalid value `{value}`")]
    Env {
        /// Variable name.
        var: String,
        /// Offending value.
        value: String,
    },
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
