//! Core orchestration abstractions: signals, task lifecycles, launching and
//! slot-bounded scheduling.

pub mod audit;
pub mod capability;
pub mod counter;
pub mod error;
pub mod event_loop;
pub mod executor;
pub mod launcher;
pub mod postpone;
pub mod record;
pub mod registry;
pub mod scheduler;
pub mod signal;
pub mod source;
pub mod task;
pub mod thread;

pub use audit::{
    build_audit_event, watch, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink,
};
pub use capability::{is_capable, Capability, CapabilitySet};
pub use counter::BoundedCounter;
pub use error::{
    AppResult, BusError, ConfigError, LauncherError, RegistryError, SchedulerError, TaskError,
};
pub use event_loop::{ErrorHandler, EventLoop, EventLoopTask, Job, LoopCallback, LoopCallbacks};
pub use executor::{
    ThreadExecutor, EXECUTOR_SIGNALS, RECORD_COMPLETED, RECORD_PROCESSED, RECORD_STARTED,
    RECORD_STOPPED,
};
pub use launcher::Launcher;
pub use postpone::{
    PostponeQueue, POSTPONE_QUEUE_SIGNALS, RECORD_DROPPED, RECORD_EXPIRED, RECORD_POSTPONED,
};
pub use record::{PostponePolicy, RecordInfo, ScheduleRecord, ScheduledTaskResult, SharedRecord};
pub use registry::{default_registry, LauncherTask, TaskClass, TaskRegistry};
pub use scheduler::{
    Scheduler, SchedulerSnapshot, SCHEDULED_TASK_COMPLETED, SCHEDULED_TASK_CRASHED,
    SCHEDULED_TASK_DROPPED, SCHEDULED_TASK_EXPIRED, SCHEDULED_TASK_POSTPONED,
    SCHEDULED_TASK_STARTED, SCHEDULED_TASK_STOPPED, SCHEDULER_SIGNALS,
};
pub use signal::{
    Callback, Emitter, Event, Payload, Signal, SignalSet, SignalSource, SourceId, SubscriptionId,
};
pub use source::{ManualScheduleSource, ScheduleSource, SCHEDULE_SOURCE_SIGNALS, TASK_SCHEDULED};
pub use task::{
    CompletionHandle, DetachableTask, FnTask, StatefulTask, Task, TaskBody, TaskFailure,
    TaskResult, TaskState, TASK_COMPLETED, TASK_SIGNALS, TASK_STARTED, TASK_STOPPED,
    TASK_TERMINATED,
};
pub use thread::{
    ThreadedTask, THREADED_TASK_COMPLETED, THREADED_TASK_FROZE, THREADED_TASK_SIGNALS,
    THREADED_TASK_STARTED,
};
