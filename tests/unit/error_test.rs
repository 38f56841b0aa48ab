//! Tests for error types

use std::time::Duration;

use prometheus_orchestrator::core::{
    BusError, Capability, ConfigError, LauncherError, RegistryError, SchedulerError, TaskError,
};
use uuid::Uuid;

#[test]
fn test_task_errors() {
    assert_eq!(
        TaskError::NotCapable(Capability::Terminate).to_string(),
        "task is not capable of `terminate`"
    );
    assert_eq!(
        TaskError::Started("poller".into()).to_string(),
        "task started already: poller"
    );
    assert_eq!(
        TaskError::JoiningTimeout {
            thread: "io".into(),
            timeout: Duration::from_millis(50),
        }
        .to_string(),
        "thread `io` is still alive after 50ms"
    );
}

#[test]
fn test_bus_errors() {
    assert_eq!(
        BusError::UnknownSignal("tick").to_string(),
        "unknown signal `tick`"
    );
    assert_eq!(
        BusError::PayloadType {
            signal: "ping",
            expected: "u32",
        }
        .to_string(),
        "signal `ping` expects a payload of type `u32`"
    );
}

#[test]
fn test_registry_errors() {
    assert_eq!(
        RegistryError::DuplicateTag {
            tag: "db".into(),
            existing: "Postgres",
            attempted: "Sqlite",
        }
        .to_string(),
        "tag `db` is bound to `Postgres` already (attempted `Sqlite`)"
    );
    assert_eq!(
        RegistryError::NoSuchTag("db".into()).to_string(),
        "no task registered with tag `db`"
    );
}

#[test]
fn test_launcher_errors() {
    assert_eq!(
        LauncherError::DependenciesLoop(vec!["p".into(), "q".into()]).to_string(),
        "dependencies loop detected between: p, q"
    );
    let id = Uuid::nil();
    assert_eq!(
        LauncherError::NoSuchInstance {
            tag: "worker".into(),
            instance_id: id,
        }
        .to_string(),
        format!("no instance {id} of task `worker`")
    );
}

#[test]
fn test_scheduler_errors() {
    assert_eq!(
        SchedulerError::SlotOverflow(4).to_string(),
        "slot counter overflow (limit 4)"
    );
    assert_eq!(
        SchedulerError::from(ConfigError::Invalid("max_threads must be greater than 0".into()))
            .to_string(),
        "invalid configuration: max_threads must be greater than 0"
    );
    assert_eq!(
        SchedulerError::from(TaskError::Busy { operation: "stop" }).to_string(),
        "task is busy: another start/stop/terminate request is in progress (stop)"
    );
}
