//! Tests for scheduler and launcher builders

use std::sync::Arc;
use std::time::Duration;

use prometheus_orchestrator::builders::{
    build_launcher, build_orchestrator, build_scheduler, build_scheduler_thread,
};
use prometheus_orchestrator::config::{LauncherConfig, OrchestratorConfig, SchedulerConfig};
use prometheus_orchestrator::core::{
    ConfigError, FnTask, Payload, SchedulerError, Task, TaskClass, TaskRegistry,
};

fn registry() -> Arc<TaskRegistry> {
    let registry = Arc::new(TaskRegistry::new());
    registry
        .register_class(TaskClass::custom(
            "noop",
            Vec::<String>::new(),
            || -> anyhow::Result<Arc<dyn Task>> {
                Ok(Arc::new(FnTask::new(|| Ok(Payload::none()))))
            },
        ))
        .unwrap();
    registry
}

#[test]
fn test_build_scheduler_rejects_invalid_config() {
    let err = build_scheduler(&SchedulerConfig::with_max_threads(0)).unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Config(ConfigError::Invalid(_))
    ));

    let scheduler = build_scheduler(&SchedulerConfig::with_max_threads(3)).unwrap();
    assert_eq!(scheduler.max_threads(), 3);
    assert_eq!(scheduler.free_slots(), 3);
    assert!(!scheduler.is_running());
}

#[test]
fn test_build_launcher() {
    let bad = LauncherConfig {
        critical_section_timeout_ms: 0,
    };
    assert!(matches!(
        build_launcher(&bad, registry()),
        Err(ConfigError::Invalid(_))
    ));

    let launcher = build_launcher(&LauncherConfig::default(), registry()).unwrap();
    launcher.start_task("noop", false, false).unwrap();
    assert!(launcher.is_started("noop"));
}

#[test]
fn test_build_orchestrator() {
    let orchestrator = build_orchestrator(&OrchestratorConfig::default(), registry()).unwrap();
    assert_eq!(orchestrator.launcher.registry().tags(), vec!["noop"]);
    assert!(!orchestrator.scheduler.is_running());

    let mut cfg = OrchestratorConfig::default();
    cfg.scheduler.max_threads = 0;
    assert!(build_orchestrator(&cfg, registry()).is_err());
}

#[test]
fn test_scheduler_thread_runs_and_stops_the_loop() {
    let (scheduler, thread) = build_scheduler_thread(&SchedulerConfig::with_max_threads(2)).unwrap();
    thread.start().unwrap();
    assert!(scheduler.await_start(Duration::from_secs(10)));
    thread.stop().unwrap();
    assert!(!scheduler.is_running());
    assert_eq!(scheduler.free_slots(), 2);
}
