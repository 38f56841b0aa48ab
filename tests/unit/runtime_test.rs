//! Tests for runtime adapters and introspection helpers

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use prometheus_orchestrator::builders::build_scheduler;
use prometheus_orchestrator::config::SchedulerConfig;
use prometheus_orchestrator::core::{
    Launcher, Payload, Task, TaskClass, TaskRegistry, ThreadedTask,
};
use prometheus_orchestrator::runtime::{
    list_instances, scheduler_snapshot_json, AsyncJob, FutureTask, SchedulerSnapshot,
};

struct Sleep(Duration);

#[async_trait]
impl AsyncJob for Sleep {
    async fn run(&self) -> anyhow::Result<Payload> {
        tokio::time::sleep(self.0).await;
        Ok(Payload::new(self.0.as_millis()))
    }
}

#[test]
fn test_future_task_runs_job_to_completion() {
    let task = FutureTask::new("short", Sleep(Duration::from_millis(5)));
    let value = task.start().unwrap();
    assert_eq!(value.get::<u128>(), Some(&5));
    assert!(!task.is_running());
    task.stop().unwrap();
}

#[test]
fn test_stopping_a_future_task_cancels_the_job() {
    let job = Arc::new(FutureTask::new("long", Sleep(Duration::from_secs(30))));
    let threaded = ThreadedTask::new(Arc::clone(&job) as Arc<dyn Task>)
        .with_join_timeout(Some(Duration::from_secs(10)));
    threaded.start().unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while !job.is_running() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(job.is_running());

    threaded.stop().unwrap();
    let result = threaded.last_result().unwrap();
    assert_eq!(result.failure().unwrap().to_string(), "task cancelled: long");
    assert!(!job.is_running());

    // A cancelled task can run again.
    let again = FutureTask::new("again", Sleep(Duration::from_millis(1)));
    assert!(again.start().is_ok());
}

#[test]
fn test_list_instances() {
    let registry = Arc::new(TaskRegistry::new());
    registry
        .register_class(TaskClass::custom(
            "poller",
            Vec::<String>::new(),
            || -> anyhow::Result<Arc<dyn Task>> {
                Ok(Arc::new(FutureTask::new("poller", Sleep(Duration::ZERO))))
            },
        ))
        .unwrap();
    let launcher = Launcher::new(registry);
    assert!(list_instances(&launcher).is_empty());

    let id = launcher.start_task("poller", false, false).unwrap();
    let instances = list_instances(&launcher);
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].tag, "poller");
    assert_eq!(instances[0].instance_id, id);
}

#[test]
fn test_scheduler_snapshot_json() {
    let scheduler = build_scheduler(&SchedulerConfig::with_max_threads(4)).unwrap();
    let json = scheduler_snapshot_json(&scheduler).unwrap();
    let snapshot: SchedulerSnapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(snapshot.max_threads, 4);
    assert_eq!(snapshot.free_slots, 4);
    assert!(snapshot.running.is_empty());
    assert!(snapshot.postponed.is_empty());
}
