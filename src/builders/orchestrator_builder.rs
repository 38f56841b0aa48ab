//! Builders to construct a scheduler and a launcher from configuration.

use std::sync::Arc;

use tracing::info;

use crate::config::{LauncherConfig, OrchestratorConfig, SchedulerConfig};
use crate::core::{ConfigError, Launcher, Scheduler, SchedulerError, TaskRegistry, ThreadedTask};

/// A scheduler and a launcher built from one [`OrchestratorConfig`].
#[derive(Debug)]
pub struct Orchestrator {
    /// Slot-bounded scheduler; not running yet.
    pub scheduler: Arc<Scheduler>,
    /// Dependency-aware launcher.
    pub launcher: Launcher,
}

/// Build a scheduler from validated configuration.
///
/// # Errors
///
/// [`SchedulerError::Config`] if `cfg` does not validate.
pub fn build_scheduler(cfg: &SchedulerConfig) -> Result<Scheduler, SchedulerError> {
    Scheduler::new(cfg)
}

/// Build a scheduler together with the thread that will run its loop.
/// Starting the returned [`ThreadedTask`] starts the scheduler; stopping it
/// stops the scheduler and joins the thread.
///
/// # Errors
///
/// [`SchedulerError::Config`] if `cfg` does not validate.
pub fn build_scheduler_thread(
    cfg: &SchedulerConfig,
) -> Result<(Arc<Scheduler>, ThreadedTask), SchedulerError> {
    let scheduler = Arc::new(Scheduler::new(cfg)?);
    let thread = ThreadedTask::new(Arc::clone(&scheduler) as Arc<dyn crate::core::Task>)
        .with_thread_name(format!("{}-loop", cfg.thread_name))
        .with_join_timeout(cfg.join_timeout());
    Ok((scheduler, thread))
}

/// Build a launcher resolving tags through `registry`.
///
/// # Errors
///
/// [`ConfigError::Invalid`] if `cfg` does not validate.
pub fn build_launcher(
    cfg: &LauncherConfig,
    registry: Arc<TaskRegistry>,
) -> Result<Launcher, ConfigError> {
    cfg.validate().map_err(ConfigError::Invalid)?;
    Ok(Launcher::with_config(registry, cfg))
}

/// Build both components.
///
/// # Errors
///
/// [`SchedulerError::Config`] if either section does not validate.
pub fn build_orchestrator(
    cfg: &OrchestratorConfig,
    registry: Arc<TaskRegistry>,
) -> Result<Orchestrator, SchedulerError> {
    cfg.validate().map_err(ConfigError::Invalid)?;
    let scheduler = Arc::new(build_scheduler(&cfg.scheduler)?);
    let launcher = build_launcher(&cfg.launcher, registry)?;
    info!(
        max_threads = cfg.scheduler.max_threads,
        tags = launcher.registry().tags().len(),
        "orchestrator built"
    );
    Ok(Orchestrator {
        scheduler,
        launcher,
    })
}
