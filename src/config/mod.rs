//! Configuration models for the scheduler, the launcher and timeouts.

pub mod orchestrator;

pub use orchestrator::{
    LauncherConfig, OrchestratorConfig, SchedulerConfig, ENV_JOIN_TIMEOUT_MS,
    ENV_LOCK_TIMEOUT_MS, ENV_MAX_THREADS,
};
