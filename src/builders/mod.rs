//! Builders to construct orchestration components from configuration.

pub mod orchestrator_builder;

pub use orchestrator_builder::{
    build_launcher, build_orchestrator, build_scheduler, build_scheduler_thread, Orchestrator,
};
