//! # Prometheus Orchestrator
//!
//! In-process task orchestration for long-running services: a typed event
//! bus, task lifecycle state machines, a dependency-aware launcher and a
//! slot-bounded scheduler that runs each scheduled record on its own thread.
//!
//! ## Core Problem Solved
//!
//! Services that host many background jobs need the same plumbing again and
//! again:
//!
//! - **Lifecycle Tracking**: know whether a task is started, completed, stopped or terminated
//! - **Dependencies**: start a task's requirements first, stop dependents before their providers
//! - **Bounded Concurrency**: never run more than `max_threads` scheduled tasks at once
//! - **Back-Pressure Policies**: decide per group whether surplus work waits, drops or collapses
//!
//! ## Key Features
//!
//! - **Signals**: declared once, typed payloads checked at emit time
//! - **Event Loop**: one thread owns scheduler state; bus deliveries are marshalled onto it
//! - **Threaded Tasks**: any [`core::Task`] can run on a dedicated, named OS thread
//! - **Postpone Queue**: `wait`, `drop`, `keep_first` and `keep_last` policies per group
//! - **Audit Sinks**: record every bus event for tests or structured logs
//!
//! ## Scheduler
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::thread;
//! use prometheus_orchestrator::config::SchedulerConfig;
//! use prometheus_orchestrator::core::{
//!     FnTask, ManualScheduleSource, Payload, ScheduleRecord, Scheduler, Task,
//! };
//!
//! let scheduler = Arc::new(Scheduler::new(&SchedulerConfig::with_max_threads(4))?);
//! let source = Arc::new(ManualScheduleSource::new());
//! scheduler.subscribe(Arc::clone(&source))?;
//!
//! let runner = Arc::clone(&scheduler);
//! let handle = thread::spawn(move || runner.start());
//! scheduler.await_start(std::time::Duration::from_secs(1));
//!
//! let task = Arc::new(FnTask::new(|| Ok(Payload::new(42_u32))));
//! source.schedule(ScheduleRecord::new(task).with_group_id("reports").into_shared())?;
//!
//! scheduler.stop()?;
//! handle.join().expect("scheduler thread")?;
//! ```
//!
//! ## Launcher
//!
//! ```rust,ignore
//! use prometheus_orchestrator::core::{default_registry, Launcher};
//!
//! let launcher = Launcher::new(default_registry());
//! let instance = launcher.start_task("web", false, false)?;
//! launcher.stop_dependent_tasks("db", true, false)?;
//! ```
//!
//! For complete scenarios, see `tests/scheduler_test.rs` and `tests/launcher_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core orchestration abstractions: signals, tasks, launcher and scheduler.
pub mod core;
/// Configuration models for the scheduler, the launcher, and timeouts.
pub mod config;
/// Builders to construct orchestration components from configuration.
pub mod builders;
/// Runtime adapters (async jobs) and the read-only API surface.
pub mod runtime;
/// Shared utilities.
pub mod util;
