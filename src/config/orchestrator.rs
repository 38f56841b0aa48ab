//! Scheduler and launcher configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;

/// Environment variable overriding [`SchedulerConfig::max_threads`].
pub const ENV_MAX_THREADS: &str = "ORCHESTRATOR_MAX_THREADS";
/// Environment variable overriding [`SchedulerConfig::join_timeout_ms`].
pub const ENV_JOIN_TIMEOUT_MS: &str = "ORCHESTRATOR_JOIN_TIMEOUT_MS";
/// Environment variable overriding both critical section timeouts.
pub const ENV_LOCK_TIMEOUT_MS: &str = "ORCHESTRATOR_LOCK_TIMEOUT_MS";

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Slot budget: maximum concurrently running records.
    pub max_threads: usize,
    /// Join timeout for record threads; `None` waits indefinitely.
    pub join_timeout_ms: Option<u64>,
    /// Bounded wait of the control lock (subscribe/unsubscribe/stop).
    pub critical_section_timeout_ms: u64,
    /// Prefix of record thread names.
    pub thread_name: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_threads: num_cpus::get(),
            join_timeout_ms: Some(5_000),
            critical_section_timeout_ms: 5_000,
            thread_name: "scheduled-task".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Config with `max_threads` slots and defaults elsewhere.
    #[must_use]
    pub fn with_max_threads(max_threads: usize) -> Self {
        Self {
            max_threads,
            ..Self::default()
        }
    }

    /// Parse a scheduler section from JSON and validate it.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate().map_err(ConfigError::Invalid)?;
        Ok(cfg)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_threads == 0 {
            return Err("max_threads must be greater than 0".into());
        }
        if self.join_timeout_ms == Some(0) {
            return Err("join_timeout_ms must be greater than 0 when set".into());
        }
        if self.critical_section_timeout_ms == 0 {
            return Err("critical_section_timeout_ms must be greater than 0".into());
        }
        if self.thread_name.trim().is_empty() {
            return Err("thread_name must not be empty".into());
        }
        Ok(())
    }

    /// Join timeout as a duration.
    #[must_use]
    pub fn join_timeout(&self) -> Option<Duration> {
        self.join_timeout_ms.map(Duration::from_millis)
    }

    /// Control lock timeout as a duration.
    #[must_use]
    pub const fn critical_section_timeout(&self) -> Duration {
        Duration::from_millis(self.critical_section_timeout_ms)
    }
}

/// Launcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Bounded wait of the launcher lock.
    pub critical_section_timeout_ms: u64,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            critical_section_timeout_ms: 5_000,
        }
    }
}

impl LauncherConfig {
    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// A description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.critical_section_timeout_ms == 0 {
            return Err("critical_section_timeout_ms must be greater than 0".into());
        }
        Ok(())
    }

    /// Lock timeout as a duration.
    #[must_use]
    pub const fn critical_section_timeout(&self) -> Duration {
        Duration::from_millis(self.critical_section_timeout_ms)
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Scheduler section.
    pub scheduler: SchedulerConfig,
    /// Launcher section.
    pub launcher: LauncherConfig,
}

impl OrchestratorConfig {
    /// Validate both sections.
    ///
    /// # Errors
    ///
    /// A description of the first invalid value, prefixed with its section.
    pub fn validate(&self) -> Result<(), String> {
        self.scheduler
            .validate()
            .map_err(|e| format!("scheduler: {e}"))?;
        self.launcher
            .validate()
            .map_err(|e| format!("launcher: {e}"))?;
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields
    /// take their defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] or [`ConfigError::Invalid`].
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let cfg: Self =
            serde_json::from_str(input).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate().map_err(ConfigError::Invalid)?;
        Ok(cfg)
    }

    /// Defaults overridden by the process environment (after loading `.env`
    /// if present).
    ///
    /// # Errors
    ///
    /// [`ConfigError::Env`] for unparsable values, [`ConfigError::Invalid`]
    /// if the result does not validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is not an error.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden through `lookup(variable)`.
    ///
    /// # Errors
    ///
    /// As [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(value) = parse_var::<usize, _>(&lookup, ENV_MAX_THREADS)? {
            cfg.scheduler.max_threads = value;
        }
        if let Some(value) = parse_var::<u64, _>(&lookup, ENV_JOIN_TIMEOUT_MS)? {
            cfg.scheduler.join_timeout_ms = Some(value);
        }
        if let Some(value) = parse_var::<u64, _>(&lookup, ENV_LOCK_TIMEOUT_MS)? {
            cfg.scheduler.critical_section_timeout_ms = value;
            cfg.launcher.critical_section_timeout_ms = value;
        }
        cfg.validate().map_err(ConfigError::Invalid)?;
        Ok(cfg)
    }
}

fn parse_var<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .map(|value| {
            value.trim().parse::<T>().map_err(|_| ConfigError::Env {
                var: var.to_string(),
                value,
            })
        })
        .transpose()
}
