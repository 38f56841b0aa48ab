//! Tests for configuration validation and loading

use std::collections::HashMap;
use std::time::Duration;

use prometheus_orchestrator::config::{
    LauncherConfig, OrchestratorConfig, SchedulerConfig, ENV_JOIN_TIMEOUT_MS,
    ENV_LOCK_TIMEOUT_MS, ENV_MAX_THREADS,
};
use prometheus_orchestrator::core::ConfigError;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |var: &str| vars.get(var).cloned()
}

#[test]
fn test_defaults_are_valid() {
    let cfg = OrchestratorConfig::default();
    assert!(cfg.validate().is_ok());
    assert!(cfg.scheduler.max_threads >= 1);
    assert_eq!(cfg.scheduler.join_timeout(), Some(Duration::from_secs(5)));
    assert_eq!(cfg.scheduler.thread_name, "scheduled-task");
    assert_eq!(
        cfg.launcher.critical_section_timeout(),
        Duration::from_secs(5)
    );
}

#[test]
fn test_scheduler_config_invalid_values() {
    let zero = SchedulerConfig::with_max_threads(0);
    assert_eq!(
        zero.validate().unwrap_err(),
        "max_threads must be greater than 0"
    );

    let mut cfg = SchedulerConfig::with_max_threads(2);
    cfg.join_timeout_ms = Some(0);
    assert!(cfg.validate().is_err());
    cfg.join_timeout_ms = None;
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.join_timeout(), None);

    cfg.thread_name = "  ".to_string();
    assert_eq!(cfg.validate().unwrap_err(), "thread_name must not be empty");
}

#[test]
fn test_orchestrator_validation_names_the_section() {
    let cfg = OrchestratorConfig {
        scheduler: SchedulerConfig::default(),
        launcher: LauncherConfig {
            critical_section_timeout_ms: 0,
        },
    };
    assert_eq!(
        cfg.validate().unwrap_err(),
        "launcher: critical_section_timeout_ms must be greater than 0"
    );
}

#[test]
fn test_from_json_fills_missing_fields() {
    let cfg = OrchestratorConfig::from_json_str(
        r#"{ "scheduler": { "max_threads": 3, "join_timeout_ms": null } }"#,
    )
    .unwrap();
    assert_eq!(cfg.scheduler.max_threads, 3);
    assert_eq!(cfg.scheduler.join_timeout_ms, None);
    assert_eq!(cfg.launcher, LauncherConfig::default());

    let scheduler = SchedulerConfig::from_json_str(r#"{ "thread_name": "io" }"#).unwrap();
    assert_eq!(scheduler.thread_name, "io");
}

#[test]
fn test_from_json_errors() {
    assert!(matches!(
        OrchestratorConfig::from_json_str("{ not json"),
        Err(ConfigError::Parse(_))
    ));
    assert_eq!(
        SchedulerConfig::from_json_str(r#"{ "max_threads": 0 }"#),
        Err(ConfigError::Invalid(
            "max_threads must be greater than 0".to_string()
        ))
    );
}

#[test]
fn test_from_lookup_overrides() {
    let cfg = OrchestratorConfig::from_lookup(lookup(&[
        (ENV_MAX_THREADS, "6"),
        (ENV_JOIN_TIMEOUT_MS, " 250 "),
        (ENV_LOCK_TIMEOUT_MS, "100"),
    ]))
    .unwrap();
    assert_eq!(cfg.scheduler.max_threads, 6);
    assert_eq!(cfg.scheduler.join_timeout(), Some(Duration::from_millis(250)));
    assert_eq!(cfg.scheduler.critical_section_timeout_ms, 100);
    assert_eq!(cfg.launcher.critical_section_timeout_ms, 100);

    let untouched = OrchestratorConfig::from_lookup(lookup(&[])).unwrap();
    assert_eq!(untouched, OrchestratorConfig::default());
}

#[test]
fn test_from_lookup_rejects_bad_values() {
    assert_eq!(
        OrchestratorConfig::from_lookup(lookup(&[(ENV_MAX_THREADS, "many")])),
        Err(ConfigError::Env {
            var: ENV_MAX_THREADS.to_string(),
            value: "many".to_string(),
        })
    );
    assert!(matches!(
        OrchestratorConfig::from_lookup(lookup(&[(ENV_MAX_THREADS, "0")])),
        Err(ConfigError::Invalid(_))
    ));
}
