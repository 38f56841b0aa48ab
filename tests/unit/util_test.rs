//! Tests for utility functions

use prometheus_orchestrator::util::{init_tracing, now_ms, now_secs};

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialised twice");
}

#[test]
fn test_clock_moves_forward() {
    let before = now_ms();
    std::thread::sleep(std::time::Duration::from_millis(2));
    assert!(now_ms() >= before);
    assert!(now_secs() > 1_600_000_000.0);
}
