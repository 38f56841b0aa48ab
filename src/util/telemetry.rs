//! Telemetry helpers for structured logging and tracing.

/// Initialize tracing for the orchestrator. Embedding applications can
/// install their own subscriber first; this helper only installs the default
/// env-filtered fmt subscriber (`RUST_LOG`) if none is set.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();
}
