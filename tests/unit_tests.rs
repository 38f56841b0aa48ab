//! Unit tests for configuration, errors, builders, runtime helpers and
//! audit sinks. Test modules live under `tests/unit/`.

mod unit;
