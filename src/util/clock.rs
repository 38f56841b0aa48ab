//! Wall-clock helpers used for TTL checks and audit timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// Seconds since the unix epoch, with sub-second precision.
///
/// Schedule record TTLs are expressed on this scale.
#[must_use]
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_scales_agree() {
        let secs = now_secs();
        let ms = now_ms();
        #[allow(clippy::cast_precision_loss)]
        let ms_as_secs = ms as f64 / 1000.0;
        assert!((ms_as_secs - secs).abs() < 5.0);
    }
}
