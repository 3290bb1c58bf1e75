//! Time-related utilities

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Get the current system time in nanoseconds since UNIX epoch
pub fn system_time_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Seconds elapsed from `earlier` to `later`, as a float.
///
/// Returns 0.0 when `later` precedes `earlier`.
pub fn elapsed_secs(earlier: Instant, later: Instant) -> f64 {
    later
        .checked_duration_since(earlier)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_system_time() {
        let nanos = system_time_nanos();

        // After 2020
        assert!(nanos > 1_600_000_000 * 1_000_000_000);
    }

    #[test]
    fn test_elapsed_secs_ordering() {
        let start = Instant::now();
        let later = start + Duration::from_millis(1500);

        assert!((elapsed_secs(start, later) - 1.5).abs() < 1e-9);
        assert_eq!(elapsed_secs(later, start), 0.0);
    }
}
