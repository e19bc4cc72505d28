use std::time::{Instant, SystemTime};

/// Returns the current unix timestamp (seconds elapsed since 1970-01-01).
#[inline]
pub fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_secs()
}

/// Returns the current unix timestamp in milliseconds. Used to stamp wire-level keepalive
/// probes, which only need round-trip comparison, never wall-clock accuracy.
#[inline]
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Closed timelike curve, reality compromised")
        .as_millis() as u64
}

/// Monotonic tick source for housekeeping loops. Thin wrapper so call sites read
/// `Clock::now()` rather than importing `std::time::Instant` directly everywhere, and so
/// tests can freeze a fixed point in time without depending on wall-clock ordering.
#[derive(Debug, Copy, Clone)]
pub struct Clock(Instant);

impl Clock {
    #[inline]
    pub fn now() -> Clock {
        Clock(Instant::now())
    }

    #[inline]
    pub fn elapsed(&self) -> std::time::Duration {
        self.0.elapsed()
    }

    #[inline]
    pub fn duration_since(&self, earlier: Clock) -> std::time::Duration {
        self.0.duration_since(earlier.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_clock_monotonic() {
        let start = Clock::now();
        sleep(Duration::from_millis(5));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
