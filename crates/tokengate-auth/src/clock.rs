//! Time source for cache freshness and token expiry checks
//!
//! Caches and the verifier take an `Arc<dyn Clock>` so tests can drive time
//! explicitly with [`ManualClock`].

use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current wall-clock time
pub trait Clock: Send + Sync + Debug {
    /// Current time
    fn now(&self) -> SystemTime;

    /// Current time as whole seconds since the Unix epoch
    fn unix_seconds(&self) -> u64 {
        self.now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// The operating system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that only moves when told to
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use tokengate_auth::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::at_unix(1_700_000_000);
/// clock.advance(Duration::from_secs(601));
/// assert_eq!(clock.unix_seconds(), 1_700_000_601);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at the given Unix timestamp (seconds)
    pub fn at_unix(seconds: u64) -> Self {
        Self {
            millis: AtomicU64::new(seconds.saturating_mul(1000)),
        }
    }

    /// Create a clock frozen at the current system time
    pub fn starting_now() -> Self {
        Self::at_unix(SystemClock.unix_seconds())
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Jump to an absolute Unix timestamp (seconds); may move backwards
    pub fn set_unix(&self, seconds: u64) {
        self.millis
            .store(seconds.saturating_mul(1000), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::at_unix(1_000);
        assert_eq!(clock.unix_seconds(), 1_000);

        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.unix_seconds(), 1_010);

        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.unix_seconds(), 1_010);
        assert_eq!(
            clock.now(),
            UNIX_EPOCH + Duration::from_millis(1_010_500)
        );
    }

    #[test]
    fn test_manual_clock_set_backwards() {
        let clock = ManualClock::at_unix(2_000);
        clock.set_unix(1_500);
        assert_eq!(clock.unix_seconds(), 1_500);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // After Nov 2023
        assert!(SystemClock.unix_seconds() > 1_700_000_000);
    }
}
