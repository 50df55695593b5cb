//! Relative timeout values.

use std::time::Duration;

/// A relative timeout, stored as whole nanoseconds.
///
/// The kernel wants timeouts as a `timespec` split; `as_secs_nanos`
/// produces that split with a non-negative nanosecond remainder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timeout {
    nanos: u64,
}

const NANOS_PER_SEC: u64 = 1_000_000_000;

impl Timeout {
    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self { nanos: millis * 1_000_000 }
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self { nanos: secs * NANOS_PER_SEC }
    }

    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    /// Seconds and remaining nanoseconds, `timespec`-style.
    pub const fn as_secs_nanos(&self) -> (i64, i64) {
        (
            (self.nanos / NANOS_PER_SEC) as i64,
            (self.nanos % NANOS_PER_SEC) as i64,
        )
    }

    pub const fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.nanos)
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self { nanos: d.as_nanos() as u64 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_seconds_and_nanos() {
        assert_eq!(Timeout::from_nanos(0).as_secs_nanos(), (0, 0));
        assert_eq!(Timeout::from_nanos(999_999_999).as_secs_nanos(), (0, 999_999_999));
        assert_eq!(Timeout::from_nanos(1_000_000_000).as_secs_nanos(), (1, 0));
        assert_eq!(Timeout::from_millis(1_500).as_secs_nanos(), (1, 500_000_000));
        assert_eq!(Timeout::from_secs(3).as_secs_nanos(), (3, 0));
    }

    #[test]
    fn duration_round_trip() {
        let t = Timeout::from(Duration::from_millis(250));
        assert_eq!(t.as_nanos(), 250_000_000);
        assert_eq!(t.as_duration(), Duration::from_millis(250));
    }
}
