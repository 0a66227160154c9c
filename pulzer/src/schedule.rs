//! Send pacing and status throttling.
//!
//! Heartbeats are paced against an anchored schedule: the target time of
//! tick `k` is always
//!
//! ```text
//! target(k) = start + k × interval        (k = 1, 2, 3, …)
//! ```
//!
//! and never "previous send + interval".  A late send therefore shortens the
//! following wait instead of shifting every later tick, and ticks that are
//! already overdue go out back-to-back until the loop has caught up.
//!
//! Everything here is a pure function of its inputs, so the transmitter can
//! be driven by tokio's paused clock in tests.

use std::time::Duration;

use tokio::time::Instant;

/// Status cadence in unpaced mode, where there is no interval to divide by.
pub const UNPACED_REPORT_EVERY: u64 = 10_000;

// Stand-in for targets too far out for the clock to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Anchored send schedule for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    start: Instant,
    interval: Duration,
}

impl Schedule {
    pub fn new(start: Instant, interval: Duration) -> Self {
        Self { start, interval }
    }

    /// `false` in throughput mode (zero interval).
    fn is_paced(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Target send time of 1-based tick `tick`, or `None` when unpaced.
    ///
    /// Targets beyond the range of [`Instant`] are clamped to a point decades
    /// away.
    pub fn target(&self, tick: u64) -> Option<Instant> {
        if !self.is_paced() {
            return None;
        }
        let target = self
            .start
            .checked_add(offset(self.interval, tick))
            .or_else(|| self.start.checked_add(FAR_FUTURE))
            .unwrap_or(self.start);
        Some(target)
    }

    /// How long to wait before `target`, or `None` if it is already due.
    pub fn wait_before(target: Instant, now: Instant) -> Option<Duration> {
        let remaining = target.saturating_duration_since(now);
        (!remaining.is_zero()).then_some(remaining)
    }
}

/// `interval × tick` computed in integer nanoseconds so that long runs do
/// not accumulate rounding error.
fn offset(interval: Duration, tick: u64) -> Duration {
    let nanos = interval.as_nanos().saturating_mul(u128::from(tick));
    let secs = (nanos / 1_000_000_000).min(u128::from(u64::MAX)) as u64;
    Duration::new(secs, (nanos % 1_000_000_000) as u32)
}

// ---------------------------------------------------------------------------
// Status throttle
// ---------------------------------------------------------------------------

/// Decides which packets get a status line.
///
/// At high packet rates printing every packet would make I/O the
/// bottleneck, so below `threshold` only every
/// `floor(threshold / interval)`-th packet is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusThrottle {
    every: u64,
}

impl StatusThrottle {
    pub fn new(interval: Duration, threshold: Duration) -> Self {
        let every = if interval.is_zero() {
            UNPACED_REPORT_EVERY
        } else if interval < threshold {
            let every = threshold.as_nanos() / interval.as_nanos();
            u64::try_from(every).unwrap_or(u64::MAX).max(1)
        } else {
            1
        };
        Self { every }
    }

    pub fn every(&self) -> u64 {
        self.every
    }

    /// `packets_sent` is the 1-based count including the packet just sent.
    pub fn should_report(&self, packets_sent: u64) -> bool {
        packets_sent % self.every == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn targets_are_anchored_at_start() {
        let start = Instant::now();
        let schedule = Schedule::new(start, MS * 100);
        assert_eq!(schedule.target(1), Some(start + MS * 100));
        assert_eq!(schedule.target(10), Some(start + MS * 1000));
        assert_eq!(schedule.target(36_000), Some(start + Duration::from_secs(3600)));
    }

    #[test]
    fn fractional_interval_does_not_drift() {
        let start = Instant::now();
        let schedule = Schedule::new(start, Duration::from_micros(333));
        // 3000 ticks of 333µs is exactly 999ms, not 999ms ± accumulated error
        assert_eq!(schedule.target(3000), Some(start + MS * 999));
    }

    #[test]
    fn unrepresentable_target_is_clamped() {
        let start = Instant::now();
        let schedule = Schedule::new(start, MS * u32::MAX);
        let target = schedule.target(u64::MAX).unwrap();
        assert!(target > start + Duration::from_secs(86_400 * 365));
    }

    #[test]
    fn unpaced_schedule_has_no_targets() {
        let schedule = Schedule::new(Instant::now(), Duration::ZERO);
        assert!(!schedule.is_paced());
        assert_eq!(schedule.target(1), None);
    }

    #[test]
    fn wait_before_future_target() {
        let now = Instant::now();
        assert_eq!(Schedule::wait_before(now + MS * 40, now), Some(MS * 40));
    }

    #[test]
    fn no_wait_for_due_or_overdue_target() {
        let now = Instant::now() + Duration::from_secs(1);
        assert_eq!(Schedule::wait_before(now, now), None);
        assert_eq!(Schedule::wait_before(now - MS * 5, now), None);
    }

    #[test]
    fn throttle_at_high_rate() {
        let throttle = StatusThrottle::new(MS * 10, MS * 100);
        assert_eq!(throttle.every(), 10);
        let reported: Vec<u64> = (1..=35).filter(|&n| throttle.should_report(n)).collect();
        assert_eq!(reported, vec![10, 20, 30]);
    }

    #[test]
    fn throttle_rounds_down() {
        assert_eq!(StatusThrottle::new(MS * 30, MS * 100).every(), 3);
        assert_eq!(StatusThrottle::new(Duration::from_micros(500), MS * 100).every(), 200);
    }

    #[test]
    fn no_throttle_at_low_rate() {
        let throttle = StatusThrottle::new(MS * 500, MS * 100);
        assert_eq!(throttle.every(), 1);
        assert!((1..=5).all(|n| throttle.should_report(n)));
        assert_eq!(StatusThrottle::new(MS * 100, MS * 100).every(), 1);
    }

    #[test]
    fn unpaced_throttle_uses_fixed_cadence() {
        let throttle = StatusThrottle::new(Duration::ZERO, MS * 100);
        assert_eq!(throttle.every(), UNPACED_REPORT_EVERY);
        assert!(!throttle.should_report(1));
        assert!(throttle.should_report(UNPACED_REPORT_EVERY));
    }
}
