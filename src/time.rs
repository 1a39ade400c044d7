//! # Time
//!
//! Tick arithmetic shared by the kernel and the application.
//!
//! The kernel counts SysTick interrupts in a 64-bit [`Ticks`] value, so
//! overflow can be ignored for the lifetime of the device. Blocking operations
//! take a [`Timeout`]; periodic work uses a [`Cadence`].

use crate::config::TICK_HZ;

/// A point in time or an interval, measured in scheduler ticks.
pub type Ticks = u64;

/// Converts milliseconds to ticks, rounding down.
pub const fn ms_to_ticks(ms: u32) -> Ticks {
    ms as Ticks * TICK_HZ as Ticks / 1000
}

/// How long a blocking kernel operation may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Do not block at all.
    Immediate,
    /// Block for at most this many ticks.
    Ticks(Ticks),
    /// Block until the operation can complete.
    Forever,
}

impl Timeout {
    /// Absolute deadline for a wait starting at `now`. `None` means the wait
    /// has no deadline.
    pub fn deadline(self, now: Ticks) -> Option<Ticks> {
        match self {
            Timeout::Immediate => Some(now),
            Timeout::Ticks(t) => Some(now.saturating_add(t)),
            Timeout::Forever => None,
        }
    }
}

/// Advances a drift-free periodic deadline.
///
/// `previous` is the last wake target (or the start time). The next target is
/// always `previous + period`, independent of how late the caller is, and
/// `previous` is updated to it. Returns the target if it is still in the
/// future, or `None` if it has already passed and the caller should run again
/// immediately to catch up.
pub fn advance_deadline(previous: &mut Ticks, period: Ticks, now: Ticks) -> Option<Ticks> {
    let target = previous.saturating_add(period);
    *previous = target;
    if target > now {
        Some(target)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Cadence
// ---------------------------------------------------------------------------

/// How a periodic task computes its next wake time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadencePolicy {
    /// Each wake target is the previous target plus the period. Jitter in the
    /// task's own execution time does not accumulate.
    Periodic,
    /// Each wake target is "now" plus the period. Simpler, but every period
    /// is stretched by the time spent working.
    Relative,
}

/// Wake-time generator for a periodic task.
///
/// ```ignore
/// let mut cadence = Cadence::new(CadencePolicy::Periodic, 100, ctx.tick_count());
/// loop {
///     if let Some(t) = cadence.next_wake(ctx.tick_count()) {
///         ctx.sleep_until(t);
///     }
///     do_work();
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    policy: CadencePolicy,
    period: Ticks,
    last_wake: Ticks,
}

impl Cadence {
    /// Starts a cadence with `start` as its time reference.
    pub const fn new(policy: CadencePolicy, period: Ticks, start: Ticks) -> Self {
        Self {
            policy,
            period,
            last_wake: start,
        }
    }

    /// Next wake time, or `None` if the caller should not sleep at all.
    pub fn next_wake(&mut self, now: Ticks) -> Option<Ticks> {
        match self.policy {
            CadencePolicy::Periodic => advance_deadline(&mut self.last_wake, self.period, now),
            CadencePolicy::Relative => {
                if self.period == 0 {
                    return None;
                }
                self.last_wake = now.saturating_add(self.period);
                Some(self.last_wake)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_to_ticks_at_one_khz() {
        assert_eq!(ms_to_ticks(100), 100);
        assert_eq!(ms_to_ticks(0), 0);
    }

    #[test]
    fn timeout_deadlines() {
        assert_eq!(Timeout::Immediate.deadline(7), Some(7));
        assert_eq!(Timeout::Ticks(10).deadline(7), Some(17));
        assert_eq!(Timeout::Forever.deadline(7), None);
        assert_eq!(Timeout::Ticks(10).deadline(u64::MAX), Some(u64::MAX));
    }

    #[test]
    fn periodic_cadence_does_not_drift() {
        const PERIOD: Ticks = 100;
        let mut cadence = Cadence::new(CadencePolicy::Periodic, PERIOD, 0);
        let mut now = 0;
        let mut wakes = [0; 10];

        for (i, wake) in wakes.iter_mut().enumerate() {
            let target = cadence.next_wake(now).unwrap();
            *wake = target;
            // Work of varying length, always shorter than the period.
            now = target + (i as Ticks * 13) % PERIOD;
        }

        assert_eq!(wakes[9] - wakes[0], 9 * PERIOD);
        for pair in wakes.windows(2) {
            assert_eq!(pair[1] - pair[0], PERIOD);
        }
    }

    #[test]
    fn periodic_cadence_catches_up_after_overrun() {
        let mut cadence = Cadence::new(CadencePolicy::Periodic, 10, 0);
        assert_eq!(cadence.next_wake(0), Some(10));
        // The task overran by more than two periods.
        assert_eq!(cadence.next_wake(35), None);
        assert_eq!(cadence.next_wake(35), None);
        assert_eq!(cadence.next_wake(35), Some(40));
    }

    #[test]
    fn relative_cadence_accumulates_work_time() {
        let mut cadence = Cadence::new(CadencePolicy::Relative, 100, 0);
        assert_eq!(cadence.next_wake(0), Some(100));
        assert_eq!(cadence.next_wake(105), Some(205));
    }

    #[test]
    fn relative_cadence_with_zero_period_never_sleeps() {
        let mut cadence = Cadence::new(CadencePolicy::Relative, 0, 0);
        assert_eq!(cadence.next_wake(3), None);
    }
}
