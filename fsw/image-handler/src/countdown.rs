// Licensed under the Apache-2.0 license

/// Millisecond time base of the flight software.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Budget of the running task period. Long operations poll it between steps
/// and yield once it has run out.
pub trait Countdown {
    fn has_timed_out(&self) -> bool;
}

pub struct PeriodCountdown<'c, C: Clock + ?Sized> {
    clock: &'c C,
    deadline_ms: u64,
}

impl<'c, C: Clock + ?Sized> PeriodCountdown<'c, C> {
    pub fn start(clock: &'c C, budget_ms: u32) -> Self {
        PeriodCountdown {
            clock,
            deadline_ms: clock.now_ms().saturating_add(budget_ms as u64),
        }
    }

    pub fn remaining_ms(&self) -> u64 {
        self.deadline_ms.saturating_sub(self.clock.now_ms())
    }
}

impl<C: Clock + ?Sized> Countdown for PeriodCountdown<'_, C> {
    fn has_timed_out(&self) -> bool {
        self.clock.now_ms() >= self.deadline_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct ManualClock(Cell<u64>);

    impl Clock for ManualClock {
        fn now_ms(&self) -> u64 {
            self.0.get()
        }
    }

    #[test]
    fn test_countdown_expires_at_deadline() {
        let clock = ManualClock(Cell::new(1_000));
        let countdown = PeriodCountdown::start(&clock, 300);
        assert!(!countdown.has_timed_out());
        assert_eq!(countdown.remaining_ms(), 300);

        clock.0.set(1_299);
        assert!(!countdown.has_timed_out());
        clock.0.set(1_300);
        assert!(countdown.has_timed_out());
        assert_eq!(countdown.remaining_ms(), 0);
    }

    #[test]
    fn test_zero_budget_is_already_expired() {
        let clock = ManualClock(Cell::new(5));
        assert!(PeriodCountdown::start(&clock, 0).has_timed_out());
    }
}
