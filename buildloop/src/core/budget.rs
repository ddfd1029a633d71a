//! Wall-clock budget helpers for the cycle controller.

use std::time::{Duration, Instant};

/// Remaining time until `deadline`, zero once it has passed.
pub fn remaining_budget(deadline: Instant) -> Duration {
    deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::ZERO)
}

/// Clamp a call's default timeout to the remaining budget.
pub fn clamp_timeout(default: Duration, remaining: Duration) -> Duration {
    default.min(remaining)
}

/// A new cycle only starts while strictly more than `minimum` remains.
pub fn can_start_cycle(remaining: Duration, minimum: Duration) -> bool {
    remaining > minimum
}

/// Wall-clock budget for one run.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    started: Instant,
    deadline: Instant,
}

impl Budget {
    pub fn new(total: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started + total,
        }
    }

    pub fn remaining(&self) -> Duration {
        remaining_budget(self.deadline)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// `default` clamped to what is left of the budget.
    pub fn clamp(&self, default: Duration) -> Duration {
        clamp_timeout(default, self.remaining())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_takes_the_lesser_value() {
        let default = Duration::from_secs(900);
        assert_eq!(
            clamp_timeout(default, Duration::from_secs(400)),
            Duration::from_secs(400)
        );
        assert_eq!(clamp_timeout(default, Duration::from_secs(4000)), default);
    }

    #[test]
    fn below_minimum_does_not_start_a_cycle() {
        let minimum = Duration::from_secs(300);
        assert!(!can_start_cycle(Duration::from_secs(250), minimum));
        assert!(!can_start_cycle(minimum, minimum));
        assert!(can_start_cycle(Duration::from_secs(301), minimum));
    }

    #[test]
    fn passed_deadline_has_zero_remaining() {
        let deadline = Instant::now() - Duration::from_millis(5);
        assert_eq!(remaining_budget(deadline), Duration::ZERO);
    }

    #[test]
    fn budget_never_exceeds_total() {
        let budget = Budget::new(Duration::from_secs(60));
        assert!(budget.remaining() <= Duration::from_secs(60));
        assert!(budget.clamp(Duration::from_secs(900)) <= Duration::from_secs(60));
    }
}
