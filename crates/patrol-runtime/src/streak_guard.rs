//! [`StreakGuard`] – notices when the patrol keeps failing to reach waypoints.
//!
//! Purely advisory: the cycle always continues.  The guard only tells the
//! driver when to raise its voice.
//!
//! ```rust
//! use patrol_runtime::streak_guard::StreakGuard;
//! use patrol_types::GoalOutcome;
//!
//! let mut guard = StreakGuard::new(2);
//! assert_eq!(guard.record(GoalOutcome::TimedOut), None);
//! assert_eq!(guard.record(GoalOutcome::Rejected), Some(2));
//! assert_eq!(guard.record(GoalOutcome::Completed), None);
//! assert_eq!(guard.streak(), 0);
//! ```

use patrol_types::GoalOutcome;

/// Counts consecutive goals that did not end in [`GoalOutcome::Completed`].
#[derive(Debug, Clone)]
pub struct StreakGuard {
    /// Streak length that starts triggering.  Zero disables the guard.
    threshold: usize,
    streak: usize,
}

impl StreakGuard {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold,
            streak: 0,
        }
    }

    /// Record a finished goal.
    ///
    /// Returns the current streak length once it has reached the threshold,
    /// and keeps returning it for every further failure.
    pub fn record(&mut self, outcome: GoalOutcome) -> Option<usize> {
        if outcome == GoalOutcome::Completed {
            self.streak = 0;
            return None;
        }
        self.streak += 1;
        (self.threshold > 0 && self.streak >= self.threshold).then_some(self.streak)
    }

    pub fn streak(&self) -> usize {
        self.streak
    }

    pub fn reset(&mut self) {
        self.streak = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_at_threshold_and_beyond() {
        let mut guard = StreakGuard::new(3);
        assert_eq!(guard.record(GoalOutcome::TimedOut), None);
        assert_eq!(guard.record(GoalOutcome::Aborted), None);
        assert_eq!(guard.record(GoalOutcome::Rejected), Some(3));
        assert_eq!(guard.record(GoalOutcome::Canceled), Some(4));
    }

    #[test]
    fn completion_resets_streak() {
        let mut guard = StreakGuard::new(2);
        guard.record(GoalOutcome::TimedOut);
        assert_eq!(guard.record(GoalOutcome::Completed), None);
        assert_eq!(guard.streak(), 0);
        assert_eq!(guard.record(GoalOutcome::TimedOut), None);
    }

    #[test]
    fn zero_threshold_never_triggers() {
        let mut guard = StreakGuard::new(0);
        for _ in 0..10 {
            assert_eq!(guard.record(GoalOutcome::Rejected), None);
        }
        assert_eq!(guard.streak(), 10);
        guard.reset();
        assert_eq!(guard.streak(), 0);
    }
}
