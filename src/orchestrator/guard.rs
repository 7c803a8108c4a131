use std::collections::HashSet;

use super::trace::OutcomeStatus;
use crate::tools::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    Proceed,
    SkipDuplicate,
    SkipStreak,
}

impl GuardVerdict {
    pub fn rejection_status(self) -> Option<OutcomeStatus> {
        match self {
            GuardVerdict::Proceed => None,
            GuardVerdict::SkipDuplicate => Some(OutcomeStatus::SkippedDuplicate),
            GuardVerdict::SkipStreak => Some(OutcomeStatus::SkippedStreak),
        }
    }
}

/// Per-turn duplicate and read-streak bookkeeping.
///
/// Every read-only action that reaches [`TurnGuard::check`] extends the
/// streak, rejected or not; only an applied mutation resets it. Once the cap
/// trips, every later read-only action in the turn is rejected.
#[derive(Debug)]
pub struct TurnGuard {
    read_streak_cap: usize,
    read_streak: usize,
    tripped: bool,
    applied: HashSet<Action>,
}

impl TurnGuard {
    pub fn new(read_streak_cap: usize) -> Self {
        Self {
            read_streak_cap: read_streak_cap.max(1),
            read_streak: 0,
            tripped: false,
            applied: HashSet::new(),
        }
    }

    pub fn check(&mut self, action: &Action, read_only: bool) -> GuardVerdict {
        if read_only {
            if self.tripped || self.read_streak + 1 > self.read_streak_cap {
                self.tripped = true;
                return GuardVerdict::SkipStreak;
            }
            self.read_streak += 1;
        }

        if self.applied.contains(action) {
            return GuardVerdict::SkipDuplicate;
        }
        GuardVerdict::Proceed
    }

    /// Note the outcome of an action that passed [`TurnGuard::check`].
    pub fn record(&mut self, action: &Action, read_only: bool, status: OutcomeStatus) {
        if status != OutcomeStatus::Applied {
            return;
        }
        self.applied.insert(action.clone());
        if !read_only {
            self.read_streak = 0;
        }
    }

    /// Whether the read streak cap has been hit this turn.
    pub fn tripped(&self) -> bool {
        self.tripped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(date: &str) -> Action {
        Action::new("get_daily_summary", [("date", date)])
    }

    fn write(name: &str) -> Action {
        Action::new("create_custom_task", [("date", "2026-10-18"), ("name", name)])
    }

    fn run(guard: &mut TurnGuard, action: &Action, read_only: bool) -> GuardVerdict {
        let verdict = guard.check(action, read_only);
        if verdict == GuardVerdict::Proceed {
            guard.record(action, read_only, OutcomeStatus::Applied);
        }
        verdict
    }

    #[test]
    fn identical_applied_action_is_a_duplicate() {
        let mut guard = TurnGuard::new(3);
        assert_eq!(run(&mut guard, &write("Dentist"), false), GuardVerdict::Proceed);
        assert_eq!(run(&mut guard, &write("Dentist"), false), GuardVerdict::SkipDuplicate);
        assert_eq!(run(&mut guard, &write("Gym"), false), GuardVerdict::Proceed);
    }

    #[test]
    fn failed_actions_do_not_count_as_applied() {
        let mut guard = TurnGuard::new(3);
        let action = write("Dentist");
        assert_eq!(guard.check(&action, false), GuardVerdict::Proceed);
        guard.record(&action, false, OutcomeStatus::Error);
        assert_eq!(guard.check(&action, false), GuardVerdict::Proceed);
    }

    #[test]
    fn read_streak_trips_and_stays_tripped() {
        let mut guard = TurnGuard::new(2);
        assert_eq!(run(&mut guard, &read("2026-10-17"), true), GuardVerdict::Proceed);
        assert_eq!(run(&mut guard, &read("2026-10-18"), true), GuardVerdict::Proceed);
        assert_eq!(run(&mut guard, &read("2026-10-19"), true), GuardVerdict::SkipStreak);
        assert!(guard.tripped());

        // A mutation still goes through, but reads stay blocked
        assert_eq!(run(&mut guard, &write("Dentist"), false), GuardVerdict::Proceed);
        assert_eq!(run(&mut guard, &read("2026-10-20"), true), GuardVerdict::SkipStreak);
    }

    #[test]
    fn applied_mutation_resets_the_streak() {
        let mut guard = TurnGuard::new(2);
        run(&mut guard, &read("2026-10-17"), true);
        run(&mut guard, &read("2026-10-18"), true);
        run(&mut guard, &write("Dentist"), false);
        assert_eq!(run(&mut guard, &read("2026-10-19"), true), GuardVerdict::Proceed);
        assert_eq!(run(&mut guard, &read("2026-10-20"), true), GuardVerdict::Proceed);
        assert!(!guard.tripped());
    }

    #[test]
    fn repeated_reads_count_towards_the_streak() {
        let mut guard = TurnGuard::new(2);
        assert_eq!(run(&mut guard, &read("2026-10-17"), true), GuardVerdict::Proceed);
        assert_eq!(run(&mut guard, &read("2026-10-17"), true), GuardVerdict::SkipDuplicate);
        assert_eq!(run(&mut guard, &read("2026-10-17"), true), GuardVerdict::SkipStreak);
    }
}
