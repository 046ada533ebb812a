//! Sequential completion gate.
//!
//! A funnel step may complete only in order: step 1 is always eligible, step
//! N requires step N-1 already completed by the same session. Completions are
//! permanent, so the gate only ever consults the set of completed step
//! numbers.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The step may be recorded now.
    Allowed,
    /// The session already completed this step; recording again is a no-op.
    AlreadyCompleted,
    /// The predecessor has not been completed yet.
    Blocked { required_step: u32 },
}

/// Decide whether `step_number` may complete given the session's completed
/// step numbers for the same funnel.
///
/// "Already completed" is checked before the order rule, so a re-fired step
/// reports `AlreadyCompleted` even when its predecessor check would pass.
pub fn evaluate(step_number: u32, completed: &BTreeSet<u32>) -> GateDecision {
    if completed.contains(&step_number) {
        return GateDecision::AlreadyCompleted;
    }
    if step_number <= 1 {
        return GateDecision::Allowed;
    }
    let required = step_number - 1;
    if completed.contains(&required) {
        GateDecision::Allowed
    } else {
        GateDecision::Blocked {
            required_step: required,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(nums: &[u32]) -> BTreeSet<u32> {
        nums.iter().copied().collect()
    }

    #[test]
    fn first_step_always_allowed() {
        assert_eq!(evaluate(1, &set(&[])), GateDecision::Allowed);
    }

    #[test]
    fn later_step_blocked_without_predecessor() {
        assert_eq!(
            evaluate(2, &set(&[])),
            GateDecision::Blocked { required_step: 1 }
        );
        assert_eq!(
            evaluate(4, &set(&[1, 2])),
            GateDecision::Blocked { required_step: 3 }
        );
    }

    #[test]
    fn later_step_allowed_with_predecessor() {
        assert_eq!(evaluate(2, &set(&[1])), GateDecision::Allowed);
        assert_eq!(evaluate(3, &set(&[1, 2])), GateDecision::Allowed);
    }

    #[test]
    fn repeat_completion_reports_already_completed() {
        assert_eq!(evaluate(1, &set(&[1])), GateDecision::AlreadyCompleted);
        assert_eq!(evaluate(2, &set(&[1, 2])), GateDecision::AlreadyCompleted);
    }

    #[test]
    fn already_completed_wins_over_blocked() {
        // Step 3 recorded historically even though 2 is missing (e.g. the
        // funnel was re-ordered after the fact). Re-firing 3 is still a
        // duplicate, not a block.
        assert_eq!(evaluate(3, &set(&[3])), GateDecision::AlreadyCompleted);
    }

    #[test]
    fn skipping_ahead_is_blocked() {
        assert_eq!(
            evaluate(3, &set(&[1])),
            GateDecision::Blocked { required_step: 2 }
        );
    }
}
