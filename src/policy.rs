//! Restart-count failure policy.
//!
//! A job is escalated to failure once its pod has restarted at least
//! `max_restart_count` times and the container's last termination exited
//! with exactly [`ESCALATION_EXIT_CODE`]. Other exit codes never escalate.

/// Exit code that, combined with the restart threshold, fails a job.
pub const ESCALATION_EXIT_CODE: i32 = 1;

pub fn should_escalate(restart_count: u32, max_restart_count: u32, exit_code: Option<i32>) -> bool {
    restart_count >= max_restart_count && exit_code == Some(ESCALATION_EXIT_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_at_threshold_with_exit_code_one() {
        assert!(should_escalate(2, 2, Some(1)));
        assert!(should_escalate(5, 2, Some(1)));
        assert!(should_escalate(0, 0, Some(1)));
    }

    #[test]
    fn does_not_escalate_below_threshold() {
        assert!(!should_escalate(0, 2, Some(1)));
        assert!(!should_escalate(1, 2, Some(1)));
    }

    #[test]
    fn does_not_escalate_for_other_exit_codes() {
        assert!(!should_escalate(3, 2, Some(0)));
        assert!(!should_escalate(3, 2, Some(2)));
        assert!(!should_escalate(3, 2, Some(137)));
        assert!(!should_escalate(3, 2, Some(-1)));
        assert!(!should_escalate(3, 2, None));
    }
}
