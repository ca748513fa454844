//! Monotonic task status transitions.
//!
//! `todo -> in_progress -> {done, failed}`. Repeating `in_progress` is how step
//! checkpoints are reported. A task may also fail straight from `todo` when it
//! cannot even be fetched.

use crate::core::types::TaskStatus;

/// Check whether the agent may report `next` after having reported `prev`.
///
/// `prev == None` means nothing has been reported for the task yet.
pub fn validate_transition(prev: Option<TaskStatus>, next: TaskStatus) -> Result<(), String> {
    let Some(prev) = prev else {
        return Ok(());
    };
    let allowed = match prev {
        TaskStatus::Todo => next != TaskStatus::Todo,
        TaskStatus::InProgress => next != TaskStatus::Todo,
        TaskStatus::Done | TaskStatus::Failed => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(format!("refusing status transition {prev} -> {next}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(validate_transition(None, TaskStatus::InProgress).is_ok());
        assert!(validate_transition(Some(TaskStatus::Todo), TaskStatus::InProgress).is_ok());
        assert!(validate_transition(Some(TaskStatus::InProgress), TaskStatus::InProgress).is_ok());
        assert!(validate_transition(Some(TaskStatus::InProgress), TaskStatus::Done).is_ok());
        assert!(validate_transition(Some(TaskStatus::InProgress), TaskStatus::Failed).is_ok());
        assert!(validate_transition(Some(TaskStatus::Todo), TaskStatus::Failed).is_ok());
    }

    #[test]
    fn reverse_and_post_terminal_transitions_are_refused() {
        let err = validate_transition(Some(TaskStatus::InProgress), TaskStatus::Todo).unwrap_err();
        assert!(err.contains("in_progress -> todo"));
        assert!(validate_transition(Some(TaskStatus::Done), TaskStatus::InProgress).is_err());
        assert!(validate_transition(Some(TaskStatus::Done), TaskStatus::Failed).is_err());
        assert!(validate_transition(Some(TaskStatus::Failed), TaskStatus::Done).is_err());
    }
}
