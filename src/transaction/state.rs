//! Saga FSM State Definitions
//!
//! States and step labels are stored as lowercase TEXT in `transaction_sagas`.

use std::fmt;

/// Saga FSM states
///
/// ```text
/// initiated → validating → validated → locking → locked → processing → completed
///                 ↓                        ↓                   ↓
///         validation_failed           lock_failed           failed
///                 ↘                        ↙
///                   compensating → compensated
///                         ↓
///                  compensate_failed
/// ```
///
/// Terminal states: `completed`, `failed`, `compensated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SagaState {
    Initiated,
    Validating,
    Validated,
    ValidationFailed,
    Locking,
    Locked,
    LockFailed,
    Processing,
    Completed,
    Failed,
    Compensating,
    Compensated,
    CompensateFailed,
}

impl SagaState {
    /// Check if this is a terminal state (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaState::Completed | SagaState::Failed | SagaState::Compensated
        )
    }

    /// Check if remote accounts may still be locked on behalf of this saga
    #[inline]
    pub fn may_hold_locks(&self) -> bool {
        matches!(
            self,
            SagaState::Locking
                | SagaState::Locked
                | SagaState::LockFailed
                | SagaState::Processing
                | SagaState::Compensating
                | SagaState::CompensateFailed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Initiated => "initiated",
            SagaState::Validating => "validating",
            SagaState::Validated => "validated",
            SagaState::ValidationFailed => "validation_failed",
            SagaState::Locking => "locking",
            SagaState::Locked => "locked",
            SagaState::LockFailed => "lock_failed",
            SagaState::Processing => "processing",
            SagaState::Completed => "completed",
            SagaState::Failed => "failed",
            SagaState::Compensating => "compensating",
            SagaState::Compensated => "compensated",
            SagaState::CompensateFailed => "compensate_failed",
        }
    }

    /// Convert from the stored label
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(SagaState::Initiated),
            "validating" => Some(SagaState::Validating),
            "validated" => Some(SagaState::Validated),
            "validation_failed" => Some(SagaState::ValidationFailed),
            "locking" => Some(SagaState::Locking),
            "locked" => Some(SagaState::Locked),
            "lock_failed" => Some(SagaState::LockFailed),
            "processing" => Some(SagaState::Processing),
            "completed" => Some(SagaState::Completed),
            "failed" => Some(SagaState::Failed),
            "compensating" => Some(SagaState::Compensating),
            "compensated" => Some(SagaState::Compensated),
            "compensate_failed" => Some(SagaState::CompensateFailed),
            _ => None,
        }
    }
}

impl fmt::Display for SagaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Label of the operation in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SagaStep {
    Validate,
    Lock,
    Process,
    Complete,
    Compensate,
}

impl SagaStep {
    /// Forward sequence, in execution order
    pub const FORWARD: [SagaStep; 4] = [
        SagaStep::Validate,
        SagaStep::Lock,
        SagaStep::Process,
        SagaStep::Complete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::Validate => "validate",
            SagaStep::Lock => "lock",
            SagaStep::Process => "process",
            SagaStep::Complete => "complete",
            SagaStep::Compensate => "compensate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "validate" => Some(SagaStep::Validate),
            "lock" => Some(SagaStep::Lock),
            "process" => Some(SagaStep::Process),
            "complete" => Some(SagaStep::Complete),
            "compensate" => Some(SagaStep::Compensate),
            _ => None,
        }
    }
}

impl fmt::Display for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATES: [SagaState; 13] = [
        SagaState::Initiated,
        SagaState::Validating,
        SagaState::Validated,
        SagaState::ValidationFailed,
        SagaState::Locking,
        SagaState::Locked,
        SagaState::LockFailed,
        SagaState::Processing,
        SagaState::Completed,
        SagaState::Failed,
        SagaState::Compensating,
        SagaState::Compensated,
        SagaState::CompensateFailed,
    ];

    #[test]
    fn test_terminal_states() {
        let terminal: Vec<_> = ALL_STATES.iter().filter(|s| s.is_terminal()).collect();
        assert_eq!(
            terminal,
            vec![
                &SagaState::Completed,
                &SagaState::Failed,
                &SagaState::Compensated
            ]
        );
    }

    #[test]
    fn test_lock_holding_states() {
        assert!(SagaState::Locked.may_hold_locks());
        assert!(SagaState::Processing.may_hold_locks());
        assert!(SagaState::CompensateFailed.may_hold_locks());

        assert!(!SagaState::Initiated.may_hold_locks());
        assert!(!SagaState::Validated.may_hold_locks());
        assert!(!SagaState::Completed.may_hold_locks());
    }

    #[test]
    fn test_state_label_parse() {
        for state in ALL_STATES {
            assert_eq!(SagaState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SagaState::parse("COMPLETED"), None);
        assert_eq!(SagaState::parse(""), None);
    }

    #[test]
    fn test_step_labels() {
        assert_eq!(SagaStep::Validate.to_string(), "validate");
        assert_eq!(SagaStep::parse("compensate"), Some(SagaStep::Compensate));
        assert_eq!(SagaStep::parse("rollback"), None);
        assert_eq!(SagaStep::FORWARD.len(), 4);
    }

    #[test]
    fn test_display() {
        assert_eq!(SagaState::ValidationFailed.to_string(), "validation_failed");
        assert_eq!(SagaState::CompensateFailed.to_string(), "compensate_failed");
    }
}
