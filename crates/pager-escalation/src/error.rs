//! Error types for the pager-escalation crate.

use thiserror::Error;

use crate::engine::EscalationState;

/// Errors that can occur while building, executing or persisting escalations.
#[derive(Debug, Error)]
pub enum EscalationError {
    /// A user, schedule, group or action referenced by a step no longer exists.
    #[error("{kind} not found: {id}")]
    MissingEntity {
        /// What kind of entity was referenced.
        kind: &'static str,
        /// The id that could not be resolved.
        id: String,
    },

    /// Invalid engine or registry configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// The reason the configuration is invalid.
        reason: String,
    },

    /// A collaborator failed to deliver a notification or trigger an action.
    #[error("dispatch failed: {reason}")]
    DispatchFailed {
        /// The reason the dispatch failed.
        reason: String,
    },

    /// No escalation document exists for the alert group.
    #[error("no escalation for alert group {id}")]
    NotFound {
        /// The alert group id.
        id: String,
    },

    /// The persisted document changed between read and write.
    #[error("write conflict for alert group {id}: expected revision {expected:?}, found {found:?}")]
    WriteConflict {
        /// The alert group id.
        id: String,
        /// Revision the writer read.
        expected: Option<u64>,
        /// Revision currently stored.
        found: Option<u64>,
    },

    /// The escalation state machine rejected a transition.
    #[error("invalid escalation transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: EscalationState,
        /// Requested state.
        to: EscalationState,
    },

    /// The snapshot store failed to read or write a document.
    #[error("storage error: {0}")]
    Storage(String),

    /// The delayed task queue refused a wake-up.
    #[error("queue error: {0}")]
    Queue(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl EscalationError {
    /// Shorthand for a [`EscalationError::MissingEntity`].
    pub fn missing(kind: &'static str, id: impl std::fmt::Display) -> Self {
        Self::MissingEntity {
            kind,
            id: id.to_string(),
        }
    }
}

impl From<serde_json::Error> for EscalationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for escalation operations.
pub type Result<T> = std::result::Result<T, EscalationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_missing_entity() {
        let err = EscalationError::missing("user", "U1");
        assert_eq!(err.to_string(), "user not found: U1");
    }

    #[test]
    fn error_display_write_conflict() {
        let err = EscalationError::WriteConflict {
            id: "AG1".to_string(),
            expected: Some(3),
            found: Some(4),
        };
        assert_eq!(
            err.to_string(),
            "write conflict for alert group AG1: expected revision Some(3), found Some(4)"
        );
    }

    #[test]
    fn error_display_invalid_transition() {
        let err = EscalationError::InvalidTransition {
            from: EscalationState::Stopped,
            to: EscalationState::Running,
        };
        assert_eq!(
            err.to_string(),
            "invalid escalation transition from stopped to running"
        );
    }

    #[test]
    fn error_from_serde_json() {
        let json_err = serde_json::from_str::<String>("invalid json");
        assert!(json_err.is_err());
        let err: EscalationError = json_err.unwrap_err().into();
        assert!(matches!(err, EscalationError::Serialization(_)));
    }
}
