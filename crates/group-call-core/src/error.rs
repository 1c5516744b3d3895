//! Error types for group call coordination

use thiserror::Error;

use crate::lifecycle::SessionStatus;

/// Result type for group call operations
pub type GroupCallResult<T> = Result<T, GroupCallError>;

/// Errors that can occur while coordinating a group call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GroupCallError {
    /// The proof provider could not supply a membership proof
    #[error("Membership proof unavailable: {reason}")]
    ProofUnavailable { reason: String },

    /// The group membership source could not resolve the roster
    #[error("Group members unavailable: {reason}")]
    MembersUnavailable { reason: String },

    /// Querying call occupancy failed
    #[error("Peek failed: {reason}")]
    PeekFailed { reason: String },

    /// Network or transport level failure
    #[error("Network error: {reason}")]
    NetworkError { reason: String },

    /// Lifecycle transition not allowed from the current state
    #[error("Invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: SessionStatus, to: SessionStatus },

    /// Operation attempted after the session ended
    #[error("Session has ended")]
    SessionEnded,

    /// Configuration value out of range
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Internal error
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl GroupCallError {
    pub fn proof_unavailable(reason: impl Into<String>) -> Self {
        Self::ProofUnavailable { reason: reason.into() }
    }

    pub fn members_unavailable(reason: impl Into<String>) -> Self {
        Self::MembersUnavailable { reason: reason.into() }
    }

    pub fn peek_failed(reason: impl Into<String>) -> Self {
        Self::PeekFailed { reason: reason.into() }
    }

    pub fn network(reason: impl Into<String>) -> Self {
        Self::NetworkError { reason: reason.into() }
    }

    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            GroupCallError::ProofUnavailable { .. }
            | GroupCallError::MembersUnavailable { .. }
            | GroupCallError::PeekFailed { .. }
            | GroupCallError::NetworkError { .. } => true,
            GroupCallError::InvalidTransition { .. }
            | GroupCallError::SessionEnded
            | GroupCallError::InvalidConfiguration { .. }
            | GroupCallError::InternalError { .. } => false,
        }
    }

    /// Short category used as a structured logging field.
    pub fn category(&self) -> &'static str {
        match self {
            GroupCallError::ProofUnavailable { .. } => "proof",
            GroupCallError::MembersUnavailable { .. } => "membership",
            GroupCallError::PeekFailed { .. } => "peek",
            GroupCallError::NetworkError { .. } => "network",
            GroupCallError::InvalidTransition { .. } | GroupCallError::SessionEnded => "lifecycle",
            GroupCallError::InvalidConfiguration { .. } => "configuration",
            GroupCallError::InternalError { .. } => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(GroupCallError::proof_unavailable("offline").is_recoverable());
        assert!(GroupCallError::peek_failed("timeout").is_recoverable());
        assert!(!GroupCallError::SessionEnded.is_recoverable());
        assert!(!GroupCallError::invalid_configuration("tick_interval", "zero").is_recoverable());
    }

    #[test]
    fn test_display_and_category() {
        let err = GroupCallError::InvalidTransition {
            from: SessionStatus::Ended,
            to: SessionStatus::Joined,
        };
        assert_eq!(err.to_string(), "Invalid transition from Ended to Joined");
        assert_eq!(err.category(), "lifecycle");
        assert_eq!(GroupCallError::members_unavailable("x").category(), "membership");
    }
}
