//! Session lifecycle state machine
//!
//! ```text
//!  NotJoined
//!      |
//!      | join()
//!      V
//!   Joining
//!      |
//!      | SFU assigned demux id
//!      V
//!   Joined  <-----------+
//!      |                | connectivity restored
//!      | connectivity   |
//!      V   lost         |
//! Reconnecting ---------+
//!
//! Any state --> Ended (terminal)
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{GroupCallError, GroupCallResult};
use crate::types::{ConnectionStatus, GroupCallEndReason};

/// Forward-progressing status of a group call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    NotJoined,
    Joining,
    Joined,
    Reconnecting,
    Ended,
}

impl SessionStatus {
    /// Connection status the local device reports while in this state.
    pub fn connection_status(&self) -> ConnectionStatus {
        match self {
            SessionStatus::NotJoined => ConnectionStatus::Idle,
            SessionStatus::Joining => ConnectionStatus::Connecting,
            SessionStatus::Joined => ConnectionStatus::Connected,
            SessionStatus::Reconnecting => ConnectionStatus::Reconnecting,
            SessionStatus::Ended => ConnectionStatus::Ended,
        }
    }

    pub fn can_transition_to(&self, to: SessionStatus) -> bool {
        use SessionStatus::*;
        match (*self, to) {
            (Ended, _) => false,
            (_, Ended) => true,
            (NotJoined, Joining) => true,
            (Joining, Joined) => true,
            (Joined, Reconnecting) => true,
            (Reconnecting, Joined) => true,
            _ => false,
        }
    }

    /// Joined or trying to stay joined.
    pub fn is_in_call(&self) -> bool {
        matches!(self, SessionStatus::Joined | SessionStatus::Reconnecting)
    }
}

/// Owns the session status and the terminal reason.
#[derive(Debug, Clone)]
pub struct SessionLifecycle {
    status: SessionStatus,
    end_reason: Option<GroupCallEndReason>,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::NotJoined,
            end_reason: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn end_reason(&self) -> Option<GroupCallEndReason> {
        self.end_reason
    }

    pub fn is_ended(&self) -> bool {
        self.status == SessionStatus::Ended
    }

    /// Move to `to`, returning the previous status.
    ///
    /// Use [`SessionLifecycle::end`] to enter `Ended` so the reason is recorded.
    pub fn transition(&mut self, to: SessionStatus) -> GroupCallResult<SessionStatus> {
        if self.status == SessionStatus::Ended {
            return Err(GroupCallError::SessionEnded);
        }
        if to == SessionStatus::Ended || !self.status.can_transition_to(to) {
            return Err(GroupCallError::InvalidTransition { from: self.status, to });
        }
        let previous = self.status;
        self.status = to;
        debug!(from = ?previous, to = ?to, "Session status changed");
        Ok(previous)
    }

    /// Enter `Ended`. Returns `false` if the session had already ended.
    pub fn end(&mut self, reason: GroupCallEndReason) -> bool {
        if self.is_ended() {
            return false;
        }
        debug!(from = ?self.status, reason = %reason, "Session ended");
        self.status = SessionStatus::Ended;
        self.end_reason = Some(reason);
        true
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_path_and_reconnect_loop() {
        let mut lifecycle = SessionLifecycle::new();
        assert_eq!(lifecycle.transition(SessionStatus::Joining).unwrap(), SessionStatus::NotJoined);
        assert_eq!(lifecycle.transition(SessionStatus::Joined).unwrap(), SessionStatus::Joining);
        assert_eq!(lifecycle.transition(SessionStatus::Reconnecting).unwrap(), SessionStatus::Joined);
        assert_eq!(lifecycle.transition(SessionStatus::Joined).unwrap(), SessionStatus::Reconnecting);
        assert!(lifecycle.status().is_in_call());
    }

    #[test]
    fn test_rejects_skips_and_regressions() {
        let mut lifecycle = SessionLifecycle::new();
        assert!(matches!(
            lifecycle.transition(SessionStatus::Joined),
            Err(GroupCallError::InvalidTransition { .. })
        ));
        lifecycle.transition(SessionStatus::Joining).unwrap();
        assert!(lifecycle.transition(SessionStatus::NotJoined).is_err());
        assert!(lifecycle.transition(SessionStatus::Ended).is_err());
    }

    #[test]
    fn test_end_is_terminal_and_single() {
        let mut lifecycle = SessionLifecycle::new();
        lifecycle.transition(SessionStatus::Joining).unwrap();
        assert!(lifecycle.end(GroupCallEndReason::ConnectionFailure));
        assert!(!lifecycle.end(GroupCallEndReason::LeftNormally));
        assert_eq!(lifecycle.end_reason(), Some(GroupCallEndReason::ConnectionFailure));
        assert_eq!(lifecycle.transition(SessionStatus::Joined), Err(GroupCallError::SessionEnded));
        assert_eq!(lifecycle.status().connection_status(), ConnectionStatus::Ended);
    }

    #[test]
    fn test_every_state_may_end() {
        for status in [
            SessionStatus::NotJoined,
            SessionStatus::Joining,
            SessionStatus::Joined,
            SessionStatus::Reconnecting,
        ] {
            assert!(status.can_transition_to(SessionStatus::Ended));
        }
        assert!(!SessionStatus::Ended.can_transition_to(SessionStatus::Ended));
    }
}
