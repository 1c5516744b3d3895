//! Membership proof provider
//!
//! The session asks its [`MembershipProofProvider`] for a proof before
//! joining, when the current proof is close to expiry, and when the
//! transport rejects the proof it holds. Only one request is in flight at a
//! time; [`ProofState`] tracks that along with the proof currently in use.

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::GroupCallResult;
use crate::types::{ClientId, MembershipProof};

/// Supplies membership proofs for a group.
#[async_trait]
pub trait MembershipProofProvider: Send + Sync {
    /// Fetch a fresh proof. Fail with
    /// [`GroupCallError::ProofUnavailable`](crate::error::GroupCallError::ProofUnavailable)
    /// when none can be produced right now.
    async fn request_membership_proof(&self, client_id: ClientId) -> GroupCallResult<MembershipProof>;
}

#[derive(Debug, Default)]
pub struct ProofState {
    current: Option<MembershipProof>,
    in_flight: bool,
    requests_issued: u64,
}

impl ProofState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&MembershipProof> {
        self.current.as_ref()
    }

    pub fn requests_issued(&self) -> u64 {
        self.requests_issued
    }

    /// Whether a new request should be issued at `now`.
    pub fn needs_refresh(&self, now: Instant, margin: Duration) -> bool {
        if self.in_flight {
            return false;
        }
        match &self.current {
            None => true,
            Some(proof) => proof.is_near_expiry(now, margin),
        }
    }

    /// Mark a request as issued. Returns `false` if one is already outstanding.
    pub fn begin_request(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        self.in_flight = true;
        self.requests_issued += 1;
        true
    }

    pub fn complete(&mut self, proof: MembershipProof) {
        self.in_flight = false;
        self.current = Some(proof);
    }

    pub fn fail(&mut self) {
        self.in_flight = false;
    }

    /// Forget the current proof, e.g. after the transport rejected it.
    pub fn invalidate(&mut self) {
        self.current = None;
    }

    pub fn cancel(&mut self) {
        self.in_flight = false;
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_request_in_flight() {
        let mut state = ProofState::new();
        let now = Instant::now();
        let margin = Duration::from_secs(30);

        assert!(state.needs_refresh(now, margin));
        assert!(state.begin_request());
        assert!(!state.begin_request());
        assert!(!state.needs_refresh(now, margin));

        state.complete(MembershipProof::new(vec![1], now + Duration::from_secs(120)));
        assert!(!state.needs_refresh(now, margin));
        assert!(state.needs_refresh(now + Duration::from_secs(100), margin));
        assert_eq!(state.requests_issued(), 1);
    }

    #[test]
    fn test_invalidate_forces_refresh() {
        let mut state = ProofState::new();
        let now = Instant::now();
        state.begin_request();
        state.complete(MembershipProof::new(vec![1], now + Duration::from_secs(600)));

        state.invalidate();
        assert!(state.current().is_none());
        assert!(state.needs_refresh(now, Duration::ZERO));
    }
}
