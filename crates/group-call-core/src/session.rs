//! Group call session coordinator
//!
//! [`GroupCallSession`] is the synchronous core of a group call. It owns the
//! lifecycle, the state store, the dispatcher and the request bookkeeping,
//! and it drives the [`CallTransport`]. It never awaits: asynchronous work is
//! queued as [`OutboundRequest`]s for the owner task to run, and results come
//! back through the `complete_*` methods tagged with the generation they
//! were issued under.
//!
//! Inputs accumulate until [`GroupCallSession::run_cycle`] turns them into
//! events, in this order:
//!
//! 1. proof and group member requests
//! 2. local device state
//! 3. remote device states
//! 4. audio levels
//! 5. low bandwidth edge
//! 6. reactions
//! 7. raised hands
//! 8. peek info
//! 9. speaking edges, one event each
//!
//! Ending the session flushes the pending cycle first, then delivers
//! `on_ended` as the final event.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::GroupCallConfig;
use crate::dispatcher::{DispatchStats, EventDispatcher, ObserverId};
use crate::error::{GroupCallError, GroupCallResult};
use crate::lifecycle::{SessionLifecycle, SessionStatus};
use crate::members::MemberResolver;
use crate::observer::{GroupCallEvent, GroupCallObserver};
use crate::peek::PeekController;
use crate::proof::ProofState;
use crate::store::SessionStateStore;
use crate::transport::{CallTransport, TransportEvent};
use crate::types::{
    ClientId, DemuxId, GroupCallEndReason, GroupMemberInfo, LocalDeviceState, MembershipProof,
    OpaqueUserId, PeekInfo, RemoteDeviceState,
};

/// Asynchronous work the owner task should start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundRequest {
    MembershipProof {
        generation: u64,
    },
    GroupMembers {
        generation: u64,
        opaque_user_ids: Vec<OpaqueUserId>,
    },
    Peek {
        generation: u64,
    },
}

impl OutboundRequest {
    pub fn generation(&self) -> u64 {
        match self {
            OutboundRequest::MembershipProof { generation }
            | OutboundRequest::GroupMembers { generation, .. }
            | OutboundRequest::Peek { generation } => *generation,
        }
    }
}

pub struct GroupCallSession {
    client_id: ClientId,
    config: GroupCallConfig,
    lifecycle: SessionLifecycle,
    store: SessionStateStore,
    dispatcher: EventDispatcher,
    proof: ProofState,
    members: MemberResolver,
    peek: PeekController,
    transport: Box<dyn CallTransport>,

    generation: u64,
    outbound: Vec<OutboundRequest>,
    request_events: Vec<GroupCallEvent>,
    peek_changed: Option<PeekInfo>,
    join_after_proof: bool,
    last_transport_signal: Instant,
}

impl GroupCallSession {
    pub fn new(
        client_id: ClientId,
        config: GroupCallConfig,
        transport: Box<dyn CallTransport>,
    ) -> GroupCallResult<Self> {
        config.validate()?;
        Ok(Self {
            client_id,
            lifecycle: SessionLifecycle::new(),
            store: SessionStateStore::new(config.speaking_threshold),
            dispatcher: EventDispatcher::new(client_id),
            proof: ProofState::new(),
            members: MemberResolver::new(config.max_member_cache_entries),
            peek: PeekController::new(config.peek_interval),
            transport,
            generation: 0,
            outbound: Vec::new(),
            request_events: Vec::new(),
            peek_changed: None,
            join_after_proof: false,
            last_transport_signal: Instant::now(),
            config,
        })
    }

    // ===== OBSERVERS =====

    pub fn add_observer(&mut self, observer: Arc<dyn GroupCallObserver>) -> ObserverId {
        self.dispatcher.add_observer(observer)
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.dispatcher.remove_observer(id)
    }

    // ===== ACCESSORS =====

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn status(&self) -> SessionStatus {
        self.lifecycle.status()
    }

    pub fn is_ended(&self) -> bool {
        self.lifecycle.is_ended()
    }

    pub fn end_reason(&self) -> Option<GroupCallEndReason> {
        self.lifecycle.end_reason()
    }

    /// Bumped when the session ends; completions from older generations are dropped.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn local_device_state(&self) -> &LocalDeviceState {
        self.store.local()
    }

    pub fn remote_devices(&self) -> Vec<RemoteDeviceState> {
        self.store.remote_devices().cloned().collect()
    }

    pub fn raised_hands(&self) -> Vec<DemuxId> {
        self.store.raised_hands().to_vec()
    }

    pub fn peek_info(&self) -> Option<&PeekInfo> {
        self.peek.latest()
    }

    pub fn peek_failures(&self) -> u64 {
        self.peek.failures()
    }

    pub fn proof_requests_issued(&self) -> u64 {
        self.proof.requests_issued()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    /// Drain the requests the owner task should start.
    pub fn take_outbound_requests(&mut self) -> Vec<OutboundRequest> {
        std::mem::take(&mut self.outbound)
    }

    // ===== LOCAL API =====

    /// Start joining. The transport is told to join as soon as a valid proof is held.
    pub fn join(&mut self) -> GroupCallResult<()> {
        self.lifecycle.transition(SessionStatus::Joining)?;
        self.store.set_connection_status(SessionStatus::Joining.connection_status());
        info!(client_id = self.client_id, "Joining group call");

        if self.proof.needs_refresh(Instant::now(), self.config.proof_refresh_margin) {
            self.join_after_proof = true;
            self.request_membership_proof();
            Ok(())
        } else {
            self.join_transport()
        }
    }

    pub fn leave(&mut self) -> GroupCallResult<()> {
        if self.is_ended() {
            return Err(GroupCallError::SessionEnded);
        }
        info!(client_id = self.client_id, "Leaving group call");
        if self.lifecycle.status() != SessionStatus::NotJoined {
            self.transport.leave();
        }
        self.end(GroupCallEndReason::LeftNormally);
        Ok(())
    }

    pub fn set_local_media(&mut self, audio_enabled: bool, video_enabled: bool) -> GroupCallResult<()> {
        if self.is_ended() {
            return Err(GroupCallError::SessionEnded);
        }
        if self.store.set_local_media(audio_enabled, video_enabled) {
            self.transport.set_local_media(audio_enabled, video_enabled);
        }
        Ok(())
    }

    /// End the session with `reason`.
    ///
    /// Anything already recorded is dispatched first. Then observers get
    /// `on_ended`, outstanding requests are invalidated and the state is torn
    /// down. Later calls are ignored.
    pub fn end(&mut self, reason: GroupCallEndReason) {
        if self.is_ended() {
            debug!(client_id = self.client_id, reason = %reason, "Session already ended");
            return;
        }

        self.run_cycle();
        self.lifecycle.end(reason);
        if reason.is_failure() {
            warn!(client_id = self.client_id, reason = %reason, "Group call ended");
        } else {
            info!(client_id = self.client_id, reason = %reason, "Group call ended");
        }
        self.dispatcher.dispatch(GroupCallEvent::Ended(reason));

        self.generation += 1;
        self.outbound.clear();
        self.request_events.clear();
        self.peek_changed = None;
        self.join_after_proof = false;
        self.proof.cancel();
        self.members.finish_request();
        self.peek.cancel();
        self.store.teardown();
    }

    // ===== TRANSPORT =====

    pub fn handle_transport_event(&mut self, event: TransportEvent, now: Instant) {
        if self.is_ended() {
            debug!(client_id = self.client_id, event = event.kind(), "Session ended, transport event dropped");
            return;
        }
        self.last_transport_signal = now;

        match event {
            TransportEvent::Joined { demux_id } => self.on_joined(demux_id),
            TransportEvent::ConnectionInterrupted => {
                if self.transition(SessionStatus::Reconnecting) {
                    warn!(client_id = self.client_id, "Connection interrupted, reconnecting");
                }
            }
            TransportEvent::ConnectionRestored => {
                if self.transition(SessionStatus::Joined) {
                    info!(client_id = self.client_id, "Connection restored");
                }
            }
            TransportEvent::RemoteDevices(deltas) => {
                let change = self.store.apply_remote_update(&deltas);
                if !change.added.is_empty() {
                    let members = &self.members;
                    self.store.apply_resolved_members(|opaque| members.lookup(opaque));
                    self.request_group_members();
                }
            }
            TransportEvent::AudioLevels {
                captured_level,
                received_levels,
            } => self.store.apply_audio_levels(captured_level, &received_levels),
            TransportEvent::Reaction(reaction) => {
                self.store.apply_reaction(reaction);
            }
            TransportEvent::RaisedHand { demux_id, raised } => {
                self.store.apply_raised_hand(demux_id, raised);
            }
            TransportEvent::LowBandwidthForVideo { low } => self.store.apply_low_bandwidth(low),
            TransportEvent::PeekHint => self.peek.request_now(),
            TransportEvent::ProofRejected => {
                warn!(client_id = self.client_id, "Transport rejected membership proof");
                self.proof.invalidate();
                self.request_membership_proof();
            }
            TransportEvent::Ended(reason) => self.end(reason),
        }
    }

    fn on_joined(&mut self, demux_id: DemuxId) {
        if let Some(current) = self.store.local().demux_id {
            if current != demux_id {
                warn!(client_id = self.client_id, current, assigned = demux_id, "Server changed demux id");
                self.end(GroupCallEndReason::ServerChangedDemuxId);
            }
            return;
        }
        if !self.transition(SessionStatus::Joined) {
            return;
        }
        info!(client_id = self.client_id, demux_id, "Joined group call");
        self.store.assign_local_demux_id(demux_id);
        self.peek.request_now();
    }

    fn transition(&mut self, to: SessionStatus) -> bool {
        match self.lifecycle.transition(to) {
            Ok(_) => {
                self.store.set_connection_status(to.connection_status());
                true
            }
            Err(e) => {
                warn!(client_id = self.client_id, error = %e, "Ignoring transport signal");
                false
            }
        }
    }

    fn join_transport(&mut self) -> GroupCallResult<()> {
        if let Err(e) = self.transport.join() {
            error!(client_id = self.client_id, error = %e, "Transport failed to join");
            self.end(GroupCallEndReason::ConnectionFailure);
            return Err(e);
        }
        Ok(())
    }

    // ===== TIMER =====

    /// Periodic work: proof refresh, peek scheduling and the remote device
    /// watchdog. Ends with a dispatch cycle.
    pub fn tick(&mut self, now: Instant) {
        if self.is_ended() {
            return;
        }

        let status = self.lifecycle.status();
        if (status.is_in_call() || self.join_after_proof)
            && self.proof.needs_refresh(now, self.config.proof_refresh_margin)
        {
            debug!(client_id = self.client_id, "Membership proof near expiry");
            self.request_membership_proof();
        }

        if self.peek.is_due(now) {
            self.peek.begin(now);
            self.outbound.push(OutboundRequest::Peek {
                generation: self.generation,
            });
        }

        if status.is_in_call()
            && now.saturating_duration_since(self.last_transport_signal) >= self.config.watchdog_interval
        {
            debug!(client_id = self.client_id, "No transport signal, requesting remote devices");
            self.transport.request_remote_devices();
            self.last_transport_signal = now;
        }

        self.run_cycle();
    }

    // ===== REQUESTS =====

    fn request_membership_proof(&mut self) {
        if !self.proof.begin_request() {
            debug!(client_id = self.client_id, "Membership proof request already in flight");
            return;
        }
        self.outbound.push(OutboundRequest::MembershipProof {
            generation: self.generation,
        });
        self.request_events.push(GroupCallEvent::MembershipProofRequested);
    }

    fn request_group_members(&mut self) {
        let mut opaque_user_ids = self.store.unresolved_opaque_user_ids();
        if let Some(peek) = self.peek.latest() {
            for opaque in peek.unresolved_opaque_user_ids() {
                if !opaque_user_ids.contains(&opaque) && self.members.lookup(&opaque).is_none() {
                    opaque_user_ids.push(opaque);
                }
            }
        }
        if opaque_user_ids.is_empty() {
            return;
        }
        if !self.members.begin_request() {
            debug!(client_id = self.client_id, "Group members request already in flight");
            return;
        }
        debug!(client_id = self.client_id, unresolved = opaque_user_ids.len(), "Requesting group members");
        self.outbound.push(OutboundRequest::GroupMembers {
            generation: self.generation,
            opaque_user_ids,
        });
        self.request_events.push(GroupCallEvent::GroupMembersRequested);
    }

    fn is_stale(&self, generation: u64, what: &str) -> bool {
        if generation != self.generation || self.is_ended() {
            debug!(
                client_id = self.client_id,
                generation,
                current = self.generation,
                completion = what,
                "Discarding stale completion"
            );
            return true;
        }
        false
    }

    pub fn complete_membership_proof(&mut self, generation: u64, result: GroupCallResult<MembershipProof>) {
        if self.is_stale(generation, "membership_proof") {
            return;
        }
        match result {
            Ok(proof) => {
                debug!(client_id = self.client_id, proof = ?proof, "Membership proof received");
                self.transport.set_membership_proof(&proof);
                self.proof.complete(proof);
                if std::mem::take(&mut self.join_after_proof) {
                    // The error is logged and the session already ended.
                    let _ = self.join_transport();
                }
            }
            Err(e) => {
                self.proof.fail();
                error!(client_id = self.client_id, error = %e, "Membership proof unavailable");
                self.end(GroupCallEndReason::ProofRejected);
            }
        }
    }

    pub fn complete_group_members(
        &mut self,
        generation: u64,
        result: GroupCallResult<Vec<GroupMemberInfo>>,
    ) {
        if self.is_stale(generation, "group_members") {
            return;
        }
        self.members.finish_request();
        match result {
            Ok(members) => {
                self.members.insert_all(members);
                let resolver = &self.members;
                let resolved = self.store.apply_resolved_members(|opaque| resolver.lookup(opaque));
                let unresolved = self.store.unresolved_opaque_user_ids().len();
                if unresolved > 0 {
                    debug!(
                        client_id = self.client_id,
                        resolved = resolved.len(),
                        unresolved,
                        "Partial roster, retrying on next peek"
                    );
                }
            }
            Err(e) => {
                warn!(client_id = self.client_id, error = %e, "Group members unavailable, retrying on next peek");
            }
        }
    }

    pub fn complete_peek(&mut self, generation: u64, result: GroupCallResult<PeekInfo>) {
        if self.is_stale(generation, "peek") {
            return;
        }
        let succeeded = result.is_ok();
        if let Some(info) = self.peek.complete(result) {
            self.peek_changed = Some(info);
        }
        if succeeded {
            self.request_group_members();
        }
    }

    // ===== DISPATCH =====

    /// Turn everything recorded since the last cycle into events. Returns the
    /// number of events dispatched.
    pub fn run_cycle(&mut self) -> usize {
        if self.dispatcher.is_inert() {
            return 0;
        }

        let mut events = std::mem::take(&mut self.request_events);
        let changes = self.store.take_changes();

        if let Some(local) = changes.local {
            events.push(GroupCallEvent::LocalDeviceStateChanged(local));
        }
        if let Some(remote) = changes.remote {
            events.push(GroupCallEvent::RemoteDeviceStatesChanged(remote));
        }
        if let Some((captured_level, received_levels)) = changes.audio_levels {
            events.push(GroupCallEvent::AudioLevels {
                captured_level,
                received_levels,
            });
        }
        if let Some(recovered) = changes.low_bandwidth {
            events.push(GroupCallEvent::LowBandwidthForVideo { recovered });
        }
        if let Some(reactions) = changes.reactions {
            events.push(GroupCallEvent::Reactions(reactions));
        }
        if let Some(raised_hands) = changes.raised_hands {
            events.push(GroupCallEvent::RaisedHands(raised_hands));
        }
        if let Some(peek_info) = self.peek_changed.take() {
            events.push(GroupCallEvent::PeekChanged(peek_info));
        }
        events.extend(changes.speech_events.into_iter().map(GroupCallEvent::Speaking));

        let count = events.len();
        for event in events {
            self.dispatcher.dispatch(event);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConnectionStatus, RemoteDeviceDelta};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct TransportLog {
        joins: usize,
        leaves: usize,
        proofs: usize,
        remote_device_requests: usize,
    }

    struct FakeTransport(Arc<Mutex<TransportLog>>);

    impl CallTransport for FakeTransport {
        fn set_membership_proof(&mut self, _proof: &MembershipProof) {
            self.0.lock().proofs += 1;
        }
        fn join(&mut self) -> GroupCallResult<()> {
            self.0.lock().joins += 1;
            Ok(())
        }
        fn leave(&mut self) {
            self.0.lock().leaves += 1;
        }
        fn request_remote_devices(&mut self) {
            self.0.lock().remote_device_requests += 1;
        }
        fn set_local_media(&mut self, _audio_enabled: bool, _video_enabled: bool) {}
    }

    fn session() -> (GroupCallSession, Arc<Mutex<TransportLog>>) {
        let log = Arc::new(Mutex::new(TransportLog::default()));
        let session = GroupCallSession::new(
            7,
            GroupCallConfig::default(),
            Box::new(FakeTransport(log.clone())),
        )
        .unwrap();
        (session, log)
    }

    fn proof() -> MembershipProof {
        MembershipProof::valid_for(vec![1, 2, 3], Duration::from_secs(3600))
    }

    #[test]
    fn test_join_waits_for_proof() {
        let (mut session, log) = session();
        session.join().unwrap();

        assert_eq!(
            session.take_outbound_requests(),
            vec![OutboundRequest::MembershipProof { generation: 0 }]
        );
        assert_eq!(log.lock().joins, 0);

        session.complete_membership_proof(0, Ok(proof()));
        assert_eq!(log.lock().proofs, 1);
        assert_eq!(log.lock().joins, 1);
        assert_eq!(session.local_device_state().connection_status, ConnectionStatus::Connecting);
    }

    #[test]
    fn test_join_twice_is_rejected() {
        let (mut session, _) = session();
        session.join().unwrap();
        assert!(matches!(session.join(), Err(GroupCallError::InvalidTransition { .. })));
    }

    #[test]
    fn test_proof_failure_ends_session() {
        let (mut session, _) = session();
        session.join().unwrap();
        session.complete_membership_proof(0, Err(GroupCallError::proof_unavailable("offline")));

        assert!(session.is_ended());
        assert_eq!(session.end_reason(), Some(GroupCallEndReason::ProofRejected));
        assert_eq!(session.generation(), 1);
    }

    #[test]
    fn test_stale_completion_is_discarded() {
        let (mut session, log) = session();
        session.join().unwrap();
        session.leave().unwrap();

        session.complete_membership_proof(0, Ok(proof()));
        session.complete_peek(0, Ok(PeekInfo::default()));
        assert_eq!(log.lock().proofs, 0);
        assert!(session.peek_info().is_none());
        assert_eq!(log.lock().leaves, 1);
    }

    #[test]
    fn test_demux_id_change_ends_session() {
        let (mut session, _) = session();
        session.join().unwrap();
        let now = Instant::now();
        session.handle_transport_event(TransportEvent::Joined { demux_id: 16 }, now);
        session.handle_transport_event(TransportEvent::Joined { demux_id: 16 }, now);
        assert!(!session.is_ended());

        session.handle_transport_event(TransportEvent::Joined { demux_id: 32 }, now);
        assert_eq!(session.end_reason(), Some(GroupCallEndReason::ServerChangedDemuxId));
    }

    #[test]
    fn test_watchdog_requests_remote_devices() {
        let (mut session, log) = session();
        session.join().unwrap();
        let start = Instant::now();
        session.handle_transport_event(TransportEvent::Joined { demux_id: 16 }, start);

        session.tick(start + Duration::from_secs(1));
        assert_eq!(log.lock().remote_device_requests, 0);

        session.tick(start + Duration::from_secs(2));
        assert_eq!(log.lock().remote_device_requests, 1);

        session.handle_transport_event(TransportEvent::PeekHint, start + Duration::from_secs(3));
        session.tick(start + Duration::from_secs(4));
        assert_eq!(log.lock().remote_device_requests, 1);
    }

    #[test]
    fn test_unknown_devices_trigger_member_request() {
        let (mut session, _) = session();
        session.join().unwrap();
        session.take_outbound_requests();

        session.handle_transport_event(
            TransportEvent::RemoteDevices(vec![RemoteDeviceDelta::Joined {
                demux_id: 32,
                opaque_user_id: b"opaque-bob".to_vec(),
            }]),
            Instant::now(),
        );
        assert_eq!(
            session.take_outbound_requests(),
            vec![OutboundRequest::GroupMembers {
                generation: 0,
                opaque_user_ids: vec![b"opaque-bob".to_vec()],
            }]
        );

        session.complete_group_members(
            0,
            Ok(vec![GroupMemberInfo {
                user_id: b"bob".to_vec(),
                opaque_user_id: b"opaque-bob".to_vec(),
            }]),
        );
        assert_eq!(session.remote_devices()[0].user_id, Some(b"bob".to_vec()));
    }
}
