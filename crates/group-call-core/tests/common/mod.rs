// Shared helpers for group call integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use rvoip_group_call_core::*;

/// Observer that counts every callback and keeps the events in delivery order.
#[derive(Debug, Default)]
pub struct CountingObserver {
    pub request_membership_proof_invocations: AtomicUsize,
    pub request_group_members_invocations: AtomicUsize,
    pub on_local_device_state_changed_invocations: AtomicUsize,
    pub on_remote_device_states_changed_invocations: AtomicUsize,
    pub on_audio_levels_invocations: AtomicUsize,
    pub on_low_bandwidth_for_video_invocations: AtomicUsize,
    pub on_reactions_invocations: AtomicUsize,
    pub on_raised_hands_invocations: AtomicUsize,
    pub on_peek_changed_invocations: AtomicUsize,
    pub on_ended_invocations: AtomicUsize,
    pub on_speaking_notification_invocations: AtomicUsize,
    events: Mutex<Vec<GroupCallEvent>>,
}

impl CountingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, counter: &AtomicUsize, event: GroupCallEvent) {
        counter.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<GroupCallEvent> {
        self.events.lock().clone()
    }

    pub fn event_kinds(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.kind()).collect()
    }

    /// Forget everything seen so far, counters included.
    pub fn clear(&self) {
        for counter in [
            &self.request_membership_proof_invocations,
            &self.request_group_members_invocations,
            &self.on_local_device_state_changed_invocations,
            &self.on_remote_device_states_changed_invocations,
            &self.on_audio_levels_invocations,
            &self.on_low_bandwidth_for_video_invocations,
            &self.on_reactions_invocations,
            &self.on_raised_hands_invocations,
            &self.on_peek_changed_invocations,
            &self.on_ended_invocations,
            &self.on_speaking_notification_invocations,
        ] {
            counter.store(0, Ordering::SeqCst);
        }
        self.events.lock().clear();
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn ended_count(&self) -> usize {
        Self::count(&self.on_ended_invocations)
    }

    pub fn end_reason(&self) -> Option<GroupCallEndReason> {
        self.events.lock().iter().find_map(|e| match e {
            GroupCallEvent::Ended(reason) => Some(*reason),
            _ => None,
        })
    }
}

impl GroupCallObserver for CountingObserver {
    fn request_membership_proof(&self, _client_id: ClientId) {
        self.record(
            &self.request_membership_proof_invocations,
            GroupCallEvent::MembershipProofRequested,
        );
    }

    fn request_group_members(&self, _client_id: ClientId) {
        self.record(
            &self.request_group_members_invocations,
            GroupCallEvent::GroupMembersRequested,
        );
    }

    fn on_local_device_state_changed(&self, _client_id: ClientId, state: &LocalDeviceState) {
        self.record(
            &self.on_local_device_state_changed_invocations,
            GroupCallEvent::LocalDeviceStateChanged(state.clone()),
        );
    }

    fn on_remote_device_states_changed(&self, _client_id: ClientId, devices: &[RemoteDeviceState]) {
        self.record(
            &self.on_remote_device_states_changed_invocations,
            GroupCallEvent::RemoteDeviceStatesChanged(devices.to_vec()),
        );
    }

    fn on_audio_levels(
        &self,
        _client_id: ClientId,
        captured_level: AudioLevel,
        received_levels: &[ReceivedAudioLevel],
    ) {
        self.record(
            &self.on_audio_levels_invocations,
            GroupCallEvent::AudioLevels {
                captured_level,
                received_levels: received_levels.to_vec(),
            },
        );
    }

    fn on_low_bandwidth_for_video(&self, _client_id: ClientId, recovered: bool) {
        self.record(
            &self.on_low_bandwidth_for_video_invocations,
            GroupCallEvent::LowBandwidthForVideo { recovered },
        );
    }

    fn on_reactions(&self, _client_id: ClientId, reactions: &[Reaction]) {
        self.record(
            &self.on_reactions_invocations,
            GroupCallEvent::Reactions(reactions.to_vec()),
        );
    }

    fn on_raised_hands(&self, _client_id: ClientId, raised_hands: &[DemuxId]) {
        self.record(
            &self.on_raised_hands_invocations,
            GroupCallEvent::RaisedHands(raised_hands.to_vec()),
        );
    }

    fn on_peek_changed(&self, _client_id: ClientId, peek_info: &PeekInfo) {
        self.record(
            &self.on_peek_changed_invocations,
            GroupCallEvent::PeekChanged(peek_info.clone()),
        );
    }

    fn on_ended(&self, _client_id: ClientId, reason: GroupCallEndReason) {
        self.record(&self.on_ended_invocations, GroupCallEvent::Ended(reason));
    }

    fn on_speaking_notification(&self, _client_id: ClientId, event: &SpeechEvent) {
        self.record(
            &self.on_speaking_notification_invocations,
            GroupCallEvent::Speaking(event.clone()),
        );
    }
}

/// Observer that panics on every callback.
pub struct PanickingObserver;

impl GroupCallObserver for PanickingObserver {
    fn request_membership_proof(&self, _: ClientId) {
        panic!("request_membership_proof")
    }
    fn request_group_members(&self, _: ClientId) {
        panic!("request_group_members")
    }
    fn on_local_device_state_changed(&self, _: ClientId, _: &LocalDeviceState) {
        panic!("on_local_device_state_changed")
    }
    fn on_remote_device_states_changed(&self, _: ClientId, _: &[RemoteDeviceState]) {
        panic!("on_remote_device_states_changed")
    }
    fn on_audio_levels(&self, _: ClientId, _: AudioLevel, _: &[ReceivedAudioLevel]) {
        panic!("on_audio_levels")
    }
    fn on_low_bandwidth_for_video(&self, _: ClientId, _: bool) {
        panic!("on_low_bandwidth_for_video")
    }
    fn on_reactions(&self, _: ClientId, _: &[Reaction]) {
        panic!("on_reactions")
    }
    fn on_raised_hands(&self, _: ClientId, _: &[DemuxId]) {
        panic!("on_raised_hands")
    }
    fn on_peek_changed(&self, _: ClientId, _: &PeekInfo) {
        panic!("on_peek_changed")
    }
    fn on_ended(&self, _: ClientId, _: GroupCallEndReason) {
        panic!("on_ended")
    }
    fn on_speaking_notification(&self, _: ClientId, _: &SpeechEvent) {
        panic!("on_speaking_notification")
    }
}

// ===== TRANSPORT =====

#[derive(Debug, Default)]
pub struct TransportLog {
    pub proofs_set: usize,
    pub joins: usize,
    pub leaves: usize,
    pub remote_device_requests: usize,
    pub local_media: Vec<(bool, bool)>,
}

/// Transport that records what the session asked of it.
pub struct RecordingTransport {
    log: Arc<Mutex<TransportLog>>,
    fail_join: bool,
}

impl RecordingTransport {
    pub fn new() -> (Self, Arc<Mutex<TransportLog>>) {
        let log = Arc::new(Mutex::new(TransportLog::default()));
        (
            Self {
                log: log.clone(),
                fail_join: false,
            },
            log,
        )
    }

    pub fn failing_join() -> (Self, Arc<Mutex<TransportLog>>) {
        let (mut transport, log) = Self::new();
        transport.fail_join = true;
        (transport, log)
    }
}

impl CallTransport for RecordingTransport {
    fn set_membership_proof(&mut self, _proof: &MembershipProof) {
        self.log.lock().proofs_set += 1;
    }

    fn join(&mut self) -> GroupCallResult<()> {
        self.log.lock().joins += 1;
        if self.fail_join {
            return Err(GroupCallError::network("sfu unreachable"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.log.lock().leaves += 1;
    }

    fn request_remote_devices(&mut self) {
        self.log.lock().remote_device_requests += 1;
    }

    fn set_local_media(&mut self, audio_enabled: bool, video_enabled: bool) {
        self.log.lock().local_media.push((audio_enabled, video_enabled));
    }
}

// ===== COLLABORATORS =====

/// Fails the first `failures` requests, then hands out proofs.
pub struct ScriptedProofProvider {
    pub attempts: AtomicUsize,
    failures: usize,
    delay: Duration,
}

impl ScriptedProofProvider {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
            failures,
            delay: Duration::ZERO,
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            attempts: AtomicUsize::new(0),
            failures: 0,
            delay,
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MembershipProofProvider for ScriptedProofProvider {
    async fn request_membership_proof(&self, _client_id: ClientId) -> GroupCallResult<MembershipProof> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if attempt < self.failures {
            return Err(GroupCallError::proof_unavailable("credential service busy"));
        }
        Ok(MembershipProof::valid_for(b"proof".to_vec(), Duration::from_secs(3600)))
    }
}

/// Resolves opaque ids from a fixed roster.
pub struct StaticRoster {
    pub requests: AtomicUsize,
    members: Vec<GroupMemberInfo>,
}

impl StaticRoster {
    pub fn new(members: Vec<GroupMemberInfo>) -> Arc<Self> {
        Arc::new(Self {
            requests: AtomicUsize::new(0),
            members,
        })
    }
}

#[async_trait]
impl GroupMembershipSource for StaticRoster {
    async fn request_group_members(
        &self,
        _client_id: ClientId,
        opaque_user_ids: Vec<OpaqueUserId>,
    ) -> GroupCallResult<Vec<GroupMemberInfo>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .members
            .iter()
            .filter(|m| opaque_user_ids.contains(&m.opaque_user_id))
            .cloned()
            .collect())
    }
}

/// Returns a fixed peek result, or fails every time.
pub struct FixedPeek {
    pub peeks: AtomicUsize,
    result: GroupCallResult<PeekInfo>,
}

impl FixedPeek {
    pub fn returning(info: PeekInfo) -> Arc<Self> {
        Arc::new(Self {
            peeks: AtomicUsize::new(0),
            result: Ok(info),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            peeks: AtomicUsize::new(0),
            result: Err(GroupCallError::peek_failed("network unreachable")),
        })
    }
}

#[async_trait]
impl PeekSource for FixedPeek {
    async fn peek(&self, _client_id: ClientId) -> GroupCallResult<PeekInfo> {
        self.peeks.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

// ===== BUILDERS =====

pub fn member(name: &str) -> GroupMemberInfo {
    GroupMemberInfo {
        user_id: name.as_bytes().to_vec(),
        opaque_user_id: opaque(name),
    }
}

pub fn opaque(name: &str) -> OpaqueUserId {
    format!("opaque-{}", name).into_bytes()
}

pub fn joined(demux_id: DemuxId, name: &str) -> RemoteDeviceDelta {
    RemoteDeviceDelta::Joined {
        demux_id,
        opaque_user_id: opaque(name),
    }
}

pub fn reaction(demux_id: DemuxId, sequence: u64) -> Reaction {
    Reaction {
        demux_id,
        value: "👏".to_string(),
        sequence,
    }
}

pub fn levels(pairs: &[(DemuxId, AudioLevel)]) -> TransportEvent {
    TransportEvent::AudioLevels {
        captured_level: 0,
        received_levels: pairs
            .iter()
            .map(|(demux_id, level)| ReceivedAudioLevel {
                demux_id: *demux_id,
                level: *level,
            })
            .collect(),
    }
}

pub fn test_config() -> GroupCallConfig {
    GroupCallConfig::new()
        .with_tick_interval(Duration::from_millis(20))
        .with_peek_interval(Duration::from_secs(60))
        .with_watchdog_interval(Duration::from_secs(60))
        .with_speaking_threshold(1000)
        .with_proof_retry(RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            use_jitter: false,
        })
}

/// Session with one counting observer, driven by hand.
pub fn session_with_observer() -> (GroupCallSession, Arc<CountingObserver>, Arc<Mutex<TransportLog>>) {
    let (transport, log) = RecordingTransport::new();
    let mut session = GroupCallSession::new(1, test_config(), Box::new(transport))
        .expect("valid config");
    let observer = CountingObserver::new();
    session.add_observer(observer.clone());
    (session, observer, log)
}

/// Drive a session to `Joined` with demux id 1 and clear the observer log.
pub fn joined_session() -> (GroupCallSession, Arc<CountingObserver>, Arc<Mutex<TransportLog>>) {
    let (mut session, observer, log) = session_with_observer();
    session.join().expect("join");
    session.complete_membership_proof(
        0,
        Ok(MembershipProof::valid_for(b"proof".to_vec(), Duration::from_secs(3600))),
    );
    session.handle_transport_event(TransportEvent::Joined { demux_id: 1 }, Instant::now());
    session.take_outbound_requests();
    session.run_cycle();
    observer.clear();
    (session, observer, log)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("rvoip_group_call_core=debug")
        .with_test_writer()
        .try_init();
}
