//! In-process stand-ins for the SFU transport and the membership services

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rvoip_group_call_core::{
    AudioLevel, CallTransport, ClientId, DemuxId, GroupCallEndReason, GroupCallError,
    GroupCallObserver, GroupCallResult, GroupMemberInfo, GroupMembershipSource, LocalDeviceState,
    MembershipProof, MembershipProofProvider, OpaqueUserId, PeekDeviceInfo, PeekInfo, PeekSource,
    Reaction, ReceivedAudioLevel, RemoteDeviceState, SpeechEvent, TransportEvent,
};

pub const LOCAL_DEMUX_ID: DemuxId = 1;

pub fn participant_name(index: usize) -> String {
    format!("user{}", index + 1)
}

pub fn opaque_id(name: &str) -> OpaqueUserId {
    format!("opaque-{}", name).into_bytes()
}

pub fn demux_id_for(index: usize) -> DemuxId {
    // The SFU hands out demux ids in steps of 16.
    ((index as DemuxId) + 2) * 16
}

/// Transport that answers joins and device requests through a channel the
/// driver pumps back into the call.
pub struct SimTransport {
    events: mpsc::UnboundedSender<TransportEvent>,
    has_proof: bool,
}

impl SimTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                events: tx,
                has_proof: false,
            },
            rx,
        )
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("Transport event pump closed");
        }
    }
}

impl CallTransport for SimTransport {
    fn set_membership_proof(&mut self, proof: &MembershipProof) {
        debug!(proof = ?proof, "Transport received membership proof");
        self.has_proof = true;
    }

    fn join(&mut self) -> GroupCallResult<()> {
        if !self.has_proof {
            return Err(GroupCallError::network("join attempted without a membership proof"));
        }
        info!(demux_id = LOCAL_DEMUX_ID, "SFU accepted join");
        self.emit(TransportEvent::Joined {
            demux_id: LOCAL_DEMUX_ID,
        });
        Ok(())
    }

    fn leave(&mut self) {
        info!("Transport left the SFU");
    }

    fn request_remote_devices(&mut self) {
        debug!("Remote device list requested");
        self.emit(TransportEvent::RemoteDevices(Vec::new()));
    }

    fn set_local_media(&mut self, audio_enabled: bool, video_enabled: bool) {
        debug!(audio_enabled, video_enabled, "Local media forwarded to transport");
    }
}

/// Proof provider that fails a fixed number of times before succeeding.
pub struct SimProofProvider {
    failures_left: AtomicU32,
    issued: AtomicU32,
    ttl: Duration,
}

impl SimProofProvider {
    pub fn new(failures: u32, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            failures_left: AtomicU32::new(failures),
            issued: AtomicU32::new(0),
            ttl,
        })
    }
}

#[async_trait]
impl MembershipProofProvider for SimProofProvider {
    async fn request_membership_proof(&self, client_id: ClientId) -> GroupCallResult<MembershipProof> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            warn!(client_id, "Proof service unavailable");
            return Err(GroupCallError::proof_unavailable("simulated outage"));
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MembershipProof::valid_for(format!("proof-{}", n).into_bytes(), self.ttl))
    }
}

/// Group roster that knows every participant except the ones listed as strangers.
pub struct SimRoster {
    members: Vec<GroupMemberInfo>,
}

impl SimRoster {
    pub fn new(participants: usize, strangers: usize) -> Arc<Self> {
        let known = participants.saturating_sub(strangers);
        let members = (0..known)
            .map(|i| {
                let name = participant_name(i);
                GroupMemberInfo {
                    opaque_user_id: opaque_id(&name),
                    user_id: name.into_bytes(),
                }
            })
            .collect();
        Arc::new(Self { members })
    }
}

#[async_trait]
impl GroupMembershipSource for SimRoster {
    async fn request_group_members(
        &self,
        _client_id: ClientId,
        opaque_user_ids: Vec<OpaqueUserId>,
    ) -> GroupCallResult<Vec<GroupMemberInfo>> {
        Ok(self
            .members
            .iter()
            .filter(|m| opaque_user_ids.contains(&m.opaque_user_id))
            .cloned()
            .collect())
    }
}

/// Peek source backed by the driver's view of who is in the call.
pub struct SimPeek {
    devices: Mutex<Vec<PeekDeviceInfo>>,
    max_devices: u32,
}

impl SimPeek {
    pub fn new(max_devices: u32) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(Vec::new()),
            max_devices,
        })
    }

    pub fn add_device(&self, demux_id: DemuxId, name: &str) {
        self.devices.lock().push(PeekDeviceInfo {
            demux_id,
            opaque_user_id: Some(opaque_id(name)),
            user_id: None,
        });
    }

    pub fn remove_device(&self, demux_id: DemuxId) {
        self.devices.lock().retain(|d| d.demux_id != demux_id);
    }
}

#[async_trait]
impl PeekSource for SimPeek {
    async fn peek(&self, _client_id: ClientId) -> GroupCallResult<PeekInfo> {
        Ok(PeekInfo {
            devices: self.devices.lock().clone(),
            era_id: Some("sim-era".to_string()),
            max_devices: Some(self.max_devices),
            ..PeekInfo::default()
        })
    }
}

/// Observer that logs every callback.
pub struct LoggingObserver;

fn names(devices: &[RemoteDeviceState]) -> Vec<String> {
    devices
        .iter()
        .map(|d| match &d.user_id {
            Some(user_id) => String::from_utf8_lossy(user_id).into_owned(),
            None => format!("<unknown #{}>", d.demux_id),
        })
        .collect()
}

impl GroupCallObserver for LoggingObserver {
    fn request_membership_proof(&self, client_id: ClientId) {
        info!(client_id, "Membership proof requested");
    }

    fn request_group_members(&self, client_id: ClientId) {
        info!(client_id, "Group members requested");
    }

    fn on_local_device_state_changed(&self, client_id: ClientId, state: &LocalDeviceState) {
        info!(
            client_id,
            status = ?state.connection_status,
            demux_id = ?state.demux_id,
            audio = state.audio_enabled,
            video = state.video_enabled,
            "Local device state changed"
        );
    }

    fn on_remote_device_states_changed(&self, client_id: ClientId, devices: &[RemoteDeviceState]) {
        info!(client_id, count = devices.len(), devices = ?names(devices), "Remote devices changed");
    }

    fn on_audio_levels(&self, client_id: ClientId, captured_level: AudioLevel, received_levels: &[ReceivedAudioLevel]) {
        debug!(client_id, captured_level, received = received_levels.len(), "Audio levels");
    }

    fn on_low_bandwidth_for_video(&self, client_id: ClientId, recovered: bool) {
        if recovered {
            info!(client_id, "Video bandwidth recovered");
        } else {
            warn!(client_id, "Bandwidth too low for video");
        }
    }

    fn on_reactions(&self, client_id: ClientId, reactions: &[Reaction]) {
        for reaction in reactions {
            info!(client_id, demux_id = reaction.demux_id, value = %reaction.value, "Reaction");
        }
    }

    fn on_raised_hands(&self, client_id: ClientId, raised_hands: &[DemuxId]) {
        info!(client_id, raised_hands = ?raised_hands, "Raised hands changed");
    }

    fn on_peek_changed(&self, client_id: ClientId, peek_info: &PeekInfo) {
        info!(
            client_id,
            devices = peek_info.device_count(),
            with_pending = peek_info.device_count_including_pending_devices(),
            era_id = ?peek_info.era_id,
            full = peek_info.is_full(),
            "Peek changed"
        );
    }

    fn on_ended(&self, client_id: ClientId, reason: GroupCallEndReason) {
        info!(client_id, %reason, "Group call ended");
    }

    fn on_speaking_notification(&self, client_id: ClientId, event: &SpeechEvent) {
        info!(client_id, demux_id = event.demux_id, transition = ?event.transition, "Speaking");
    }
}
