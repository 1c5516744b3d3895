//! Observer interface for group call sessions
//!
//! A [`GroupCallObserver`] receives every event a session produces. All
//! callbacks run synchronously on the session's owner task, in registration
//! order, so implementations must return quickly and must not block.
//!
//! There are no default methods: a conforming observer handles the full
//! event surface.
//!
//! # Examples
//!
//! ```rust
//! use rvoip_group_call_core::observer::GroupCallObserver;
//! use rvoip_group_call_core::types::*;
//!
//! struct PrintingObserver;
//!
//! impl GroupCallObserver for PrintingObserver {
//!     fn request_membership_proof(&self, _client_id: ClientId) {}
//!     fn request_group_members(&self, _client_id: ClientId) {}
//!     fn on_local_device_state_changed(&self, _client_id: ClientId, state: &LocalDeviceState) {
//!         println!("local: {:?}", state.connection_status);
//!     }
//!     fn on_remote_device_states_changed(&self, _client_id: ClientId, devices: &[RemoteDeviceState]) {
//!         println!("{} remote devices", devices.len());
//!     }
//!     fn on_audio_levels(&self, _client_id: ClientId, _captured: AudioLevel, _received: &[ReceivedAudioLevel]) {}
//!     fn on_low_bandwidth_for_video(&self, _client_id: ClientId, _recovered: bool) {}
//!     fn on_reactions(&self, _client_id: ClientId, _reactions: &[Reaction]) {}
//!     fn on_raised_hands(&self, _client_id: ClientId, _raised_hands: &[DemuxId]) {}
//!     fn on_peek_changed(&self, _client_id: ClientId, _peek_info: &PeekInfo) {}
//!     fn on_ended(&self, _client_id: ClientId, reason: GroupCallEndReason) {
//!         println!("ended: {}", reason);
//!     }
//!     fn on_speaking_notification(&self, _client_id: ClientId, _event: &SpeechEvent) {}
//! }
//! ```

use crate::types::{
    AudioLevel, ClientId, DemuxId, GroupCallEndReason, LocalDeviceState, PeekInfo,
    Reaction, ReceivedAudioLevel, RemoteDeviceState, SpeechEvent,
};

/// Receives the events of one or more group call sessions.
pub trait GroupCallObserver: Send + Sync {
    /// The session needs a fresh membership proof.
    fn request_membership_proof(&self, client_id: ClientId);

    /// The session needs identities for devices it cannot resolve yet.
    fn request_group_members(&self, client_id: ClientId);

    fn on_local_device_state_changed(&self, client_id: ClientId, state: &LocalDeviceState);

    /// Full remote device list, in join order.
    fn on_remote_device_states_changed(&self, client_id: ClientId, devices: &[RemoteDeviceState]);

    /// Delivered once per cycle in which levels arrived, whether or not they changed.
    fn on_audio_levels(
        &self,
        client_id: ClientId,
        captured_level: AudioLevel,
        received_levels: &[ReceivedAudioLevel],
    );

    /// `recovered` is `false` when video bandwidth became insufficient and
    /// `true` when it came back.
    fn on_low_bandwidth_for_video(&self, client_id: ClientId, recovered: bool);

    /// Reactions received this cycle, ordered by sequence number.
    fn on_reactions(&self, client_id: ClientId, reactions: &[Reaction]);

    /// Demux ids with raised hands, oldest raise first.
    fn on_raised_hands(&self, client_id: ClientId, raised_hands: &[DemuxId]);

    fn on_peek_changed(&self, client_id: ClientId, peek_info: &PeekInfo);

    /// Terminal. Nothing is delivered for this session afterwards.
    fn on_ended(&self, client_id: ClientId, reason: GroupCallEndReason);

    fn on_speaking_notification(&self, client_id: ClientId, event: &SpeechEvent);
}

/// One event as produced by a dispatch cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum GroupCallEvent {
    MembershipProofRequested,
    GroupMembersRequested,
    LocalDeviceStateChanged(LocalDeviceState),
    RemoteDeviceStatesChanged(Vec<RemoteDeviceState>),
    AudioLevels {
        captured_level: AudioLevel,
        received_levels: Vec<ReceivedAudioLevel>,
    },
    LowBandwidthForVideo { recovered: bool },
    Reactions(Vec<Reaction>),
    RaisedHands(Vec<DemuxId>),
    PeekChanged(PeekInfo),
    Speaking(SpeechEvent),
    Ended(GroupCallEndReason),
}

impl GroupCallEvent {
    /// Stable name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            GroupCallEvent::MembershipProofRequested => "request_membership_proof",
            GroupCallEvent::GroupMembersRequested => "request_group_members",
            GroupCallEvent::LocalDeviceStateChanged(_) => "local_device_state_changed",
            GroupCallEvent::RemoteDeviceStatesChanged(_) => "remote_device_states_changed",
            GroupCallEvent::AudioLevels { .. } => "audio_levels",
            GroupCallEvent::LowBandwidthForVideo { .. } => "low_bandwidth_for_video",
            GroupCallEvent::Reactions(_) => "reactions",
            GroupCallEvent::RaisedHands(_) => "raised_hands",
            GroupCallEvent::PeekChanged(_) => "peek_changed",
            GroupCallEvent::Speaking(_) => "speaking_notification",
            GroupCallEvent::Ended(_) => "ended",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GroupCallEvent::Ended(_))
    }

    /// Invoke the matching callback on `observer`.
    pub fn deliver_to(&self, client_id: ClientId, observer: &dyn GroupCallObserver) {
        match self {
            GroupCallEvent::MembershipProofRequested => observer.request_membership_proof(client_id),
            GroupCallEvent::GroupMembersRequested => observer.request_group_members(client_id),
            GroupCallEvent::LocalDeviceStateChanged(state) => {
                observer.on_local_device_state_changed(client_id, state)
            }
            GroupCallEvent::RemoteDeviceStatesChanged(devices) => {
                observer.on_remote_device_states_changed(client_id, devices)
            }
            GroupCallEvent::AudioLevels {
                captured_level,
                received_levels,
            } => observer.on_audio_levels(client_id, *captured_level, received_levels),
            GroupCallEvent::LowBandwidthForVideo { recovered } => {
                observer.on_low_bandwidth_for_video(client_id, *recovered)
            }
            GroupCallEvent::Reactions(reactions) => observer.on_reactions(client_id, reactions),
            GroupCallEvent::RaisedHands(raised_hands) => {
                observer.on_raised_hands(client_id, raised_hands)
            }
            GroupCallEvent::PeekChanged(peek_info) => observer.on_peek_changed(client_id, peek_info),
            GroupCallEvent::Speaking(event) => observer.on_speaking_notification(client_id, event),
            GroupCallEvent::Ended(reason) => observer.on_ended(client_id, *reason),
        }
    }
}
