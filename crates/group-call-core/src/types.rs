//! Type definitions shared across the group call coordinator
//!
//! These are the payloads that flow from the transport and the external
//! collaborators into the session, and from the session out to observers.
//!
//! # Type Categories
//!
//! - **Identifiers** - client, demux and user identifiers
//! - **Device State** - local and remote device snapshots
//! - **Media Signals** - audio levels, reactions, speech edges
//! - **Membership** - proofs, group members and peek results
//! - **Termination** - the reason a session ended

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier the application uses to tell concurrent group calls apart.
pub type ClientId = u32;

/// Numeric identifier distinguishing a participant's media stream within a session.
pub type DemuxId = u32;

/// Resolved identity of a participant (service id bytes).
pub type UserId = Vec<u8>;

/// Identity as the SFU reports it, before resolution against the group roster.
pub type OpaqueUserId = Vec<u8>;

/// Audio level as reported by the media engine (0 = silence, 32767 = loudest).
pub type AudioLevel = u16;

// ===== DEVICE STATE =====

/// Connection status of the local device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// No join has been requested yet
    Idle,
    /// Join requested, waiting for the SFU to assign a demux id
    Connecting,
    /// Joined and media is flowing
    Connected,
    /// Joined but connectivity is temporarily failing
    Reconnecting,
    /// The session is over
    Ended,
}

/// State of the local device.
///
/// Only the coordinator mutates this, in response to local API calls or
/// transport callbacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDeviceState {
    /// Current connection status
    pub connection_status: ConnectionStatus,
    /// Whether outgoing audio is enabled
    pub audio_enabled: bool,
    /// Whether outgoing video is enabled
    pub video_enabled: bool,
    /// Demux id assigned by the SFU once joined
    pub demux_id: Option<DemuxId>,
}

impl LocalDeviceState {
    pub fn new() -> Self {
        Self {
            connection_status: ConnectionStatus::Idle,
            audio_enabled: false,
            video_enabled: false,
            demux_id: None,
        }
    }
}

impl Default for LocalDeviceState {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one remote participant device.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDeviceState {
    pub demux_id: DemuxId,
    /// Identity as sent by the SFU
    pub opaque_user_id: OpaqueUserId,
    /// Resolved identity; `None` until the group roster resolves it
    pub user_id: Option<UserId>,
    /// `None` until the device reports its media state
    pub audio_enabled: Option<bool>,
    pub video_enabled: Option<bool>,
    pub presenting: Option<bool>,
    /// Last level received for this device
    pub audio_level: AudioLevel,
    pub speaking: bool,
    /// When this device was first seen in the session
    pub added_at: DateTime<Utc>,
}

impl RemoteDeviceState {
    pub fn new(demux_id: DemuxId, opaque_user_id: OpaqueUserId) -> Self {
        Self {
            demux_id,
            opaque_user_id,
            user_id: None,
            audio_enabled: None,
            video_enabled: None,
            presenting: None,
            audio_level: 0,
            speaking: false,
            added_at: Utc::now(),
        }
    }
}

/// A single change to the remote device set as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteDeviceDelta {
    /// A device joined the call
    Joined {
        demux_id: DemuxId,
        opaque_user_id: OpaqueUserId,
    },
    /// A device left the call
    Left { demux_id: DemuxId },
    /// A device's media state changed. `None` fields are left untouched.
    MediaChanged {
        demux_id: DemuxId,
        audio_enabled: Option<bool>,
        video_enabled: Option<bool>,
        presenting: Option<bool>,
    },
}

impl RemoteDeviceDelta {
    pub fn demux_id(&self) -> DemuxId {
        match self {
            RemoteDeviceDelta::Joined { demux_id, .. }
            | RemoteDeviceDelta::Left { demux_id }
            | RemoteDeviceDelta::MediaChanged { demux_id, .. } => *demux_id,
        }
    }
}

/// Classification of what an applied remote update actually changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteDevicesChange {
    pub added: Vec<DemuxId>,
    pub removed: Vec<DemuxId>,
    pub changed: Vec<DemuxId>,
}

impl RemoteDevicesChange {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

// ===== MEDIA SIGNALS =====

/// Audio level received for one remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedAudioLevel {
    pub demux_id: DemuxId,
    pub level: AudioLevel,
}

/// An ephemeral reaction sent by a participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    /// Sender of the reaction
    pub demux_id: DemuxId,
    /// Reaction payload (usually a single emoji)
    pub value: String,
    /// Monotonically increasing per session; duplicates are dropped
    pub sequence: u64,
}

/// Direction of a speaking edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeechTransition {
    Started,
    Stopped,
}

/// A detected start/stop speaking edge for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeechEvent {
    pub demux_id: DemuxId,
    pub transition: SpeechTransition,
    pub timestamp: DateTime<Utc>,
}

// ===== MEMBERSHIP =====

/// Short-lived credential authorizing this device to join and remain in a call.
#[derive(Clone, PartialEq, Eq)]
pub struct MembershipProof {
    pub token: Vec<u8>,
    pub expires_at: Instant,
}

impl MembershipProof {
    pub fn new(token: Vec<u8>, expires_at: Instant) -> Self {
        Self { token, expires_at }
    }

    /// Create a proof valid for `ttl` from now.
    pub fn valid_for(token: Vec<u8>, ttl: Duration) -> Self {
        Self::new(token, Instant::now() + ttl)
    }

    /// Whether the proof expires within `margin` of `now`.
    pub fn is_near_expiry(&self, now: Instant, margin: Duration) -> bool {
        match now.checked_add(margin) {
            Some(deadline) => deadline >= self.expires_at,
            None => true,
        }
    }
}

// Never log the token itself.
impl std::fmt::Debug for MembershipProof {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipProof")
            .field("token_len", &self.token.len())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Associates a group member's identity with the opaque id the SFU uses for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMemberInfo {
    pub user_id: UserId,
    pub opaque_user_id: OpaqueUserId,
}

/// One device as seen by a peek.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeekDeviceInfo {
    pub demux_id: DemuxId,
    pub opaque_user_id: Option<OpaqueUserId>,
    pub user_id: Option<UserId>,
}

/// Call occupancy as seen without joining.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeekInfo {
    /// Devices currently in the call
    pub devices: Vec<PeekDeviceInfo>,
    /// Devices waiting for approval to join
    pub pending_devices: Vec<PeekDeviceInfo>,
    pub creator: Option<UserId>,
    /// Identifies one continuous instance of the call
    pub era_id: Option<String>,
    pub max_devices: Option<u32>,
}

impl PeekInfo {
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn device_count_including_pending_devices(&self) -> usize {
        self.devices.len() + self.pending_devices.len()
    }

    /// Opaque ids the peek reported without a resolved identity.
    pub fn unresolved_opaque_user_ids(&self) -> Vec<OpaqueUserId> {
        self.devices
            .iter()
            .chain(self.pending_devices.iter())
            .filter(|d| d.user_id.is_none())
            .filter_map(|d| d.opaque_user_id.clone())
            .collect()
    }

    pub fn is_full(&self) -> bool {
        match self.max_devices {
            Some(max) => self.device_count() >= max as usize,
            None => false,
        }
    }
}

// ===== TERMINATION =====

/// Why a group call session ended. Exactly one is produced per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupCallEndReason {
    /// The local user left
    LeftNormally,
    /// The call's administrator removed this device
    Kicked,
    /// The connection to the SFU failed and could not be re-established
    ConnectionFailure,
    /// No valid membership proof could be obtained
    ProofRejected,
    /// The SFU assigned a different demux id mid-call
    ServerChangedDemuxId,
    /// The call reached its device limit
    CallFull,
    IceFailedWhileConnecting,
    IceFailedAfterConnected,
}

impl GroupCallEndReason {
    /// Whether this reason represents a failure rather than a deliberate end.
    pub fn is_failure(&self) -> bool {
        !matches!(self, GroupCallEndReason::LeftNormally | GroupCallEndReason::Kicked)
    }
}

impl std::fmt::Display for GroupCallEndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            GroupCallEndReason::LeftNormally => "left normally",
            GroupCallEndReason::Kicked => "removed from call",
            GroupCallEndReason::ConnectionFailure => "connection failure",
            GroupCallEndReason::ProofRejected => "membership proof rejected",
            GroupCallEndReason::ServerChangedDemuxId => "server changed demux id",
            GroupCallEndReason::CallFull => "call full",
            GroupCallEndReason::IceFailedWhileConnecting => "ICE failed while connecting",
            GroupCallEndReason::IceFailedAfterConnected => "ICE failed after connected",
        };
        f.write_str(text)
    }
}
