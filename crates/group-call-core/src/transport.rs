//! Boundary to the SFU client
//!
//! The session drives the transport through [`CallTransport`]. Everything the
//! transport observes comes back as a [`TransportEvent`], marshalled onto the
//! session's owner task before it touches any state.

use crate::error::GroupCallResult;
use crate::types::{
    AudioLevel, DemuxId, GroupCallEndReason, MembershipProof, Reaction, ReceivedAudioLevel,
    RemoteDeviceDelta,
};

/// Commands the session issues to the media transport.
pub trait CallTransport: Send {
    /// Hand over a fresh proof. Called on every successful proof request.
    fn set_membership_proof(&mut self, proof: &MembershipProof);

    /// Start connecting to the SFU. The assigned demux id arrives later as
    /// [`TransportEvent::Joined`].
    fn join(&mut self) -> GroupCallResult<()>;

    fn leave(&mut self);

    /// Ask the SFU to resend the remote device list.
    fn request_remote_devices(&mut self);

    fn set_local_media(&mut self, audio_enabled: bool, video_enabled: bool);
}

/// Signals reported by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The SFU accepted the join and assigned a demux id
    Joined { demux_id: DemuxId },
    ConnectionInterrupted,
    ConnectionRestored,
    RemoteDevices(Vec<RemoteDeviceDelta>),
    AudioLevels {
        captured_level: AudioLevel,
        received_levels: Vec<ReceivedAudioLevel>,
    },
    Reaction(Reaction),
    RaisedHand { demux_id: DemuxId, raised: bool },
    LowBandwidthForVideo { low: bool },
    /// Occupancy likely changed; peek at the next opportunity
    PeekHint,
    /// The SFU refused the current membership proof
    ProofRejected,
    /// Unrecoverable transport condition
    Ended(GroupCallEndReason),
}

impl TransportEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::Joined { .. } => "joined",
            TransportEvent::ConnectionInterrupted => "connection_interrupted",
            TransportEvent::ConnectionRestored => "connection_restored",
            TransportEvent::RemoteDevices(_) => "remote_devices",
            TransportEvent::AudioLevels { .. } => "audio_levels",
            TransportEvent::Reaction(_) => "reaction",
            TransportEvent::RaisedHand { .. } => "raised_hand",
            TransportEvent::LowBandwidthForVideo { .. } => "low_bandwidth_for_video",
            TransportEvent::PeekHint => "peek_hint",
            TransportEvent::ProofRejected => "proof_rejected",
            TransportEvent::Ended(_) => "ended",
        }
    }
}
