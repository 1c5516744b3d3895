//! Session state store
//!
//! Holds the local device state, the remote devices in join order and the
//! aggregates derived from media signals. Every mutation records what it
//! changed; [`SessionStateStore::take_changes`] hands those records to the
//! dispatch cycle and resets them.

use std::collections::BTreeMap;

use chrono::Utc;
use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::types::{
    AudioLevel, ConnectionStatus, DemuxId, LocalDeviceState, OpaqueUserId, Reaction,
    ReceivedAudioLevel, RemoteDeviceDelta, RemoteDeviceState, RemoteDevicesChange, SpeechEvent,
    SpeechTransition, UserId,
};

/// Everything that changed since the previous cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingChanges {
    pub local: Option<LocalDeviceState>,
    pub remote: Option<Vec<RemoteDeviceState>>,
    pub audio_levels: Option<(AudioLevel, Vec<ReceivedAudioLevel>)>,
    /// `Some(recovered)` when the low-bandwidth flag flipped since the last dispatch
    pub low_bandwidth: Option<bool>,
    pub reactions: Option<Vec<Reaction>>,
    pub raised_hands: Option<Vec<DemuxId>>,
    /// Speaking edges in detection order
    pub speech_events: Vec<SpeechEvent>,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        self.local.is_none()
            && self.remote.is_none()
            && self.audio_levels.is_none()
            && self.low_bandwidth.is_none()
            && self.reactions.is_none()
            && self.raised_hands.is_none()
            && self.speech_events.is_empty()
    }
}

#[derive(Debug)]
pub struct SessionStateStore {
    local: LocalDeviceState,
    local_changed: bool,

    remote: IndexMap<DemuxId, RemoteDeviceState>,
    remote_changed: bool,

    captured_level: AudioLevel,
    audio_levels_applied: bool,
    speaking_threshold: AudioLevel,
    speech_events: Vec<SpeechEvent>,

    low_bandwidth: bool,
    low_bandwidth_dispatched: bool,

    pending_reactions: BTreeMap<u64, Reaction>,
    last_reaction_sequence: Option<u64>,

    raised_hands: Vec<DemuxId>,
    raised_hands_dispatched: Vec<DemuxId>,
}

impl SessionStateStore {
    pub fn new(speaking_threshold: AudioLevel) -> Self {
        Self {
            local: LocalDeviceState::new(),
            local_changed: false,
            remote: IndexMap::new(),
            remote_changed: false,
            captured_level: 0,
            audio_levels_applied: false,
            speaking_threshold,
            speech_events: Vec::new(),
            low_bandwidth: false,
            low_bandwidth_dispatched: false,
            pending_reactions: BTreeMap::new(),
            last_reaction_sequence: None,
            raised_hands: Vec::new(),
            raised_hands_dispatched: Vec::new(),
        }
    }

    // ===== LOCAL DEVICE =====

    pub fn local(&self) -> &LocalDeviceState {
        &self.local
    }

    pub fn set_connection_status(&mut self, status: ConnectionStatus) -> bool {
        if self.local.connection_status == status {
            return false;
        }
        self.local.connection_status = status;
        self.local_changed = true;
        true
    }

    pub fn set_local_media(&mut self, audio_enabled: bool, video_enabled: bool) -> bool {
        if self.local.audio_enabled == audio_enabled && self.local.video_enabled == video_enabled {
            return false;
        }
        self.local.audio_enabled = audio_enabled;
        self.local.video_enabled = video_enabled;
        self.local_changed = true;
        true
    }

    /// Record the demux id the SFU gave this device. A remote entry that
    /// claimed the same id is dropped.
    pub fn assign_local_demux_id(&mut self, demux_id: DemuxId) -> bool {
        if self.local.demux_id == Some(demux_id) {
            return false;
        }
        self.local.demux_id = Some(demux_id);
        self.local_changed = true;
        if self.remote.shift_remove(&demux_id).is_some() {
            debug!(demux_id, "Dropped remote entry that shares the local demux id");
            self.remote_changed = true;
        }
        true
    }

    // ===== REMOTE DEVICES =====

    pub fn remote_devices(&self) -> impl Iterator<Item = &RemoteDeviceState> {
        self.remote.values()
    }

    /// Merge a batch of deltas and classify what actually changed.
    ///
    /// Deltas naming the local demux id are ignored. A repeated `Joined` for a
    /// known device is ignored with a warning. Any delta that took effect marks
    /// the cycle for a remote device event.
    pub fn apply_remote_update(&mut self, deltas: &[RemoteDeviceDelta]) -> RemoteDevicesChange {
        let mut change = RemoteDevicesChange::default();
        let mut applied = false;

        for delta in deltas {
            let demux_id = delta.demux_id();
            if self.local.demux_id == Some(demux_id) {
                trace!(demux_id, "Ignoring remote delta for the local device");
                continue;
            }

            match delta {
                RemoteDeviceDelta::Joined { opaque_user_id, .. } => {
                    if self.remote.contains_key(&demux_id) {
                        warn!(demux_id, "Device joined twice, ignoring");
                        continue;
                    }
                    self.remote
                        .insert(demux_id, RemoteDeviceState::new(demux_id, opaque_user_id.clone()));
                    applied = true;
                    change.removed.retain(|id| *id != demux_id);
                    change.added.push(demux_id);
                }
                RemoteDeviceDelta::Left { .. } => {
                    self.lower_hand(demux_id);
                    let Some(device) = self.remote.shift_remove(&demux_id) else {
                        trace!(demux_id, "Unknown device left");
                        continue;
                    };
                    if device.speaking {
                        self.push_speech_edge(demux_id, SpeechTransition::Stopped);
                    }
                    applied = true;
                    change.changed.retain(|id| *id != demux_id);
                    if let Some(pos) = change.added.iter().position(|id| *id == demux_id) {
                        change.added.remove(pos);
                    } else {
                        change.removed.push(demux_id);
                    }
                }
                RemoteDeviceDelta::MediaChanged {
                    audio_enabled,
                    video_enabled,
                    presenting,
                    ..
                } => {
                    let Some(device) = self.remote.get_mut(&demux_id) else {
                        trace!(demux_id, "Media change for unknown device");
                        continue;
                    };
                    let mut modified = false;
                    modified |= merge_flag(&mut device.audio_enabled, *audio_enabled);
                    modified |= merge_flag(&mut device.video_enabled, *video_enabled);
                    modified |= merge_flag(&mut device.presenting, *presenting);
                    applied |= modified;
                    if modified
                        && !change.added.contains(&demux_id)
                        && !change.changed.contains(&demux_id)
                    {
                        change.changed.push(demux_id);
                    }
                }
            }
        }

        // A device that joins and leaves within one batch nets out of the
        // classification but the roster still changed.
        if applied {
            self.remote_changed = true;
        }
        change
    }

    /// Opaque ids of devices whose user id is still unknown, without duplicates.
    pub fn unresolved_opaque_user_ids(&self) -> Vec<OpaqueUserId> {
        let mut ids: Vec<OpaqueUserId> = Vec::new();
        for device in self.remote.values().filter(|d| d.user_id.is_none()) {
            if !ids.contains(&device.opaque_user_id) {
                ids.push(device.opaque_user_id.clone());
            }
        }
        ids
    }

    /// Fill in user ids that `lookup` can resolve. Returns the updated demux ids.
    pub fn apply_resolved_members<F>(&mut self, lookup: F) -> Vec<DemuxId>
    where
        F: Fn(&OpaqueUserId) -> Option<UserId>,
    {
        let mut resolved = Vec::new();
        for device in self.remote.values_mut().filter(|d| d.user_id.is_none()) {
            if let Some(user_id) = lookup(&device.opaque_user_id) {
                device.user_id = Some(user_id);
                resolved.push(device.demux_id);
            }
        }
        if !resolved.is_empty() {
            debug!(count = resolved.len(), "Resolved remote device identities");
            self.remote_changed = true;
        }
        resolved
    }

    // ===== MEDIA SIGNALS =====

    /// Record audio levels and detect speaking edges.
    ///
    /// Marks the cycle for an audio level event even if no level changed.
    pub fn apply_audio_levels(&mut self, captured_level: AudioLevel, received: &[ReceivedAudioLevel]) {
        self.captured_level = captured_level;
        self.audio_levels_applied = true;

        let mut edges = Vec::new();
        for level in received {
            let Some(device) = self.remote.get_mut(&level.demux_id) else {
                continue;
            };
            device.audio_level = level.level;
            let speaking = level.level >= self.speaking_threshold;
            if speaking != device.speaking {
                device.speaking = speaking;
                edges.push((
                    level.demux_id,
                    if speaking {
                        SpeechTransition::Started
                    } else {
                        SpeechTransition::Stopped
                    },
                ));
            }
        }
        for (demux_id, transition) in edges {
            self.push_speech_edge(demux_id, transition);
        }
    }

    pub fn apply_low_bandwidth(&mut self, low: bool) {
        if self.low_bandwidth != low {
            trace!(low, "Low bandwidth flag updated");
        }
        self.low_bandwidth = low;
    }

    /// Queue a reaction. Returns `false` for duplicates and already delivered sequences.
    pub fn apply_reaction(&mut self, reaction: Reaction) -> bool {
        if let Some(last) = self.last_reaction_sequence {
            if reaction.sequence <= last {
                debug!(sequence = reaction.sequence, last, "Dropping stale reaction");
                return false;
            }
        }
        if self.pending_reactions.contains_key(&reaction.sequence) {
            debug!(sequence = reaction.sequence, "Dropping duplicate reaction");
            return false;
        }
        self.pending_reactions.insert(reaction.sequence, reaction);
        true
    }

    /// Raise or lower a hand. Returns `true` if the list changed.
    pub fn apply_raised_hand(&mut self, demux_id: DemuxId, raised: bool) -> bool {
        if raised {
            if self.raised_hands.contains(&demux_id) {
                return false;
            }
            self.raised_hands.push(demux_id);
            true
        } else {
            self.lower_hand(demux_id)
        }
    }

    pub fn raised_hands(&self) -> &[DemuxId] {
        &self.raised_hands
    }

    fn lower_hand(&mut self, demux_id: DemuxId) -> bool {
        let before = self.raised_hands.len();
        self.raised_hands.retain(|id| *id != demux_id);
        self.raised_hands.len() != before
    }

    fn push_speech_edge(&mut self, demux_id: DemuxId, transition: SpeechTransition) {
        trace!(demux_id, ?transition, "Speaking edge");
        self.speech_events.push(SpeechEvent {
            demux_id,
            transition,
            timestamp: Utc::now(),
        });
    }

    // ===== CYCLE =====

    /// Take everything recorded since the last call.
    pub fn take_changes(&mut self) -> PendingChanges {
        let local = std::mem::take(&mut self.local_changed).then(|| self.local.clone());
        let remote = std::mem::take(&mut self.remote_changed)
            .then(|| self.remote.values().cloned().collect());

        let audio_levels = std::mem::take(&mut self.audio_levels_applied).then(|| {
            let received = self
                .remote
                .values()
                .map(|d| ReceivedAudioLevel {
                    demux_id: d.demux_id,
                    level: d.audio_level,
                })
                .collect();
            (self.captured_level, received)
        });

        let low_bandwidth = if self.low_bandwidth != self.low_bandwidth_dispatched {
            self.low_bandwidth_dispatched = self.low_bandwidth;
            Some(!self.low_bandwidth)
        } else {
            None
        };

        let reactions = if self.pending_reactions.is_empty() {
            None
        } else {
            let drained = std::mem::take(&mut self.pending_reactions);
            self.last_reaction_sequence = drained.keys().next_back().copied();
            Some(drained.into_values().collect())
        };

        // Compared against the last delivered list, so a hand raised and
        // lowered within one cycle produces nothing.
        let raised_hands = if self.raised_hands != self.raised_hands_dispatched {
            self.raised_hands_dispatched = self.raised_hands.clone();
            Some(self.raised_hands.clone())
        } else {
            None
        };

        PendingChanges {
            local,
            remote,
            audio_levels,
            low_bandwidth,
            reactions,
            raised_hands,
            speech_events: std::mem::take(&mut self.speech_events),
        }
    }

    /// Drop all session state. The local device reports `Ended`.
    pub fn teardown(&mut self) {
        debug!(remote_devices = self.remote.len(), "Tearing down session state");
        let threshold = self.speaking_threshold;
        let local = LocalDeviceState {
            connection_status: ConnectionStatus::Ended,
            ..self.local.clone()
        };
        *self = Self::new(threshold);
        self.local = local;
    }
}

fn merge_flag(slot: &mut Option<bool>, update: Option<bool>) -> bool {
    match update {
        Some(value) if *slot != Some(value) => {
            *slot = Some(value);
            true
        }
        _ => false,
    }
}
