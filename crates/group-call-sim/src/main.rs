//! Group call simulator
//!
//! Drives a [`GroupCall`] through a scripted session against in-process
//! collaborators and logs every observer callback:
//!
//! ```bash
//! cargo run -p rvoip-group-call-sim -- --participants 5 --ticks 20 --proof-failures 1
//! ```

mod fakes;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn, Level};

use rvoip_group_call_core::{
    DemuxId, GroupCall, GroupCallCollaborators, GroupCallConfig, Reaction, ReceivedAudioLevel,
    RemoteDeviceDelta, RetryConfig, TransportEvent,
};

use crate::fakes::{
    demux_id_for, opaque_id, participant_name, LoggingObserver, SimPeek, SimProofProvider,
    SimRoster, SimTransport,
};
use crate::logging::{parse_log_level, setup_logging, LoggingConfig};

const REACTIONS: [&str; 4] = ["👍", "❤️", "😂", "🎉"];

#[derive(Parser, Debug)]
#[command(name = "group-call-sim")]
#[command(author, version, about = "Run a scripted group call and log observer callbacks")]
struct Args {
    /// Number of remote participants that join
    #[arg(long, default_value = "4")]
    participants: usize,

    /// Number of scripted steps before leaving
    #[arg(long, default_value = "12")]
    ticks: u32,

    /// Proof requests that fail before the provider recovers
    #[arg(long, default_value = "0")]
    proof_failures: u32,

    /// Participants the group roster cannot resolve
    #[arg(long, default_value = "1")]
    strangers: usize,

    /// Coordinator configuration as JSON
    #[arg(long)]
    config: Option<PathBuf>,

    /// Seed for the simulated audio levels
    #[arg(long, default_value = "7")]
    seed: u64,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn load_config(path: Option<&PathBuf>) -> Result<GroupCallConfig> {
    let Some(path) = path else {
        return Ok(GroupCallConfig::default()
            .with_tick_interval(Duration::from_millis(200))
            .with_proof_retry(RetryConfig::quick()));
    };
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    GroupCallConfig::from_json(&json).with_context(|| format!("invalid config in {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = parse_log_level(&args.log_level)?;
    let mut logging = LoggingConfig::new(level, "group-call-sim").with_json(args.json_logs);
    if matches!(level, Level::DEBUG | Level::TRACE) {
        logging = logging.with_file_info();
    }
    setup_logging(&logging)?;

    let config = load_config(args.config.as_ref())?;
    let step = config.tick_interval;

    let (transport, mut transport_events) = SimTransport::new();
    let peek = SimPeek::new(args.participants as u32 + 1);
    let call = GroupCall::start(
        1,
        config,
        GroupCallCollaborators {
            transport: Box::new(transport),
            proof_provider: SimProofProvider::new(args.proof_failures, Duration::from_secs(600)),
            membership_source: SimRoster::new(args.participants, args.strangers),
            peek_source: peek.clone(),
        },
    )
    .context("failed to start group call")?;

    call.add_observer(Arc::new(LoggingObserver)).await?;

    // Feed transport callbacks back into the call.
    let pump = {
        let call = call.clone();
        tokio::spawn(async move {
            while let Some(event) = transport_events.recv().await {
                if call.handle_transport_event(event).is_err() {
                    break;
                }
            }
        })
    };

    call.set_local_media(true, false).await?;
    call.join().await?;

    let mut rng = SmallRng::seed_from_u64(args.seed);
    let mut script = Script::new(args.participants);

    for tick in 0..args.ticks {
        tokio::time::sleep(step).await;
        for event in script.events_for(tick, args.ticks, &mut rng) {
            if let TransportEvent::RemoteDevices(deltas) = &event {
                for delta in deltas {
                    match delta {
                        RemoteDeviceDelta::Joined { demux_id, .. } => {
                            let index = script.index_of(*demux_id);
                            peek.add_device(*demux_id, &participant_name(index));
                        }
                        RemoteDeviceDelta::Left { demux_id } => peek.remove_device(*demux_id),
                        RemoteDeviceDelta::MediaChanged { .. } => {}
                    }
                }
                call.handle_transport_event(TransportEvent::PeekHint)?;
            }
            call.handle_transport_event(event)?;
        }

        let snapshot = call.snapshot().await?;
        if snapshot.end_reason.is_some() {
            warn!(tick, reason = ?snapshot.end_reason, "Call ended early");
            break;
        }
    }

    call.leave().await?;
    call.flush().await?;

    let snapshot = call.snapshot().await?;
    info!(
        status = ?snapshot.status,
        reason = ?snapshot.end_reason,
        proof_requests = snapshot.proof_requests_issued,
        peek_failures = snapshot.peek_failures,
        "Simulation finished"
    );
    println!("{}", serde_json::to_string_pretty(&snapshot.dispatch_stats)?);

    drop(call);
    pump.abort();
    Ok(())
}

/// Scripted remote activity: everyone joins, talks, reacts and raises hands,
/// video bandwidth drops for a few ticks, and the last participant leaves
/// halfway through.
struct Script {
    participants: usize,
    sequence: u64,
    speaker: usize,
}

impl Script {
    fn new(participants: usize) -> Self {
        Self {
            participants,
            sequence: 0,
            speaker: 0,
        }
    }

    fn index_of(&self, demux_id: DemuxId) -> usize {
        (demux_id / 16).saturating_sub(2) as usize
    }

    fn events_for(&mut self, tick: u32, ticks: u32, rng: &mut SmallRng) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        if self.participants == 0 {
            return events;
        }

        if tick == 0 {
            let joins = (0..self.participants)
                .map(|i| RemoteDeviceDelta::Joined {
                    demux_id: demux_id_for(i),
                    opaque_user_id: opaque_id(&participant_name(i)),
                })
                .collect();
            events.push(TransportEvent::RemoteDevices(joins));
            let media = (0..self.participants)
                .map(|i| RemoteDeviceDelta::MediaChanged {
                    demux_id: demux_id_for(i),
                    audio_enabled: Some(true),
                    video_enabled: Some(i % 2 == 0),
                    presenting: None,
                })
                .collect();
            events.push(TransportEvent::RemoteDevices(media));
            return events;
        }

        let leaver = self.participants - 1;
        if tick == ticks / 2 && self.participants > 1 {
            events.push(TransportEvent::RemoteDevices(vec![RemoteDeviceDelta::Left {
                demux_id: demux_id_for(leaver),
            }]));
        }
        let present = if tick >= ticks / 2 && self.participants > 1 {
            leaver
        } else {
            self.participants
        };

        // A different participant holds the floor every three ticks.
        if tick % 3 == 0 {
            self.speaker = rng.gen_range(0..present);
        }
        let received_levels = (0..present)
            .map(|i| ReceivedAudioLevel {
                demux_id: demux_id_for(i),
                level: if i == self.speaker {
                    rng.gen_range(4000..12000)
                } else {
                    rng.gen_range(0..400)
                },
            })
            .collect();
        events.push(TransportEvent::AudioLevels {
            captured_level: rng.gen_range(0..800),
            received_levels,
        });

        if tick % 2 == 1 {
            self.sequence += 1;
            let sender = rng.gen_range(0..present);
            events.push(TransportEvent::Reaction(Reaction {
                demux_id: demux_id_for(sender),
                value: REACTIONS[sender % REACTIONS.len()].to_string(),
                sequence: self.sequence,
            }));
        }

        if tick == 2 {
            events.push(TransportEvent::RaisedHand {
                demux_id: demux_id_for(0),
                raised: true,
            });
        }
        if tick == 4 {
            events.push(TransportEvent::RaisedHand {
                demux_id: demux_id_for(0),
                raised: false,
            });
        }

        if tick == 3 {
            events.push(TransportEvent::LowBandwidthForVideo { low: true });
        }
        if tick == 6 {
            events.push(TransportEvent::LowBandwidthForVideo { low: false });
        }

        events
    }
}
