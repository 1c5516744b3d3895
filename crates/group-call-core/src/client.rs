//! Tokio owner task for a group call session
//!
//! [`GroupCall::start`] spawns one task that owns a [`GroupCallSession`].
//! Every API call and transport callback is sent to that task over an
//! unbounded channel, so the session is only ever touched from one place.
//! The task:
//!
//! - drains all queued commands and then runs one dispatch cycle
//! - runs [`GroupCallSession::tick`] on a `tick_interval` timer
//! - spawns proof, roster and peek requests, each racing a
//!   [`CancellationToken`] that is cancelled when the session ends
//!
//! Request results are sent back tagged with the session generation they
//! were issued under; the session drops the ones that arrive too late.
//!
//! # Examples
//!
//! ```rust,no_run
//! use rvoip_group_call_core::client::{GroupCall, GroupCallCollaborators};
//! use rvoip_group_call_core::config::GroupCallConfig;
//! use rvoip_group_call_core::transport::TransportEvent;
//!
//! # async fn example(collaborators: GroupCallCollaborators) -> Result<(), Box<dyn std::error::Error>> {
//! let call = GroupCall::start(1, GroupCallConfig::default(), collaborators)?;
//! call.join().await?;
//!
//! // From the transport's callback thread:
//! call.handle_transport_event(TransportEvent::Joined { demux_id: 16 })?;
//!
//! call.leave().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::GroupCallConfig;
use crate::dispatcher::{DispatchStats, ObserverId};
use crate::error::{GroupCallError, GroupCallResult};
use crate::lifecycle::SessionStatus;
use crate::members::GroupMembershipSource;
use crate::observer::GroupCallObserver;
use crate::peek::PeekSource;
use crate::proof::MembershipProofProvider;
use crate::recovery::{retry_with_backoff, RetryConfig};
use crate::session::{GroupCallSession, OutboundRequest};
use crate::transport::{CallTransport, TransportEvent};
use crate::types::{
    ClientId, DemuxId, GroupCallEndReason, GroupMemberInfo, LocalDeviceState, MembershipProof,
    PeekInfo, RemoteDeviceState,
};

/// External parts a group call depends on.
pub struct GroupCallCollaborators {
    pub transport: Box<dyn CallTransport>,
    pub proof_provider: Arc<dyn MembershipProofProvider>,
    pub membership_source: Arc<dyn GroupMembershipSource>,
    pub peek_source: Arc<dyn PeekSource>,
}

/// Point-in-time view of a session, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupCallSnapshot {
    pub status: SessionStatus,
    pub local: LocalDeviceState,
    pub remote_devices: Vec<RemoteDeviceState>,
    pub raised_hands: Vec<DemuxId>,
    pub peek_info: Option<PeekInfo>,
    pub end_reason: Option<GroupCallEndReason>,
    pub generation: u64,
    pub proof_requests_issued: u64,
    pub peek_failures: u64,
    pub dispatch_stats: DispatchStats,
}

enum Command {
    AddObserver(Arc<dyn GroupCallObserver>, oneshot::Sender<ObserverId>),
    RemoveObserver(ObserverId, oneshot::Sender<bool>),
    Join(oneshot::Sender<GroupCallResult<()>>),
    Leave(oneshot::Sender<GroupCallResult<()>>),
    SetLocalMedia {
        audio_enabled: bool,
        video_enabled: bool,
        reply: oneshot::Sender<GroupCallResult<()>>,
    },
    Transport(TransportEvent),
    Snapshot(oneshot::Sender<GroupCallSnapshot>),
    Flush(oneshot::Sender<()>),
}

enum Completion {
    Proof {
        generation: u64,
        result: GroupCallResult<MembershipProof>,
    },
    Members {
        generation: u64,
        result: GroupCallResult<Vec<GroupMemberInfo>>,
    },
    Peek {
        generation: u64,
        result: GroupCallResult<PeekInfo>,
    },
}

/// Handle to a running group call. Cheap to clone.
///
/// The session ends with `LeftNormally` once every handle is dropped.
#[derive(Clone)]
pub struct GroupCall {
    client_id: ClientId,
    commands: mpsc::UnboundedSender<Command>,
}

impl GroupCall {
    /// Validate `config` and spawn the owner task. Must be called within a tokio runtime.
    pub fn start(
        client_id: ClientId,
        config: GroupCallConfig,
        collaborators: GroupCallCollaborators,
    ) -> GroupCallResult<Self> {
        let tick_interval = config.tick_interval;
        let proof_retry = config.proof_retry.clone();
        let session = GroupCallSession::new(client_id, config, collaborators.transport)?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let runner = GroupCallRunner {
            session,
            commands: commands_rx,
            completions: completions_rx,
            completions_tx,
            proof_provider: collaborators.proof_provider,
            membership_source: collaborators.membership_source,
            peek_source: collaborators.peek_source,
            proof_retry,
            cancel: CancellationToken::new(),
        };
        tokio::spawn(runner.run(tick_interval));
        info!(client_id, "Group call started");

        Ok(Self {
            client_id,
            commands: commands_tx,
        })
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    fn send(&self, command: Command) -> GroupCallResult<()> {
        self.commands
            .send(command)
            .map_err(|_| GroupCallError::internal("group call task has stopped"))
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> GroupCallResult<T> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx))?;
        rx.await
            .map_err(|_| GroupCallError::internal("group call task dropped the reply"))
    }

    pub async fn add_observer(&self, observer: Arc<dyn GroupCallObserver>) -> GroupCallResult<ObserverId> {
        self.request(|reply| Command::AddObserver(observer, reply)).await
    }

    pub async fn remove_observer(&self, id: ObserverId) -> GroupCallResult<bool> {
        self.request(|reply| Command::RemoveObserver(id, reply)).await
    }

    pub async fn join(&self) -> GroupCallResult<()> {
        self.request(Command::Join).await?
    }

    pub async fn leave(&self) -> GroupCallResult<()> {
        self.request(Command::Leave).await?
    }

    pub async fn set_local_media(&self, audio_enabled: bool, video_enabled: bool) -> GroupCallResult<()> {
        self.request(|reply| Command::SetLocalMedia {
            audio_enabled,
            video_enabled,
            reply,
        })
        .await?
    }

    /// Queue a transport signal. Does not wait; safe to call from any thread.
    pub fn handle_transport_event(&self, event: TransportEvent) -> GroupCallResult<()> {
        self.send(Command::Transport(event))
    }

    pub async fn snapshot(&self) -> GroupCallResult<GroupCallSnapshot> {
        self.request(Command::Snapshot).await
    }

    /// Resolves after every command sent before it has been processed and
    /// the resulting cycle dispatched.
    pub async fn flush(&self) -> GroupCallResult<()> {
        self.request(Command::Flush).await
    }
}

struct GroupCallRunner {
    session: GroupCallSession,
    commands: mpsc::UnboundedReceiver<Command>,
    completions: mpsc::UnboundedReceiver<Completion>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    proof_provider: Arc<dyn MembershipProofProvider>,
    membership_source: Arc<dyn GroupMembershipSource>,
    peek_source: Arc<dyn PeekSource>,
    proof_retry: RetryConfig,
    cancel: CancellationToken,
}

impl GroupCallRunner {
    async fn run(mut self, tick_interval: std::time::Duration) {
        let client_id = self.session.client_id();
        let mut ticker = interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        break;
                    };
                    let mut flushes = Vec::new();
                    self.handle_command(command, &mut flushes);
                    self.drain(&mut flushes);
                    self.session.run_cycle();
                    self.spawn_requests();
                    for flush in flushes {
                        let _ = flush.send(());
                    }
                }
                Some(completion) = self.completions.recv() => {
                    let mut flushes = Vec::new();
                    self.handle_completion(completion);
                    self.drain(&mut flushes);
                    self.session.run_cycle();
                    self.spawn_requests();
                    for flush in flushes {
                        let _ = flush.send(());
                    }
                }
                _ = ticker.tick() => {
                    self.session.tick(Instant::now());
                    self.spawn_requests();
                }
            }

            if self.session.is_ended() && !self.cancel.is_cancelled() {
                debug!(client_id, "Cancelling outstanding requests");
                self.cancel.cancel();
            }
        }

        if !self.session.is_ended() {
            info!(client_id, "All handles dropped, leaving group call");
            let _ = self.session.leave();
        }
        self.cancel.cancel();
        debug!(client_id, "Group call task stopped");
    }

    fn drain(&mut self, flushes: &mut Vec<oneshot::Sender<()>>) {
        loop {
            if let Ok(command) = self.commands.try_recv() {
                self.handle_command(command, flushes);
            } else if let Ok(completion) = self.completions.try_recv() {
                self.handle_completion(completion);
            } else {
                break;
            }
        }
    }

    fn handle_command(&mut self, command: Command, flushes: &mut Vec<oneshot::Sender<()>>) {
        match command {
            Command::AddObserver(observer, reply) => {
                let _ = reply.send(self.session.add_observer(observer));
            }
            Command::RemoveObserver(id, reply) => {
                let _ = reply.send(self.session.remove_observer(id));
            }
            Command::Join(reply) => {
                let _ = reply.send(self.session.join());
            }
            Command::Leave(reply) => {
                let _ = reply.send(self.session.leave());
            }
            Command::SetLocalMedia {
                audio_enabled,
                video_enabled,
                reply,
            } => {
                let _ = reply.send(self.session.set_local_media(audio_enabled, video_enabled));
            }
            Command::Transport(event) => {
                self.session.handle_transport_event(event, Instant::now());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Flush(reply) => flushes.push(reply),
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Proof { generation, result } => {
                self.session.complete_membership_proof(generation, result)
            }
            Completion::Members { generation, result } => {
                self.session.complete_group_members(generation, result)
            }
            Completion::Peek { generation, result } => self.session.complete_peek(generation, result),
        }
    }

    fn snapshot(&self) -> GroupCallSnapshot {
        let session = &self.session;
        GroupCallSnapshot {
            status: session.status(),
            local: session.local_device_state().clone(),
            remote_devices: session.remote_devices(),
            raised_hands: session.raised_hands(),
            peek_info: session.peek_info().cloned(),
            end_reason: session.end_reason(),
            generation: session.generation(),
            proof_requests_issued: session.proof_requests_issued(),
            peek_failures: session.peek_failures(),
            dispatch_stats: session.dispatch_stats(),
        }
    }

    fn spawn_requests(&mut self) {
        let client_id = self.session.client_id();
        for request in self.session.take_outbound_requests() {
            let token = self.cancel.clone();
            let tx = self.completions_tx.clone();

            match request {
                OutboundRequest::MembershipProof { generation } => {
                    let provider = self.proof_provider.clone();
                    let retry = self.proof_retry.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            result = retry_with_backoff("request_membership_proof", retry, || {
                                provider.request_membership_proof(client_id)
                            }) => {
                                let _ = tx.send(Completion::Proof { generation, result });
                            }
                            _ = token.cancelled() => {
                                debug!(client_id, generation, "Membership proof request cancelled");
                            }
                        }
                    });
                }
                OutboundRequest::GroupMembers {
                    generation,
                    opaque_user_ids,
                } => {
                    let source = self.membership_source.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            result = source.request_group_members(client_id, opaque_user_ids) => {
                                let _ = tx.send(Completion::Members { generation, result });
                            }
                            _ = token.cancelled() => {
                                debug!(client_id, generation, "Group members request cancelled");
                            }
                        }
                    });
                }
                OutboundRequest::Peek { generation } => {
                    let source = self.peek_source.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            result = source.peek(client_id) => {
                                let _ = tx.send(Completion::Peek { generation, result });
                            }
                            _ = token.cancelled() => {
                                debug!(client_id, generation, "Peek cancelled");
                            }
                        }
                    });
                }
            }
        }
    }
}
