//! # Group-Call-Core: Group Call Session Coordination
//!
//! This library coordinates one side of a multi-party call routed through a
//! selective forwarding unit (SFU). It sits between the media transport and
//! the application: transport signals and membership lookups go in, ordered
//! observer events come out.
//!
//! ## Components
//!
//! - **Session State Store** ([`store`]): local device, remote devices in join
//!   order, audio levels, speaking detection, reactions, raised hands and the
//!   low-bandwidth flag
//! - **Event Dispatcher** ([`dispatcher`]): ordered delivery to observers with
//!   per-observer panic isolation
//! - **Lifecycle and Peek** ([`lifecycle`], [`peek`]): join/leave/end
//!   transitions and periodic occupancy refresh
//! - **Membership** ([`proof`], [`members`]): proof refresh with backoff and a
//!   cached roster resolver
//! - **Coordinator** ([`session`], [`client`]): the synchronous core and the
//!   tokio task that owns it
//!
//! ## Event Guarantees
//!
//! Within one dispatch cycle each state category produces at most one event,
//! in a fixed order, and each speaking edge produces its own event.
//! `on_ended` is delivered exactly once and nothing follows it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rvoip_group_call_core::{GroupCall, GroupCallCollaborators, GroupCallConfig};
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     collaborators: GroupCallCollaborators,
//! #     observer: Arc<dyn rvoip_group_call_core::GroupCallObserver>,
//! # ) -> rvoip_group_call_core::GroupCallResult<()> {
//! let call = GroupCall::start(1, GroupCallConfig::default(), collaborators)?;
//! call.add_observer(observer).await?;
//! call.join().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod members;
pub mod observer;
pub mod peek;
pub mod proof;
pub mod recovery;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

// Re-export commonly used types and traits
pub use client::{GroupCall, GroupCallCollaborators, GroupCallSnapshot};
pub use config::GroupCallConfig;
pub use dispatcher::{DispatchStats, EventDispatcher, ObserverId};
pub use error::{GroupCallError, GroupCallResult};
pub use lifecycle::{SessionLifecycle, SessionStatus};
pub use members::{GroupMembershipSource, MemberResolver};
pub use observer::{GroupCallEvent, GroupCallObserver};
pub use peek::{PeekController, PeekSource};
pub use proof::MembershipProofProvider;
pub use recovery::{retry_with_backoff, RetryConfig};
pub use session::{GroupCallSession, OutboundRequest};
pub use store::{PendingChanges, SessionStateStore};
pub use transport::{CallTransport, TransportEvent};
pub use types::*;
