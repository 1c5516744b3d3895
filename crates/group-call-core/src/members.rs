//! Group roster resolution
//!
//! The SFU identifies participants by opaque user ids. A
//! [`GroupMembershipSource`] maps those to real user ids; [`MemberResolver`]
//! caches the answers in a small FIFO so devices that rejoin resolve without
//! another round trip.

use std::collections::VecDeque;

use async_trait::async_trait;
use tracing::debug;

use crate::error::GroupCallResult;
use crate::types::{ClientId, GroupMemberInfo, OpaqueUserId, UserId};

/// Supplies the roster of a group.
#[async_trait]
pub trait GroupMembershipSource: Send + Sync {
    /// Resolve `opaque_user_ids`. The result may be partial; ids that are
    /// missing stay unresolved and are asked for again later.
    async fn request_group_members(
        &self,
        client_id: ClientId,
        opaque_user_ids: Vec<OpaqueUserId>,
    ) -> GroupCallResult<Vec<GroupMemberInfo>>;
}

/// Bounded FIFO cache of resolved members plus request bookkeeping.
#[derive(Debug)]
pub struct MemberResolver {
    cache: VecDeque<GroupMemberInfo>,
    max_entries: usize,
    in_flight: bool,
}

impl MemberResolver {
    pub fn new(max_entries: usize) -> Self {
        Self {
            cache: VecDeque::new(),
            max_entries,
            in_flight: false,
        }
    }

    /// Cached user id for `opaque_user_id`, if any.
    pub fn lookup(&self, opaque_user_id: &OpaqueUserId) -> Option<UserId> {
        self.cache
            .iter()
            .find(|member| &member.opaque_user_id == opaque_user_id)
            .map(|member| member.user_id.clone())
    }

    /// Add resolved members, evicting the oldest entries past capacity.
    pub fn insert_all(&mut self, members: Vec<GroupMemberInfo>) {
        for member in members {
            if let Some(existing) = self
                .cache
                .iter_mut()
                .find(|m| m.opaque_user_id == member.opaque_user_id)
            {
                existing.user_id = member.user_id;
                continue;
            }
            if self.cache.len() >= self.max_entries {
                if let Some(evicted) = self.cache.pop_front() {
                    debug!(user_id_len = evicted.user_id.len(), "Evicted member cache entry");
                }
            }
            if self.max_entries > 0 {
                self.cache.push_back(member);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn begin_request(&mut self) -> bool {
        if self.in_flight {
            return false;
        }
        self.in_flight = true;
        true
    }

    pub fn finish_request(&mut self) {
        self.in_flight = false;
    }
}
