//! Periodic peek refresh
//!
//! A peek reports who is in the call without joining it. The controller
//! decides when the next peek is due and whether a result differs from the
//! previous one. Failures are counted and logged; the next tick tries again.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{GroupCallError, GroupCallResult};
use crate::types::{ClientId, PeekInfo};

/// Answers occupancy queries for a call.
#[async_trait]
pub trait PeekSource: Send + Sync {
    async fn peek(&self, client_id: ClientId) -> GroupCallResult<PeekInfo>;
}

#[derive(Debug)]
pub struct PeekController {
    interval: Duration,
    last_started: Option<Instant>,
    in_flight: bool,
    hint_pending: bool,
    latest: Option<PeekInfo>,
    failures: u64,
}

impl PeekController {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_started: None,
            in_flight: false,
            hint_pending: false,
            latest: None,
            failures: 0,
        }
    }

    /// Whether a peek should be started at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        if self.in_flight {
            return false;
        }
        if self.hint_pending {
            return true;
        }
        match self.last_started {
            None => true,
            Some(started) => now.saturating_duration_since(started) >= self.interval,
        }
    }

    /// Peek at the next opportunity regardless of the interval.
    pub fn request_now(&mut self) {
        self.hint_pending = true;
    }

    pub fn begin(&mut self, now: Instant) {
        self.in_flight = true;
        self.hint_pending = false;
        self.last_started = Some(now);
    }

    /// Record a peek result. Returns the new info when it differs from the last one.
    pub fn complete(&mut self, result: GroupCallResult<PeekInfo>) -> Option<PeekInfo> {
        self.in_flight = false;
        match result {
            Ok(info) => {
                if self.latest.as_ref() == Some(&info) {
                    return None;
                }
                debug!(
                    devices = info.device_count(),
                    pending = info.pending_devices.len(),
                    era_id = ?info.era_id,
                    "Peek info changed"
                );
                self.latest = Some(info.clone());
                Some(info)
            }
            Err(e) => {
                self.record_failure(&e);
                None
            }
        }
    }

    fn record_failure(&mut self, error: &GroupCallError) {
        self.failures += 1;
        warn!(
            error = %error,
            category = error.category(),
            failures = self.failures,
            "Peek failed, will retry on next tick"
        );
    }

    pub fn cancel(&mut self) {
        self.in_flight = false;
        self.hint_pending = false;
    }

    pub fn latest(&self) -> Option<&PeekInfo> {
        self.latest.as_ref()
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}
