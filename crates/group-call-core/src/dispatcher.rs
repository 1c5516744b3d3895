//! Ordered event delivery to registered observers
//!
//! The dispatcher owns the observer list of one session. Events are delivered
//! synchronously, one observer at a time, in registration order. An observer
//! that panics is isolated: the panic is caught, logged and counted, and the
//! remaining observers still receive the event.
//!
//! Delivering [`GroupCallEvent::Ended`] makes the dispatcher inert. The
//! observer list is dropped and every later event is suppressed.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::observer::{GroupCallEvent, GroupCallObserver};
use crate::types::ClientId;

/// Handle returned by [`EventDispatcher::add_observer`], used to remove the observer again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverId(Uuid);

impl ObserverId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery counters kept for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    /// Events handed to the observer list
    pub events_dispatched: u64,
    /// Individual observer callbacks that returned normally
    pub deliveries: u64,
    /// Observer callbacks that panicked
    pub observer_failures: u64,
    /// Events dropped because the session had ended
    pub events_suppressed: u64,
}

struct Registration {
    id: ObserverId,
    observer: Arc<dyn GroupCallObserver>,
}

pub struct EventDispatcher {
    client_id: ClientId,
    observers: Vec<Registration>,
    inert: bool,
    stats: DispatchStats,
}

impl EventDispatcher {
    pub fn new(client_id: ClientId) -> Self {
        Self {
            client_id,
            observers: Vec::new(),
            inert: false,
            stats: DispatchStats::default(),
        }
    }

    pub fn add_observer(&mut self, observer: Arc<dyn GroupCallObserver>) -> ObserverId {
        let id = ObserverId::new();
        if self.inert {
            debug!(client_id = self.client_id, observer_id = %id, "Session ended, observer not registered");
            return id;
        }
        self.observers.push(Registration { id, observer });
        debug!(
            client_id = self.client_id,
            observer_id = %id,
            observers = self.observers.len(),
            "Observer registered"
        );
        id
    }

    /// Returns `true` if the observer was registered.
    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|registration| registration.id != id);
        let removed = self.observers.len() != before;
        if removed {
            debug!(client_id = self.client_id, observer_id = %id, "Observer removed");
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn is_inert(&self) -> bool {
        self.inert
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Deliver `event` to every observer. Returns `false` if the event was suppressed.
    pub fn dispatch(&mut self, event: GroupCallEvent) -> bool {
        if self.inert {
            self.stats.events_suppressed += 1;
            trace!(client_id = self.client_id, event = event.kind(), "Dispatcher inert, event dropped");
            return false;
        }

        self.stats.events_dispatched += 1;
        trace!(
            client_id = self.client_id,
            event = event.kind(),
            observers = self.observers.len(),
            "Dispatching event"
        );

        for registration in &self.observers {
            let observer = registration.observer.as_ref();
            let outcome = catch_unwind(AssertUnwindSafe(|| event.deliver_to(self.client_id, observer)));
            match outcome {
                Ok(()) => self.stats.deliveries += 1,
                Err(payload) => {
                    self.stats.observer_failures += 1;
                    error!(
                        client_id = self.client_id,
                        observer_id = %registration.id,
                        event = event.kind(),
                        panic = %panic_message(payload.as_ref()),
                        "Observer panicked, continuing delivery"
                    );
                }
            }
        }

        if event.is_terminal() {
            self.inert = true;
            self.observers.clear();
            debug!(client_id = self.client_id, "Dispatcher is now inert");
        }
        true
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use parking_lot::Mutex;

    /// Records the callback names it sees, optionally panicking on one of them.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        panic_on: Option<&'static str>,
    }

    impl Recorder {
        fn record(&self, what: &str) {
            self.log.lock().push(format!("{}:{}", self.name, what));
            if self.panic_on == Some(what) {
                panic!("{} refuses {}", self.name, what);
            }
        }
    }

    impl GroupCallObserver for Recorder {
        fn request_membership_proof(&self, _: ClientId) {
            self.record("proof")
        }
        fn request_group_members(&self, _: ClientId) {
            self.record("members")
        }
        fn on_local_device_state_changed(&self, _: ClientId, _: &LocalDeviceState) {
            self.record("local")
        }
        fn on_remote_device_states_changed(&self, _: ClientId, _: &[RemoteDeviceState]) {
            self.record("remote")
        }
        fn on_audio_levels(&self, _: ClientId, _: AudioLevel, _: &[ReceivedAudioLevel]) {
            self.record("audio")
        }
        fn on_low_bandwidth_for_video(&self, _: ClientId, _: bool) {
            self.record("bandwidth")
        }
        fn on_reactions(&self, _: ClientId, _: &[Reaction]) {
            self.record("reactions")
        }
        fn on_raised_hands(&self, _: ClientId, _: &[DemuxId]) {
            self.record("hands")
        }
        fn on_peek_changed(&self, _: ClientId, _: &PeekInfo) {
            self.record("peek")
        }
        fn on_ended(&self, _: ClientId, _: GroupCallEndReason) {
            self.record("ended")
        }
        fn on_speaking_notification(&self, _: ClientId, _: &SpeechEvent) {
            self.record("speaking")
        }
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        panic_on: Option<&'static str>,
    ) -> Arc<dyn GroupCallObserver> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
            panic_on,
        })
    }

    #[test]
    fn test_registration_order_is_delivery_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new(1);
        dispatcher.add_observer(recorder("a", &log, None));
        dispatcher.add_observer(recorder("b", &log, None));

        dispatcher.dispatch(GroupCallEvent::MembershipProofRequested);
        dispatcher.dispatch(GroupCallEvent::RaisedHands(vec![3]));

        assert_eq!(*log.lock(), vec!["a:proof", "b:proof", "a:hands", "b:hands"]);
        assert_eq!(dispatcher.stats().deliveries, 4);
    }

    #[test]
    fn test_panicking_observer_is_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new(1);
        dispatcher.add_observer(recorder("a", &log, Some("reactions")));
        dispatcher.add_observer(recorder("b", &log, None));

        dispatcher.dispatch(GroupCallEvent::Reactions(Vec::new()));
        dispatcher.dispatch(GroupCallEvent::RaisedHands(Vec::new()));

        assert_eq!(
            *log.lock(),
            vec!["a:reactions", "b:reactions", "a:hands", "b:hands"]
        );
        let stats = dispatcher.stats();
        assert_eq!(stats.observer_failures, 1);
        assert_eq!(stats.deliveries, 3);
    }

    #[test]
    fn test_ended_makes_dispatcher_inert() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new(1);
        dispatcher.add_observer(recorder("a", &log, None));

        assert!(dispatcher.dispatch(GroupCallEvent::Ended(GroupCallEndReason::Kicked)));
        assert!(dispatcher.is_inert());
        assert_eq!(dispatcher.observer_count(), 0);

        assert!(!dispatcher.dispatch(GroupCallEvent::Ended(GroupCallEndReason::Kicked)));
        assert!(!dispatcher.dispatch(GroupCallEvent::MembershipProofRequested));
        assert_eq!(*log.lock(), vec!["a:ended"]);
        assert_eq!(dispatcher.stats().events_suppressed, 2);
    }

    #[test]
    fn test_remove_observer() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new(1);
        let a = dispatcher.add_observer(recorder("a", &log, None));
        dispatcher.add_observer(recorder("b", &log, None));

        assert!(dispatcher.remove_observer(a));
        assert!(!dispatcher.remove_observer(a));
        dispatcher.dispatch(GroupCallEvent::GroupMembersRequested);

        assert_eq!(*log.lock(), vec!["b:members"]);
    }
}
