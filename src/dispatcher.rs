//! Event classification and call-end fan-out

use crate::{
    cdr::CdrRecord,
    error::{EslError, EslResult},
    event::{CallEvent, EventKind},
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Error type call-end subscribers may return.
pub type SubscriberError = Box<dyn std::error::Error + Send + Sync>;

type CallEndFn = dyn Fn(&CdrRecord) -> Result<(), SubscriberError> + Send + Sync;

/// Handle returned by [`EventDispatcher::on_call_end`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Routes decoded events: traces lifecycle transitions and hands a
/// [`CdrRecord`] to every call-end subscriber on hangup completion.
///
/// One subscriber failing or panicking never affects the others.
pub struct EventDispatcher {
    subscribers: Mutex<Vec<(SubscriberId, Arc<CallEndFn>)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a callback for finished calls. Registrations are additive.
    pub fn on_call_end<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&CdrRecord) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let id = SubscriberId(
            self.next_id
                .fetch_add(1, Ordering::Relaxed),
        );
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn remove_call_end(&self, id: SubscriberId) -> bool {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Entry point for items coming off a connection's event stream.
    pub fn handle(&self, item: EslResult<CallEvent>) {
        match item {
            Ok(event) => self.dispatch(&event),
            Err(EslError::QueueFull) => warn!("Event queue overflowed, some events were dropped"),
            Err(e) => debug!("Dropping malformed event: {}", e),
        }
    }

    pub fn dispatch(&self, event: &CallEvent) {
        let Some(kind) = event.kind() else {
            return;
        };

        if kind.is_traced_lifecycle() {
            info!(
                "FS Event {} uuid={}",
                kind,
                event
                    .unique_id()
                    .unwrap_or("-")
            );
        }

        if kind == EventKind::ChannelHangupComplete {
            match CdrRecord::from_event(event) {
                Some(cdr) => self.notify_call_end(&cdr),
                None => debug!("CHANNEL_HANGUP_COMPLETE without Unique-ID, no CDR"),
            }
        }
    }

    fn notify_call_end(&self, cdr: &CdrRecord) {
        // Snapshot so callbacks may (un)subscribe without deadlocking.
        let subscribers: Vec<_> = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        debug!(
            "Delivering CDR for {} to {} subscriber(s)",
            cdr.uuid,
            subscribers.len()
        );

        for (id, callback) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| callback(cdr))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(
                    "Call-end subscriber {:?} failed for {}: {}",
                    id, cdr.uuid, e
                ),
                Err(_) => error!("Call-end subscriber {:?} panicked for {}", id, cdr.uuid),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tracing_test::traced_test;

    fn hangup_complete(uuid: &str) -> CallEvent {
        let mut event = CallEvent::with_kind(EventKind::ChannelHangupComplete);
        event.set_header("Unique-ID", uuid);
        event.set_header("variable_duration", "42");
        event.set_header("variable_billsec", "30");
        event.set_header("Hangup-Cause", "NORMAL_CLEARING");
        event
    }

    #[test]
    fn every_subscriber_receives_cdr_once() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let seen = seen.clone();
            dispatcher.on_call_end(move |cdr| {
                seen.lock()
                    .unwrap()
                    .push(cdr.clone());
                Ok(())
            });
        }

        dispatcher.dispatch(&hangup_complete("abc-123"));

        let seen = seen
            .lock()
            .unwrap();
        assert_eq!(seen.len(), 2);
        for cdr in seen.iter() {
            assert_eq!(cdr.uuid, "abc-123");
            assert_eq!(cdr.duration, 42);
            assert_eq!(cdr.billsec, 30);
            assert_eq!(cdr.hangup_cause.as_deref(), Some("NORMAL_CLEARING"));
        }
    }

    #[test]
    #[traced_test]
    fn failing_and_panicking_subscribers_are_isolated() {
        let dispatcher = EventDispatcher::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        dispatcher.on_call_end(|_| Err("database unavailable".into()));
        dispatcher.on_call_end(|_| panic!("subscriber bug"));
        let counter = delivered.clone();
        dispatcher.on_call_end(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        dispatcher.dispatch(&hangup_complete("abc-123"));
        dispatcher.dispatch(&hangup_complete("def-456"));

        assert_eq!(delivered.load(Ordering::SeqCst), 2);
        assert!(logs_contain("database unavailable"));
        assert!(logs_contain("panicked"));
    }

    #[test]
    fn removed_subscriber_stops_receiving() {
        let dispatcher = EventDispatcher::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        let id = dispatcher.on_call_end(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        dispatcher.dispatch(&hangup_complete("a"));
        assert!(dispatcher.remove_call_end(id));
        assert!(!dispatcher.remove_call_end(id));
        dispatcher.dispatch(&hangup_complete("b"));

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.subscriber_count(), 0);
    }

    #[test]
    fn hangup_without_uuid_is_skipped() {
        let dispatcher = EventDispatcher::new();
        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        dispatcher.on_call_end(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let event = CallEvent::with_kind(EventKind::ChannelHangupComplete);
        dispatcher.dispatch(&event);
        dispatcher.handle(Err(EslError::protocol_error("garbled")));

        assert_eq!(delivered.load(Ordering::SeqCst), 0);
    }

    #[test]
    #[traced_test]
    fn lifecycle_events_are_logged() {
        let dispatcher = EventDispatcher::new();
        let mut answer = CallEvent::with_kind(EventKind::ChannelAnswer);
        answer.set_header("Unique-ID", "7f4de4bc");
        dispatcher.dispatch(&answer);

        let mut heartbeat = CallEvent::with_kind(EventKind::Heartbeat);
        heartbeat.set_header("Unique-ID", "not-logged");
        dispatcher.dispatch(&heartbeat);

        assert!(logs_contain("FS Event CHANNEL_ANSWER uuid=7f4de4bc"));
        assert!(!logs_contain("not-logged"));
    }
}
