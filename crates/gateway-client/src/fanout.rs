//! Event fan-out to registered listeners.
//!
//! Every inbound `event` frame is delivered to every listener registered
//! at the time of dispatch, for the whole lifetime of the client (listeners
//! survive reconnects). Events arriving while disconnected do not exist, so
//! nothing is buffered or replayed.
//!
//! Registration and removal are safe at any time, including from inside a
//! listener callback: dispatch iterates a snapshot, and a listener removed
//! mid-dispatch is skipped if it has not been reached yet.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use gateway_protocol::EventFrame;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Capacity of the async event channel before slow receivers lag.
const CHANNEL_CAPACITY: usize = 256;

type Callback = Box<dyn Fn(&EventFrame) + Send + Sync>;

struct Listener {
    id: u64,
    active: AtomicBool,
    callback: Callback,
}

/// Multicast of inbound events.
pub struct EventFanout {
    listeners: Mutex<Vec<Arc<Listener>>>,
    next_id: AtomicU64,
    channel: broadcast::Sender<EventFrame>,
}

/// Handle returned by [`EventFanout::subscribe`].
///
/// Dropping it does not unsubscribe; call [`EventSubscription::unsubscribe`].
#[derive(Clone, Debug)]
pub struct EventSubscription {
    id: u64,
    fanout: Weak<EventFanout>,
}

impl EventFanout {
    /// Create an empty fan-out.
    pub fn new() -> Self {
        let (channel, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            channel,
        }
    }

    /// Register a callback invoked for every event.
    ///
    /// Callbacks run on the connection task and must not block. A panicking
    /// callback is contained and does not affect other listeners.
    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> EventSubscription
    where
        F: Fn(&EventFrame) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push(Arc::new(Listener {
            id,
            active: AtomicBool::new(true),
            callback: Box::new(callback),
        }));
        debug!(listener_id = id, "event listener registered");
        EventSubscription {
            id,
            fanout: Arc::downgrade(self),
        }
    }

    /// Remove a listener. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(pos) = listeners.iter().position(|l| l.id == id) else {
            return false;
        };
        let listener = listeners.remove(pos);
        listener.active.store(false, Ordering::Release);
        debug!(listener_id = id, "event listener removed");
        true
    }

    /// Receiver fed with a copy of every event dispatched after this call.
    pub fn channel(&self) -> broadcast::Receiver<EventFrame> {
        self.channel.subscribe()
    }

    /// Deliver an event to every active listener and channel receiver.
    ///
    /// Returns the number of callbacks that completed without panicking.
    pub fn dispatch(&self, event: &EventFrame) -> usize {
        let snapshot: Vec<Arc<Listener>> = self.listeners.lock().clone();
        let mut delivered = 0;
        for listener in snapshot {
            if !listener.active.load(Ordering::Acquire) {
                continue;
            }
            let outcome = catch_unwind(AssertUnwindSafe(|| (listener.callback)(event)));
            if outcome.is_ok() {
                delivered += 1;
            } else {
                warn!(listener_id = listener.id, event = %event.event, "event listener panicked");
            }
        }
        if self.channel.receiver_count() > 0 {
            let _ = self.channel.send(event.clone());
        }
        delivered
    }

    /// Number of registered callbacks.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Default for EventFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSubscription {
    /// Stop receiving events. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(fanout) = self.fanout.upgrade() {
            let _ = fanout.unsubscribe(self.id);
        }
    }

    /// Listener id, for logging.
    pub fn id(&self) -> u64 {
        self.id
    }
}
