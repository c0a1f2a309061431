//! Listener registry and event dispatch.
//!
//! Decoded messages are fanned out to four independent listener sets:
//! pin listeners (optionally filtered by pin), custom message listeners,
//! reply listeners and connection listeners. Async consumers can also
//! [`subscribe`](EventDispatcher::subscribe) to a broadcast of every event.
//!
//! Each set is copy-on-write: dispatch iterates over the snapshot taken when
//! it started, so listeners may add or remove listeners from inside a
//! callback without affecting the dispatch in flight.

pub mod listener;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

use crate::types::{IncomingMessage, Pin, PinEvent};

pub use listener::{
    ConnectionListener, CustomListener, ListenerError, ListenerResult, PinListener,
    ReplyListener,
};

/// Connection state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The reader started and the link is usable.
    Established,
    /// The byte source ended or failed; the link will not recover.
    Lost { reason: String },
}

/// Everything the dispatcher broadcasts to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A decoded message from the board.
    Message(IncomingMessage),
    /// A connection state change.
    Connection(ConnectionEvent),
}

/// Handle identifying a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event.
    ///
    /// Returns `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!("subscription lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Copy-on-write list of listeners.
struct ListenerSet<T> {
    entries: RwLock<Arc<Vec<(ListenerId, T)>>>,
}

impl<T: Clone> ListenerSet<T> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    fn add(&self, id: ListenerId, listener: T) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::clone(&entries);
        next.push((id, listener));
        *entries = Arc::new(next);
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.iter().any(|(entry_id, _)| *entry_id == id) {
            return false;
        }
        let next = entries
            .iter()
            .filter(|(entry_id, _)| *entry_id != id)
            .cloned()
            .collect();
        *entries = Arc::new(next);
        true
    }

    fn snapshot(&self) -> Arc<Vec<(ListenerId, T)>> {
        Arc::clone(&self.entries.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

type PinEntry = (Option<Pin>, Arc<dyn PinListener>);

struct EventDispatcherInner {
    next_id: AtomicU64,
    pins: ListenerSet<PinEntry>,
    customs: ListenerSet<Arc<dyn CustomListener>>,
    replies: ListenerSet<Arc<dyn ReplyListener>>,
    connections: ListenerSet<Arc<dyn ConnectionListener>>,
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to listeners and subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    ///
    /// `capacity` bounds the broadcast buffer of each subscription.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner {
                next_id: AtomicU64::new(1),
                pins: ListenerSet::new(),
                customs: ListenerSet::new(),
                replies: ListenerSet::new(),
                connections: ListenerSet::new(),
                sender,
            }),
        }
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a pin listener.
    ///
    /// With `filter` set, only changes of that pin are delivered.
    pub fn add_pin_listener(
        &self,
        filter: Option<Pin>,
        listener: impl PinListener + 'static,
    ) -> ListenerId {
        let id = self.next_id();
        let listener: Arc<dyn PinListener> = Arc::new(listener);
        self.inner.pins.add(id, (filter, listener));
        id
    }

    /// Registers a custom message listener.
    pub fn add_custom_listener(&self, listener: impl CustomListener + 'static) -> ListenerId {
        let id = self.next_id();
        self.inner.customs.add(id, Arc::new(listener));
        id
    }

    /// Registers a reply listener.
    pub fn add_reply_listener(&self, listener: impl ReplyListener + 'static) -> ListenerId {
        let id = self.next_id();
        self.inner.replies.add(id, Arc::new(listener));
        id
    }

    /// Registers a connection listener.
    pub fn add_connection_listener(
        &self,
        listener: impl ConnectionListener + 'static,
    ) -> ListenerId {
        let id = self.next_id();
        self.inner.connections.add(id, Arc::new(listener));
        id
    }

    /// Removes a pin listener. Returns false if it was not registered.
    pub fn remove_pin_listener(&self, id: ListenerId) -> bool {
        self.inner.pins.remove(id)
    }

    /// Removes a custom message listener.
    pub fn remove_custom_listener(&self, id: ListenerId) -> bool {
        self.inner.customs.remove(id)
    }

    /// Removes a reply listener.
    pub fn remove_reply_listener(&self, id: ListenerId) -> bool {
        self.inner.replies.remove(id)
    }

    /// Removes a connection listener.
    pub fn remove_connection_listener(&self, id: ListenerId) -> bool {
        self.inner.connections.remove(id)
    }

    /// Returns the total number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.pins.len()
            + self.inner.customs.len()
            + self.inner.replies.len()
            + self.inner.connections.len()
    }

    /// Subscribes to every dispatched event.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Dispatches a message to the matching listeners, then to subscribers.
    ///
    /// Listener failures are logged and never stop the dispatch.
    pub fn dispatch(&self, message: IncomingMessage) {
        match &message {
            IncomingMessage::PinValueChanged(event) => self.dispatch_pin(event),
            IncomingMessage::Custom(payload) => {
                for (id, listener) in self.inner.customs.snapshot().iter() {
                    notify(*id, || listener.custom_message(payload));
                }
            }
            IncomingMessage::Reply(reply) => {
                for (id, listener) in self.inner.replies.snapshot().iter() {
                    notify(*id, || listener.reply(reply));
                }
            }
        }

        // No receivers is fine
        let _ = self.inner.sender.send(Event::Message(message));
    }

    fn dispatch_pin(&self, event: &PinEvent) {
        let pin = event.pin();
        for (id, (filter, listener)) in self.inner.pins.snapshot().iter() {
            if filter.is_none_or(|f| f == pin) {
                notify(*id, || listener.pin_changed(event));
            }
        }
    }

    /// Dispatches a connection state change.
    pub fn dispatch_connection(&self, event: ConnectionEvent) {
        for (id, listener) in self.inner.connections.snapshot().iter() {
            notify(*id, || listener.connection_changed(&event));
        }
        let _ = self.inner.sender.send(Event::Connection(event));
    }
}

/// Runs one listener callback, containing errors and panics.
fn notify(id: ListenerId, call: impl FnOnce() -> ListenerResult) {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(listener = %id, "listener failed: {}", e),
        Err(_) => tracing::warn!(listener = %id, "listener panicked"),
    }
}
