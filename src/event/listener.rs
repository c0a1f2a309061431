//! Listener traits.
//!
//! Every trait is implemented for matching closures, so both
//! `dispatcher.add_custom_listener(|msg: &str| -> ListenerResult { .. })`
//! and dedicated listener types work.

use crate::event::ConnectionEvent;
use crate::types::{PinEvent, Reply};

/// Error a listener may return; it is logged and otherwise ignored.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a listener callback.
pub type ListenerResult = Result<(), ListenerError>;

/// Receives pin value changes.
pub trait PinListener: Send + Sync {
    /// Called for every matching pin change.
    fn pin_changed(&self, event: &PinEvent) -> ListenerResult;
}

/// Receives custom messages.
pub trait CustomListener: Send + Sync {
    /// Called with the custom message payload.
    fn custom_message(&self, payload: &str) -> ListenerResult;
}

/// Receives replies.
pub trait ReplyListener: Send + Sync {
    /// Called for every reply, whatever its id.
    fn reply(&self, reply: &Reply) -> ListenerResult;
}

/// Receives connection state changes.
pub trait ConnectionListener: Send + Sync {
    /// Called when the connection is established or lost.
    fn connection_changed(&self, event: &ConnectionEvent) -> ListenerResult;
}

impl<F> PinListener for F
where
    F: Fn(&PinEvent) -> ListenerResult + Send + Sync,
{
    fn pin_changed(&self, event: &PinEvent) -> ListenerResult {
        self(event)
    }
}

impl<F> CustomListener for F
where
    F: Fn(&str) -> ListenerResult + Send + Sync,
{
    fn custom_message(&self, payload: &str) -> ListenerResult {
        self(payload)
    }
}

impl<F> ReplyListener for F
where
    F: Fn(&Reply) -> ListenerResult + Send + Sync,
{
    fn reply(&self, reply: &Reply) -> ListenerResult {
        self(reply)
    }
}

impl<F> ConnectionListener for F
where
    F: Fn(&ConnectionEvent) -> ListenerResult + Send + Sync,
{
    fn connection_changed(&self, event: &ConnectionEvent) -> ListenerResult {
        self(event)
    }
}
