//! Messages received from the board.

use std::collections::BTreeMap;

use crate::types::pin::Pin;

/// A pin changed its value.
///
/// Digital pins carry a boolean, analog pins an integer reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinEvent {
    /// Digital pin changed.
    Digital { pin: u32, value: bool },
    /// Analog pin changed.
    Analog { pin: u32, value: u32 },
}

impl PinEvent {
    /// Returns the pin that changed.
    #[must_use]
    pub const fn pin(&self) -> Pin {
        match *self {
            Self::Digital { pin, .. } => Pin::Digital(pin),
            Self::Analog { pin, .. } => Pin::Analog(pin),
        }
    }
}

/// Acknowledgement of an id-tagged command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Id of the message being acknowledged.
    pub id: u64,
    /// True if the board executed the command.
    pub ok: bool,
    /// Optional named result values.
    pub params: BTreeMap<String, String>,
}

impl Reply {
    /// Creates a reply without parameters.
    #[must_use]
    pub const fn new(id: u64, ok: bool) -> Self {
        Self {
            id,
            ok,
            params: BTreeMap::new(),
        }
    }

    /// Adds a named parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Looks up a named parameter.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }
}

/// A decoded message from the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingMessage {
    /// A listened pin changed.
    PinValueChanged(PinEvent),
    /// Free-form text sent by the sketch.
    Custom(String),
    /// Acknowledgement of a previously sent command.
    Reply(Reply),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_event_pin() {
        let event = PinEvent::Analog { pin: 2, value: 512 };
        assert_eq!(event.pin(), Pin::Analog(2));

        let event = PinEvent::Digital {
            pin: 7,
            value: true,
        };
        assert_eq!(event.pin(), Pin::Digital(7));
    }

    #[test]
    fn test_reply_params() {
        let reply = Reply::new(4, true).with_param("temp", "21");
        assert_eq!(reply.param("temp"), Some("21"));
        assert_eq!(reply.param("missing"), None);
    }
}
