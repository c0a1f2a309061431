//! Message keys and commands for the `alp://` protocol.
//!
//! Every message starts with `alp://` followed by a four-letter key that
//! names its kind, e.g. `alp://ppsw/13/1`.

use crate::types::{KeyPress, Pin, Tone};

/// Four-letter message keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    // Board-bound commands
    /// Switch a digital pin on or off.
    PowerPinSwitch,
    /// Set the intensity (PWM value) of an analog pin.
    PowerPinIntensity,
    /// Start reporting a digital pin.
    StartListeningDigital,
    /// Start reporting an analog pin.
    StartListeningAnalog,
    /// Stop reporting a digital pin.
    StopListeningDigital,
    /// Stop reporting an analog pin.
    StopListeningAnalog,
    /// Play a tone.
    Tone,
    /// Stop a tone.
    NoTone,
    /// Forward a key press.
    KeyPress,

    // Either direction
    /// Free-form custom message.
    Custom,

    // Host-bound notifications
    /// Digital pin changed.
    DigitalRead,
    /// Analog pin changed.
    AnalogRead,
    /// Reply to an id-tagged command.
    Reply,
}

impl MessageKey {
    /// Returns the wire representation of this key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PowerPinSwitch => "ppsw",
            Self::PowerPinIntensity => "ppin",
            Self::StartListeningDigital => "srld",
            Self::StartListeningAnalog => "srla",
            Self::StopListeningDigital => "spld",
            Self::StopListeningAnalog => "spla",
            Self::Tone => "tone",
            Self::NoTone => "notn",
            Self::KeyPress => "kprs",
            Self::Custom => "cust",
            Self::DigitalRead => "dred",
            Self::AnalogRead => "ared",
            Self::Reply => "rply",
        }
    }

    /// Parses a key from its wire representation.
    #[must_use]
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "ppsw" => Some(Self::PowerPinSwitch),
            "ppin" => Some(Self::PowerPinIntensity),
            "srld" => Some(Self::StartListeningDigital),
            "srla" => Some(Self::StartListeningAnalog),
            "spld" => Some(Self::StopListeningDigital),
            "spla" => Some(Self::StopListeningAnalog),
            "tone" => Some(Self::Tone),
            "notn" => Some(Self::NoTone),
            "kprs" => Some(Self::KeyPress),
            "cust" => Some(Self::Custom),
            "dred" => Some(Self::DigitalRead),
            "ared" => Some(Self::AnalogRead),
            "rply" => Some(Self::Reply),
            _ => None,
        }
    }
}

/// A command sent to the board.
///
/// Pin switches are write-only: the board never echoes them back, it
/// reports pin changes with separate read messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Switch a digital pin.
    SwitchDigital { pin: u32, value: bool },
    /// Set an analog pin's output value.
    SwitchAnalog { pin: u32, value: u32 },
    /// Start reporting changes of a pin.
    StartListening(Pin),
    /// Stop reporting changes of a pin.
    StopListening(Pin),
    /// Play a tone.
    Tone(Tone),
    /// Stop a tone on a pin.
    NoTone { pin: u32 },
    /// Forward a key press.
    KeyPress(KeyPress),
    /// Send custom messages, joined with `/` on the wire.
    ///
    /// The board splits the payload on `/`, so an element containing `/`
    /// arrives as several. Elements containing the divider byte or `?id=`
    /// are rejected when sent through a [`Link`](crate::link::Link).
    CustomMessages(Vec<String>),
}

impl Command {
    /// Returns the message key used to encode this command.
    #[must_use]
    pub const fn key(&self) -> MessageKey {
        match self {
            Self::SwitchDigital { .. } => MessageKey::PowerPinSwitch,
            Self::SwitchAnalog { .. } => MessageKey::PowerPinIntensity,
            Self::StartListening(Pin::Digital(_)) => MessageKey::StartListeningDigital,
            Self::StartListening(Pin::Analog(_)) => MessageKey::StartListeningAnalog,
            Self::StopListening(Pin::Digital(_)) => MessageKey::StopListeningDigital,
            Self::StopListening(Pin::Analog(_)) => MessageKey::StopListeningAnalog,
            Self::Tone(_) => MessageKey::Tone,
            Self::NoTone { .. } => MessageKey::NoTone,
            Self::KeyPress(_) => MessageKey::KeyPress,
            Self::CustomMessages(_) => MessageKey::Custom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_round_trip() {
        for key in [
            MessageKey::PowerPinSwitch,
            MessageKey::PowerPinIntensity,
            MessageKey::StartListeningDigital,
            MessageKey::StartListeningAnalog,
            MessageKey::StopListeningDigital,
            MessageKey::StopListeningAnalog,
            MessageKey::Tone,
            MessageKey::NoTone,
            MessageKey::KeyPress,
            MessageKey::Custom,
            MessageKey::DigitalRead,
            MessageKey::AnalogRead,
            MessageKey::Reply,
        ] {
            assert_eq!(MessageKey::from_key(key.as_str()), Some(key));
        }
        assert_eq!(MessageKey::from_key("nope"), None);
    }

    #[test]
    fn test_command_key_depends_on_pin_kind() {
        assert_eq!(
            Command::StartListening(Pin::Analog(1)).key(),
            MessageKey::StartListeningAnalog
        );
        assert_eq!(
            Command::StopListening(Pin::Digital(1)).key(),
            MessageKey::StopListeningDigital
        );
    }
}
