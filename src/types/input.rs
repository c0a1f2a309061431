//! Payloads for tone and key press commands.

use std::time::Duration;

/// A tone to play on a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tone {
    /// Output pin.
    pub pin: u32,
    /// Frequency in hertz.
    pub hertz: u32,
    /// How long to play; `None` plays until a no-tone command.
    pub duration: Option<Duration>,
}

impl Tone {
    /// Creates a tone that plays until stopped.
    #[must_use]
    pub const fn new(pin: u32, hertz: u32) -> Self {
        Self {
            pin,
            hertz,
            duration: None,
        }
    }

    /// Sets the duration.
    #[must_use]
    pub const fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// A key press forwarded to the board.
///
/// Field meanings follow AWT key events: character, virtual key code,
/// key location and the two modifier masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    /// Typed character.
    pub key_char: char,
    /// Virtual key code.
    pub key_code: i32,
    /// Key location (standard, left, right, numpad).
    pub key_location: i32,
    /// Legacy modifier mask.
    pub modifiers: i32,
    /// Extended modifier mask.
    pub modifiers_ex: i32,
}

impl KeyPress {
    /// Creates a key press without modifiers at the standard location.
    #[must_use]
    pub const fn new(key_char: char, key_code: i32) -> Self {
        Self {
            key_char,
            key_code,
            key_location: 1,
            modifiers: 0,
            modifiers_ex: 0,
        }
    }
}
