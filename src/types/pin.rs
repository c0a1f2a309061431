//! Pin addressing.

use std::fmt;

/// An addressable I/O line on the board.
///
/// Identity is the pair of kind and number, so `Digital(3)` and `Analog(3)`
/// are different pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pin {
    /// Digital pin (on/off).
    Digital(u32),
    /// Analog pin (0-1023 on most boards).
    Analog(u32),
}

impl Pin {
    /// Returns the pin number without its kind.
    #[must_use]
    pub const fn number(self) -> u32 {
        match self {
            Self::Digital(n) | Self::Analog(n) => n,
        }
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Digital(n) => write!(f, "D{n}"),
            Self::Analog(n) => write!(f, "A{n}"),
        }
    }
}
