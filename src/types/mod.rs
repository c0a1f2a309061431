//! Data types for board entities.
//!
//! This module contains the value types exchanged with a board:
//! - Pins and pin values
//! - Incoming messages (pin changes, custom messages, replies)
//! - Command payloads (tones, key presses)

pub mod input;
pub mod message;
pub mod pin;

pub use input::{KeyPress, Tone};
pub use message::{IncomingMessage, PinEvent, Reply};
pub use pin::Pin;
