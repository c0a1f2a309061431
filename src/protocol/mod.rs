//! Protocol definitions for board communication.
//!
//! This module contains the low-level protocol types including:
//! - Divider-based framing
//! - Message keys and commands
//! - The `alp://` text codec

pub mod codec;
pub mod command;
pub mod frame;

pub use codec::{
    check_encodable, decode, decode_command, encode, encode_message, encode_with_id,
};
pub use command::{Command, MessageKey};
pub use frame::{
    DEFAULT_DIVIDER, FrameDecoder, MAX_FRAME_SIZE, NEWLINE_DIVIDER, encode as encode_frame,
};
